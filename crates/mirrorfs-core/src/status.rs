// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Win32 status vocabulary returned to the driver.
//!
//! Every callback answers with one of these codes. The numeric values are
//! fixed by the driver protocol and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FsError;

/// A Win32 error code as reported back through the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const SUCCESS: Self = Self(0);
    pub const FILE_NOT_FOUND: Self = Self(2);
    pub const PATH_NOT_FOUND: Self = Self(3);
    pub const ACCESS_DENIED: Self = Self(5);
    pub const INVALID_HANDLE: Self = Self(6);
    pub const INVALID_DATA: Self = Self(13);
    pub const WRITE_PROTECT: Self = Self(19);
    pub const CURRENT_DIRECTORY: Self = Self(16);
    pub const WRITE_FAULT: Self = Self(29);
    pub const READ_FAULT: Self = Self(30);
    pub const GEN_FAILURE: Self = Self(31);
    pub const LOCK_VIOLATION: Self = Self(33);
    pub const NOT_SUPPORTED: Self = Self(50);
    pub const FILE_EXISTS: Self = Self(80);
    pub const CANNOT_MAKE: Self = Self(82);
    pub const INVALID_PARAMETER: Self = Self(87);
    pub const OPEN_FAILED: Self = Self(110);
    pub const DISK_FULL: Self = Self(112);
    pub const CALL_NOT_IMPLEMENTED: Self = Self(120);
    pub const DIR_NOT_EMPTY: Self = Self(145);
    pub const NOT_LOCKED: Self = Self(158);
    pub const BAD_PATHNAME: Self = Self(161);
    pub const BUSY: Self = Self(170);
    /// Also used as a success-with-flag status by create.
    pub const ALREADY_EXISTS: Self = Self(183);
    pub const DIRECTORY: Self = Self(267);
    pub const IO_DEVICE: Self = Self(1117);
    pub const FILE_CORRUPT: Self = Self(1392);
    pub const CANT_ACCESS_FILE: Self = Self(1920);
    pub const FILE_READ_ONLY: Self = Self(6009);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Map a provider error onto the status vocabulary.
    ///
    /// `fallback` is used for raw I/O faults that carry no better
    /// classification, so each operation can report its own fault code.
    pub fn from_error(err: &FsError, fallback: ErrorCode) -> Self {
        match err {
            FsError::NotFound => Self::FILE_NOT_FOUND,
            FsError::PathNotFound => Self::PATH_NOT_FOUND,
            FsError::AlreadyExists => Self::FILE_EXISTS,
            FsError::AccessDenied | FsError::IsADirectory => Self::ACCESS_DENIED,
            FsError::ReadOnly => Self::FILE_READ_ONLY,
            FsError::InvalidHandle => Self::INVALID_HANDLE,
            FsError::InvalidParameter => Self::INVALID_PARAMETER,
            FsError::BadPathname => Self::BAD_PATHNAME,
            FsError::NotADirectory => Self::DIRECTORY,
            FsError::DirectoryNotEmpty => Self::DIR_NOT_EMPTY,
            FsError::CannotAccess => Self::CANT_ACCESS_FILE,
            FsError::Busy => Self::BUSY,
            FsError::LockViolation => Self::LOCK_VIOLATION,
            FsError::NotLocked => Self::NOT_LOCKED,
            FsError::NoSpace => Self::DISK_FULL,
            FsError::Corrupt(_) => Self::FILE_CORRUPT,
            FsError::Unsupported => Self::NOT_SUPPORTED,
            FsError::Io(_) => fallback,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SUCCESS => "ERROR_SUCCESS",
            Self::FILE_NOT_FOUND => "ERROR_FILE_NOT_FOUND",
            Self::PATH_NOT_FOUND => "ERROR_PATH_NOT_FOUND",
            Self::ACCESS_DENIED => "ERROR_ACCESS_DENIED",
            Self::INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            Self::INVALID_DATA => "ERROR_INVALID_DATA",
            Self::WRITE_PROTECT => "ERROR_WRITE_PROTECT",
            Self::CURRENT_DIRECTORY => "ERROR_CURRENT_DIRECTORY",
            Self::WRITE_FAULT => "ERROR_WRITE_FAULT",
            Self::READ_FAULT => "ERROR_READ_FAULT",
            Self::GEN_FAILURE => "ERROR_GEN_FAILURE",
            Self::LOCK_VIOLATION => "ERROR_LOCK_VIOLATION",
            Self::NOT_SUPPORTED => "ERROR_NOT_SUPPORTED",
            Self::FILE_EXISTS => "ERROR_FILE_EXISTS",
            Self::CANNOT_MAKE => "ERROR_CANNOT_MAKE",
            Self::INVALID_PARAMETER => "ERROR_INVALID_PARAMETER",
            Self::OPEN_FAILED => "ERROR_OPEN_FAILED",
            Self::DISK_FULL => "ERROR_DISK_FULL",
            Self::CALL_NOT_IMPLEMENTED => "ERROR_CALL_NOT_IMPLEMENTED",
            Self::DIR_NOT_EMPTY => "ERROR_DIR_NOT_EMPTY",
            Self::NOT_LOCKED => "ERROR_NOT_LOCKED",
            Self::BAD_PATHNAME => "ERROR_BAD_PATHNAME",
            Self::BUSY => "ERROR_BUSY",
            Self::ALREADY_EXISTS => "ERROR_ALREADY_EXISTS",
            Self::DIRECTORY => "ERROR_DIRECTORY",
            Self::IO_DEVICE => "ERROR_IO_DEVICE",
            Self::FILE_CORRUPT => "ERROR_FILE_CORRUPT",
            Self::CANT_ACCESS_FILE => "ERROR_CANT_ACCESS_FILE",
            Self::FILE_READ_ONLY => "ERROR_FILE_READ_ONLY",
            _ => "ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Result of a driver callback.
pub type OpResult<T> = Result<T, ErrorCode>;

/// Attach an operation-specific fault code to a provider result.
pub(crate) trait StatusExt<T> {
    fn or_status(self, fallback: ErrorCode) -> OpResult<T>;
}

impl<T> StatusExt<T> for Result<T, FsError> {
    fn or_status(self, fallback: ErrorCode) -> OpResult<T> {
        self.map_err(|err| ErrorCode::from_error(&err, fallback))
    }
}

impl<T> StatusExt<T> for std::io::Result<T> {
    fn or_status(self, fallback: ErrorCode) -> OpResult<T> {
        self.map_err(|err| ErrorCode::from_error(&FsError::from(err), fallback))
    }
}
