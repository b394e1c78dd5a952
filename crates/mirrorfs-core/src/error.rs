// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the mirror provider

use std::io;

/// Core provider error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("path not found")]
    PathNotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("access denied")]
    AccessDenied,
    #[error("file is read-only")]
    ReadOnly,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("bad pathname")]
    BadPathname,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("cannot access file")]
    CannotAccess,
    #[error("busy")]
    Busy,
    #[error("lock violation")]
    LockViolation,
    #[error("not locked")]
    NotLocked,
    #[error("no space left")]
    NoSpace,
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
    #[error("unsupported")]
    Unsupported,
    #[error("io error: {0}")]
    Io(io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            match code {
                libc::ENOENT => return FsError::NotFound,
                libc::EEXIST => return FsError::AlreadyExists,
                libc::EACCES | libc::EPERM | libc::EROFS => return FsError::AccessDenied,
                libc::ENOTDIR => return FsError::NotADirectory,
                libc::EISDIR => return FsError::IsADirectory,
                libc::ENOTEMPTY => return FsError::DirectoryNotEmpty,
                libc::EBUSY | libc::ETXTBSY => return FsError::Busy,
                libc::ENAMETOOLONG => return FsError::BadPathname,
                libc::ENOSPC => return FsError::NoSpace,
                libc::ENOTSUP => return FsError::Unsupported,
                _ => return FsError::Io(err),
            }
        }
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            io::ErrorKind::PermissionDenied => FsError::AccessDenied,
            io::ErrorKind::InvalidData => FsError::Corrupt(err.to_string()),
            io::ErrorKind::Unsupported => FsError::Unsupported,
            _ => FsError::Io(err),
        }
    }
}
