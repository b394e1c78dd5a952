// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions shared between the provider and its driver

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Opaque open-resource identifier. Zero is never issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u64);

impl HandleId {
    /// The "no handle" value carried by a fresh or closed context.
    pub const NONE: HandleId = HandleId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Driver attribute bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const NORMAL = 0x0000_0080;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
    }
}

impl FileAttributes {
    /// Flags a caller may change through setFileAttributes.
    pub const SETTABLE: FileAttributes = FileAttributes::HIDDEN
        .union(FileAttributes::READONLY)
        .union(FileAttributes::SYSTEM)
        .union(FileAttributes::ARCHIVE);

    /// Flags derived from host metadata, never stored.
    pub const DERIVED: FileAttributes =
        FileAttributes::DIRECTORY.union(FileAttributes::REPARSE_POINT);
}

bitflags! {
    /// Desired-access mask of a create request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const FILE_READ_DATA = 0x0000_0001;
        const FILE_WRITE_DATA = 0x0000_0002;
        const FILE_APPEND_DATA = 0x0000_0004;
        const DELETE = 0x0001_0000;
        const MAXIMUM_ALLOWED = 0x0200_0000;
        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;
        const _ = !0;
    }
}

impl AccessMask {
    const FULL: AccessMask = AccessMask::GENERIC_ALL.union(AccessMask::MAXIMUM_ALLOWED);

    pub fn wants_read(self) -> bool {
        self.intersects(
            AccessMask::GENERIC_READ
                .union(AccessMask::FILE_READ_DATA)
                .union(Self::FULL),
        )
    }

    pub fn wants_write(self) -> bool {
        self.intersects(
            AccessMask::GENERIC_WRITE
                .union(AccessMask::FILE_WRITE_DATA)
                .union(AccessMask::FILE_APPEND_DATA)
                .union(Self::FULL),
        )
    }
}

bitflags! {
    /// Create options of a create request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE = 0x0000_0001;
        const WRITE_THROUGH = 0x0000_0002;
        const NO_INTERMEDIATE_BUFFERING = 0x0000_0008;
        const NON_DIRECTORY_FILE = 0x0000_0040;
        const DELETE_ON_CLOSE = 0x0000_1000;
        const _ = !0;
    }
}

bitflags! {
    /// Share access of a create request.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShareAccess: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const DELETE = 0x4;
    }
}

bitflags! {
    /// File-system capability flags reported in volume information.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileSystemFlags: u32 {
        const CASE_SENSITIVE_SEARCH = 0x0000_0001;
        const CASE_PRESERVED_NAMES = 0x0000_0002;
        const UNICODE_ON_DISK = 0x0000_0004;
    }
}

bitflags! {
    /// Mount options understood by the driver.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DriverMountFlags: u32 {
        const DEBUG_MODE = 1;
        const STD_ERR_OUTPUT = 2;
        const ALT_STREAM = 4;
        const WRITE_PROTECTION = 8;
        const NETWORK = 16;
        const REMOVABLE = 32;
        const MOUNT_MANAGER = 64;
        const CURRENT_SESSION = 128;
        const FILELOCK_USER_MODE = 256;
    }
}

/// What a create request should do when the target exists or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreationDisposition {
    CreateNew,
    CreateAlways,
    OpenExisting,
    OpenAlways,
    TruncateExisting,
}

impl CreationDisposition {
    /// Decode a user-mode disposition (CREATE_NEW = 1 .. TRUNCATE_EXISTING = 5).
    pub fn from_win32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::CreateNew),
            2 => Some(Self::CreateAlways),
            3 => Some(Self::OpenExisting),
            4 => Some(Self::OpenAlways),
            5 => Some(Self::TruncateExisting),
            _ => None,
        }
    }

    /// Decode a kernel disposition (FILE_SUPERSEDE = 0 .. FILE_OVERWRITE_IF = 5).
    pub fn from_kernel(value: u32) -> Option<Self> {
        match value {
            0 | 5 => Some(Self::CreateAlways),
            1 => Some(Self::OpenExisting),
            2 => Some(Self::CreateNew),
            3 => Some(Self::OpenAlways),
            4 => Some(Self::TruncateExisting),
            _ => None,
        }
    }

    pub fn as_win32(self) -> u32 {
        match self {
            Self::CreateNew => 1,
            Self::CreateAlways => 2,
            Self::OpenExisting => 3,
            Self::OpenAlways => 4,
            Self::TruncateExisting => 5,
        }
    }

    /// Whether an absent target gets created.
    pub fn creates(self) -> bool {
        matches!(self, Self::CreateNew | Self::CreateAlways | Self::OpenAlways)
    }

    /// Whether an existing target gets truncated.
    pub fn truncates(self) -> bool {
        matches!(self, Self::CreateAlways | Self::TruncateExisting)
    }
}

/// A Windows FILETIME: 100 ns ticks since 1601-01-01 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTime(pub u64);

const TICKS_PER_SECOND: u64 = 10_000_000;
const UNIX_EPOCH_TICKS: u64 = 11_644_473_600 * TICKS_PER_SECOND;

impl FileTime {
    /// Zero means "leave unchanged" in setFileTime.
    pub const ZERO: FileTime = FileTime(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => FileTime(UNIX_EPOCH_TICKS.saturating_add(duration_ticks(after))),
            Err(before) => {
                FileTime(UNIX_EPOCH_TICKS.saturating_sub(duration_ticks(before.duration())))
            }
        }
    }

    /// `None` for the zero value.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self.is_zero() {
            return None;
        }
        if self.0 >= UNIX_EPOCH_TICKS {
            UNIX_EPOCH.checked_add(ticks_duration(self.0 - UNIX_EPOCH_TICKS))
        } else {
            UNIX_EPOCH.checked_sub(ticks_duration(UNIX_EPOCH_TICKS - self.0))
        }
    }
}

fn duration_ticks(d: Duration) -> u64 {
    d.as_secs()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(u64::from(d.subsec_nanos() / 100))
}

fn ticks_duration(ticks: u64) -> Duration {
    Duration::new(
        ticks / TICKS_PER_SECOND,
        ((ticks % TICKS_PER_SECOND) * 100) as u32,
    )
}

/// Answer to getFileInformation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInformation {
    pub file_name: String,
    pub attributes: FileAttributes,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub file_size: u64,
    pub volume_serial_number: u32,
    pub file_index: u64,
    pub number_of_links: u32,
}

/// One directory entry fed to a findFiles sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindData {
    pub file_name: String,
    pub attributes: FileAttributes,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub file_size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskFreeSpace {
    pub free_bytes_available: u64,
    pub total_bytes: u64,
    pub total_free_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInformation {
    pub volume_name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
    pub file_system_flags: FileSystemFlags,
    pub file_system_name: String,
}

impl VolumeInformation {
    /// Fit both names into driver buffers of the given capacities, counted
    /// in UTF-16 units including the terminator.
    pub fn truncated(
        mut self,
        volume_name_capacity: usize,
        file_system_name_capacity: usize,
    ) -> Self {
        self.volume_name = truncate_utf16(&self.volume_name, volume_name_capacity);
        self.file_system_name = truncate_utf16(&self.file_system_name, file_system_name_capacity);
        self
    }
}

fn truncate_utf16(value: &str, capacity: usize) -> String {
    let limit = capacity.saturating_sub(1);
    let mut used = 0;
    let mut end = 0;
    for ch in value.chars() {
        used += ch.len_utf16();
        if used > limit {
            break;
        }
        end += ch.len_utf8();
    }
    value[..end].to_string()
}

/// Per-open state the driver carries between callbacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileContext {
    pub handle: HandleId,
    pub is_directory: bool,
    pub delete_on_close: bool,
    pub write_to_end_of_file: bool,
    pub process_id: u32,
}

impl FileContext {
    pub fn for_process(process_id: u32) -> Self {
        Self {
            process_id,
            ..Self::default()
        }
    }
}
