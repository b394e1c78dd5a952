// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Callback table handed to a driver at mount time.
//!
//! Each callback is either present or absent. A driver answers absent
//! callbacks itself (usually with `CALL_NOT_IMPLEMENTED`).

use std::fmt;
use std::sync::Arc;

use crate::create::{CreateOutcome, CreateRequest};
use crate::dispatcher::MirrorFs;
use crate::status::{ErrorCode, OpResult};
use crate::types::{
    DiskFreeSpace, FileContext, FileInformation, FileTime, FindData, VolumeInformation,
};
use tracing::debug;

pub type CreateFileFn =
    Box<dyn Fn(&str, &CreateRequest, &mut FileContext) -> CreateOutcome + Send + Sync>;
pub type ReadFileFn =
    Box<dyn Fn(&str, &mut [u8], u64, &FileContext) -> OpResult<usize> + Send + Sync>;
pub type WriteFileFn = Box<dyn Fn(&str, &[u8], u64, &FileContext) -> OpResult<usize> + Send + Sync>;
pub type PathFn = Box<dyn Fn(&str, &FileContext) -> OpResult<()> + Send + Sync>;
pub type ReleaseFn = Box<dyn Fn(&str, &mut FileContext) + Send + Sync>;
pub type FileInformationFn =
    Box<dyn Fn(&str, &FileContext) -> OpResult<FileInformation> + Send + Sync>;
pub type FindFilesFn =
    Box<dyn Fn(&str, &FileContext, &mut dyn FnMut(FindData)) -> OpResult<()> + Send + Sync>;
pub type FindFilesWithPatternFn =
    Box<dyn Fn(&str, &str, &FileContext, &mut dyn FnMut(FindData)) -> OpResult<()> + Send + Sync>;
pub type SetFileAttributesFn = Box<dyn Fn(&str, u32, &FileContext) -> OpResult<()> + Send + Sync>;
pub type SetFileTimeFn =
    Box<dyn Fn(&str, FileTime, FileTime, FileTime, &FileContext) -> OpResult<()> + Send + Sync>;
pub type MoveFileFn = Box<dyn Fn(&str, &str, bool, &FileContext) -> OpResult<()> + Send + Sync>;
pub type LengthFn = Box<dyn Fn(&str, u64, &FileContext) -> OpResult<()> + Send + Sync>;
pub type RangeFn = Box<dyn Fn(&str, u64, u64, &FileContext) -> OpResult<()> + Send + Sync>;
pub type DiskFreeSpaceFn = Box<dyn Fn() -> OpResult<DiskFreeSpace> + Send + Sync>;
pub type VolumeInformationFn = Box<dyn Fn() -> OpResult<VolumeInformation> + Send + Sync>;
pub type LifecycleFn = Box<dyn Fn() -> OpResult<()> + Send + Sync>;

#[derive(Default)]
pub struct OperationTable {
    pub create_file: Option<CreateFileFn>,
    pub cleanup: Option<ReleaseFn>,
    pub close_file: Option<ReleaseFn>,
    pub read_file: Option<ReadFileFn>,
    pub write_file: Option<WriteFileFn>,
    pub flush_file_buffers: Option<PathFn>,
    pub get_file_information: Option<FileInformationFn>,
    pub find_files: Option<FindFilesFn>,
    pub find_files_with_pattern: Option<FindFilesWithPatternFn>,
    pub set_file_attributes: Option<SetFileAttributesFn>,
    pub set_file_time: Option<SetFileTimeFn>,
    pub delete_file: Option<PathFn>,
    pub delete_directory: Option<PathFn>,
    pub move_file: Option<MoveFileFn>,
    pub set_end_of_file: Option<LengthFn>,
    pub set_allocation_size: Option<LengthFn>,
    pub lock_file: Option<RangeFn>,
    pub unlock_file: Option<RangeFn>,
    pub get_disk_free_space: Option<DiskFreeSpaceFn>,
    pub get_volume_information: Option<VolumeInformationFn>,
    pub mounted: Option<LifecycleFn>,
    pub unmounted: Option<LifecycleFn>,
}

impl OperationTable {
    /// A table with no callbacks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every callback, served by `fs`.
    pub fn for_provider(fs: Arc<MirrorFs>) -> Self {
        let mut table = Self::read_only(Arc::clone(&fs));

        let f = Arc::clone(&fs);
        table.create_file = Some(Box::new(
            move |path: &str, request: &CreateRequest, ctx: &mut FileContext| {
                f.create_file(path, request, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.cleanup = Some(Box::new(move |path: &str, ctx: &mut FileContext| {
            f.cleanup(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.write_file = Some(Box::new(
            move |path: &str, data: &[u8], offset: u64, ctx: &FileContext| {
                f.write_file(path, data, offset, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.flush_file_buffers = Some(Box::new(move |path: &str, ctx: &FileContext| {
            f.flush_file_buffers(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.set_file_attributes = Some(Box::new(
            move |path: &str, attributes: u32, ctx: &FileContext| {
                f.set_file_attributes(path, attributes, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.set_file_time = Some(Box::new(
            move |path: &str,
                  created: FileTime,
                  accessed: FileTime,
                  written: FileTime,
                  ctx: &FileContext| {
                f.set_file_time(path, created, accessed, written, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.delete_file = Some(Box::new(move |path: &str, ctx: &FileContext| {
            f.delete_file(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.delete_directory = Some(Box::new(move |path: &str, ctx: &FileContext| {
            f.delete_directory(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.move_file = Some(Box::new(
            move |path: &str, new_path: &str, replace: bool, ctx: &FileContext| {
                f.move_file(path, new_path, replace, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.set_end_of_file = Some(Box::new(
            move |path: &str, length: u64, ctx: &FileContext| f.set_end_of_file(path, length, ctx),
        ));
        let f = fs;
        table.set_allocation_size = Some(Box::new(
            move |path: &str, length: u64, ctx: &FileContext| {
                f.set_allocation_size(path, length, ctx)
            },
        ));
        table
    }

    /// Callbacks that never modify the mirror, for write-protected mounts.
    ///
    /// Create stays so existing objects can be opened, but any request that
    /// could change the mirror is answered with `WRITE_PROTECT` before it
    /// reaches the provider. Cleanup never honours delete-on-close.
    pub fn read_only(fs: Arc<MirrorFs>) -> Self {
        let mut table = Self::empty();

        let f = Arc::clone(&fs);
        table.create_file = Some(Box::new(
            move |path: &str, request: &CreateRequest, ctx: &mut FileContext| {
                if request.modifies() {
                    debug!(target: "mirrorfs", path, "write-protected, refusing create");
                    return CreateOutcome::failed(ErrorCode::WRITE_PROTECT);
                }
                f.create_file(path, request, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.cleanup = Some(Box::new(move |path: &str, ctx: &mut FileContext| {
            ctx.delete_on_close = false;
            f.cleanup(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.close_file = Some(Box::new(move |path: &str, ctx: &mut FileContext| {
            f.close_file(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.read_file = Some(Box::new(
            move |path: &str, buffer: &mut [u8], offset: u64, ctx: &FileContext| {
                f.read_file(path, buffer, offset, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.get_file_information = Some(Box::new(move |path: &str, ctx: &FileContext| {
            f.get_file_information(path, ctx)
        }));
        let f = Arc::clone(&fs);
        table.find_files = Some(Box::new(
            move |path: &str, ctx: &FileContext, sink: &mut dyn FnMut(FindData)| {
                f.find_files(path, ctx, sink)
            },
        ));
        let f = Arc::clone(&fs);
        table.find_files_with_pattern = Some(Box::new(
            move |path: &str, pattern: &str, ctx: &FileContext, sink: &mut dyn FnMut(FindData)| {
                f.find_files_with_pattern(path, pattern, ctx, sink)
            },
        ));
        let f = Arc::clone(&fs);
        table.lock_file = Some(Box::new(
            move |path: &str, offset: u64, length: u64, ctx: &FileContext| {
                f.lock_file(path, offset, length, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.unlock_file = Some(Box::new(
            move |path: &str, offset: u64, length: u64, ctx: &FileContext| {
                f.unlock_file(path, offset, length, ctx)
            },
        ));
        let f = Arc::clone(&fs);
        table.get_disk_free_space = Some(Box::new(move || f.get_disk_free_space()));
        let f = Arc::clone(&fs);
        table.get_volume_information = Some(Box::new(move || f.get_volume_information()));
        let f = Arc::clone(&fs);
        table.mounted = Some(Box::new(move || f.mounted()));
        let f = fs;
        table.unmounted = Some(Box::new(move || f.unmounted()));
        table
    }

    /// Names of the callbacks present in this table.
    pub fn implemented(&self) -> Vec<&'static str> {
        let slots: [(&'static str, bool); 22] = [
            ("create_file", self.create_file.is_some()),
            ("cleanup", self.cleanup.is_some()),
            ("close_file", self.close_file.is_some()),
            ("read_file", self.read_file.is_some()),
            ("write_file", self.write_file.is_some()),
            ("flush_file_buffers", self.flush_file_buffers.is_some()),
            ("get_file_information", self.get_file_information.is_some()),
            ("find_files", self.find_files.is_some()),
            ("find_files_with_pattern", self.find_files_with_pattern.is_some()),
            ("set_file_attributes", self.set_file_attributes.is_some()),
            ("set_file_time", self.set_file_time.is_some()),
            ("delete_file", self.delete_file.is_some()),
            ("delete_directory", self.delete_directory.is_some()),
            ("move_file", self.move_file.is_some()),
            ("set_end_of_file", self.set_end_of_file.is_some()),
            ("set_allocation_size", self.set_allocation_size.is_some()),
            ("lock_file", self.lock_file.is_some()),
            ("unlock_file", self.unlock_file.is_some()),
            ("get_disk_free_space", self.get_disk_free_space.is_some()),
            ("get_volume_information", self.get_volume_information.is_some()),
            ("mounted", self.mounted.is_some()),
            ("unmounted", self.unmounted.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect()
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTable")
            .field("implemented", &self.implemented())
            .finish()
    }
}
