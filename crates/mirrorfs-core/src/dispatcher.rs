// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The mirror provider and its driver callbacks.
//!
//! Every callback follows the same pattern: resolve the request path,
//! validate the handle carried by the context, take the path and data locks
//! the operation needs, perform the host call and translate the outcome to
//! an [`ErrorCode`]. No error escapes a callback any other way.

use std::fs::{self, FileTimes, Metadata};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::attributes::{derived_attributes, open_store, AttributeMapper, AttributeStore};
use crate::config::{MirrorConfig, VolumeConfig};
use crate::error::{FsError, FsResult};
use crate::handles::{FileIdentity, HandleTable, OpenFile, OpenOptions, OpenResource};
use crate::locks::{LockManager, LockMode};
use crate::mount::MountSignal;
use crate::path::MirroredPath;
use crate::range_locks::{LockRange, RangeLocks};
use crate::status::{ErrorCode, OpResult, StatusExt};
use crate::types::{
    DiskFreeSpace, FileAttributes, FileContext, FileInformation, FileTime, FindData, HandleId,
    VolumeInformation,
};

/// A user-mode file system that mirrors a host directory tree.
pub struct MirrorFs {
    root: PathBuf,
    volume: VolumeConfig,
    locks: LockManager,
    handles: HandleTable,
    range_locks: RangeLocks,
    attributes: AttributeMapper,
    lifecycle: Arc<MountSignal>,
}

/// A handle opened for a single read or write, closed on drop.
struct TransientHandle<'a> {
    handles: &'a HandleTable,
    id: HandleId,
}

impl Drop for TransientHandle<'_> {
    fn drop(&mut self) {
        self.handles.close(self.id);
    }
}

/// The open file an I/O callback works on, reopened on demand.
struct IoTarget<'a> {
    resource: Arc<OpenResource>,
    _transient: Option<TransientHandle<'a>>,
}

impl IoTarget<'_> {
    fn file(&self) -> OpResult<&OpenFile> {
        match self.resource.as_ref() {
            OpenResource::File(file) => Ok(file),
            OpenResource::Directory(_) => Err(ErrorCode::ACCESS_DENIED),
            OpenResource::Restricted(_) => Err(ErrorCode::FILE_CORRUPT),
        }
    }
}

fn file_time(time: io::Result<std::time::SystemTime>) -> FileTime {
    time.map(FileTime::from_system_time).unwrap_or(FileTime::ZERO)
}

/// Case-insensitive DOS wildcard match. `*.*` matches every name.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern.is_empty() || pattern == "*" || pattern == "*.*" {
        return true;
    }
    let name: Vec<char> = name.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    let (mut n, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, n));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            n = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

impl MirrorFs {
    /// Build a provider for `config.root` with the configured attribute store.
    pub fn new(config: &MirrorConfig) -> FsResult<Self> {
        let root = fs::canonicalize(&config.root)?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let store = open_store(config.attributes, &root)?;
        Ok(Self::with_root(root, config.volume.clone(), store))
    }

    /// Build a provider with an explicit attribute store.
    pub fn with_attribute_store(
        config: &MirrorConfig,
        store: Arc<dyn AttributeStore>,
    ) -> FsResult<Self> {
        let root = fs::canonicalize(&config.root)?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(Self::with_root(root, config.volume.clone(), store))
    }

    fn with_root(root: PathBuf, volume: VolumeConfig, store: Arc<dyn AttributeStore>) -> Self {
        info!(target: "mirrorfs", root = %root.display(), volume = %volume.name, "provider ready");
        Self {
            root,
            volume,
            locks: LockManager::new(),
            handles: HandleTable::new(),
            range_locks: RangeLocks::new(),
            attributes: AttributeMapper::new(store),
            lifecycle: Arc::new(MountSignal::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub(crate) fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub(crate) fn attributes(&self) -> &AttributeMapper {
        &self.attributes
    }

    /// Signal completed by [`MirrorFs::mounted`].
    pub fn mount_signal(&self) -> Arc<MountSignal> {
        Arc::clone(&self.lifecycle)
    }

    /// Number of handles currently registered.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Number of paths with live lock state.
    pub fn locked_paths(&self) -> usize {
        self.locks.tracked_paths()
    }

    fn resolve(&self, path: &str) -> OpResult<MirroredPath> {
        MirroredPath::resolve(&self.root, path).map_err(|_| {
            debug!(target: "mirrorfs", path, "rejected bad pathname");
            ErrorCode::BAD_PATHNAME
        })
    }

    fn require_handle(ctx: &FileContext) -> OpResult<HandleId> {
        if ctx.handle.is_none() {
            return Err(ErrorCode::INVALID_HANDLE);
        }
        Ok(ctx.handle)
    }

    /// The open file behind `ctx`, or a transient reopen of `path` when the
    /// handle is no longer in the table.
    fn io_target(
        &self,
        path: &MirroredPath,
        ctx: &FileContext,
        reopen: OpenOptions,
    ) -> OpResult<IoTarget<'_>> {
        let handle = Self::require_handle(ctx)?;
        if ctx.is_directory {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        if let Some(resource) = self.handles.get(handle) {
            return Ok(IoTarget {
                resource,
                _transient: None,
            });
        }

        debug!(target: "mirrorfs", %path, handle = handle.0, "handle missing, reopening");
        if reopen.write {
            let metadata = fs::symlink_metadata(path.host_path()).map_err(|err| {
                match FsError::from(err) {
                    FsError::NotFound => ErrorCode::FILE_NOT_FOUND,
                    other => ErrorCode::from_error(&other, ErrorCode::OPEN_FAILED),
                }
            })?;
            if self
                .visible_attributes(path.host_path(), &metadata)
                .contains(FileAttributes::READONLY)
            {
                return Err(ErrorCode::ACCESS_DENIED);
            }
        }
        let id = self.handles.open_file(path.host_path(), reopen).map_err(|err| match err {
            FsError::NotFound => ErrorCode::FILE_NOT_FOUND,
            other => ErrorCode::from_error(&other, ErrorCode::OPEN_FAILED),
        })?;
        let transient = TransientHandle {
            handles: &self.handles,
            id,
        };
        let resource = self.handles.get(id).ok_or(ErrorCode::INVALID_HANDLE)?;
        Ok(IoTarget {
            resource,
            _transient: Some(transient),
        })
    }

    /// The file registered under the context's handle; no reopen.
    fn registered_file(&self, ctx: &FileContext) -> OpResult<Arc<OpenResource>> {
        let handle = Self::require_handle(ctx)?;
        let resource = self.handles.get(handle).ok_or(ErrorCode::INVALID_HANDLE)?;
        match resource.as_ref() {
            OpenResource::File(_) => Ok(resource),
            OpenResource::Directory(_) => Err(ErrorCode::ACCESS_DENIED),
            OpenResource::Restricted(_) => Err(ErrorCode::FILE_CORRUPT),
        }
    }

    /// Attributes for display; a corrupt stored word falls back to what the
    /// host metadata alone says.
    fn visible_attributes(&self, host: &Path, metadata: &Metadata) -> FileAttributes {
        match self.attributes.read(host, metadata) {
            Ok(attributes) => attributes,
            Err(err) => {
                warn!(target: "mirrorfs", path = %host.display(), error = %err,
                    "unreadable attributes, reporting host attributes only");
                derived_attributes(metadata)
            }
        }
    }

    pub fn read_file(
        &self,
        path: &str,
        buffer: &mut [u8],
        offset: u64,
        ctx: &FileContext,
    ) -> OpResult<usize> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, offset, len = buffer.len(), "read_file");

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Shared);
        let target = self.io_target(&path, ctx, OpenOptions::read_only())?;
        let file = target.file()?;
        if !file.options.read {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        self.range_locks
            .check_access(file.identity, ctx.handle, LockRange::new(offset, buffer.len() as u64))
            .or_status(ErrorCode::READ_FAULT)?;

        let mut total = 0;
        while total < buffer.len() {
            match file.file.read_at(&mut buffer[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(target: "mirrorfs", %path, error = %err, "read failed");
                    return Err(ErrorCode::from_error(&FsError::from(err), ErrorCode::READ_FAULT));
                }
            }
        }
        Ok(total)
    }

    pub fn write_file(
        &self,
        path: &str,
        data: &[u8],
        offset: u64,
        ctx: &FileContext,
    ) -> OpResult<usize> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, offset, len = data.len(), "write_file");

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        let target = self.io_target(&path, ctx, OpenOptions::write_only())?;
        let file = target.file()?;
        if !file.options.write {
            return Err(ErrorCode::ACCESS_DENIED);
        }

        let offset = if ctx.write_to_end_of_file || file.options.append {
            file.file
                .metadata()
                .map(|m| m.len())
                .or_status(ErrorCode::WRITE_FAULT)?
        } else {
            offset
        };
        self.range_locks
            .check_access(file.identity, ctx.handle, LockRange::new(offset, data.len() as u64))
            .or_status(ErrorCode::WRITE_FAULT)?;

        file.file.write_all_at(data, offset).map_err(|err| {
            debug!(target: "mirrorfs", %path, error = %err, "write failed");
            ErrorCode::from_error(&FsError::from(err), ErrorCode::WRITE_FAULT)
        })?;
        Ok(data.len())
    }

    pub fn flush_file_buffers(&self, path: &str, ctx: &FileContext) -> OpResult<()> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, "flush_file_buffers");

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Shared);
        let resource = self.registered_file(ctx)?;
        let Some(file) = resource.as_file() else {
            return Err(ErrorCode::INVALID_HANDLE);
        };
        if !file.options.write {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        file.file.sync_data().or_status(ErrorCode::WRITE_FAULT)
    }

    pub fn get_file_information(&self, path: &str, ctx: &FileContext) -> OpResult<FileInformation> {
        let path = self.resolve(path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, "get_file_information");

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Shared);
        let metadata = fs::symlink_metadata(path.host_path())
            .or_status(ErrorCode::READ_FAULT)?;

        Ok(FileInformation {
            file_name: path.file_name().to_string(),
            attributes: self.visible_attributes(path.host_path(), &metadata),
            creation_time: file_time(metadata.created().or_else(|_| metadata.modified())),
            last_access_time: file_time(metadata.accessed()),
            last_write_time: file_time(metadata.modified()),
            file_size: if metadata.is_dir() { 0 } else { metadata.len() },
            volume_serial_number: self.volume.serial_number,
            file_index: metadata.ino(),
            number_of_links: u32::try_from(metadata.nlink()).unwrap_or(u32::MAX),
        })
    }

    pub fn find_files(
        &self,
        path: &str,
        ctx: &FileContext,
        sink: &mut dyn FnMut(FindData),
    ) -> OpResult<()> {
        self.find_files_with_pattern(path, "*", ctx, sink)
    }

    /// Enumerate the directory at `path`, feeding entries whose names match
    /// `pattern` to `sink`. Entries that vanish or cannot be probed are skipped.
    pub fn find_files_with_pattern(
        &self,
        path: &str,
        pattern: &str,
        ctx: &FileContext,
        sink: &mut dyn FnMut(FindData),
    ) -> OpResult<()> {
        let path = self.resolve(path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", %path, pattern, handle = ctx.handle.0, "find_files");
        if !ctx.is_directory {
            return Err(ErrorCode::DIRECTORY);
        }

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Shared);
        let entries = fs::read_dir(path.host_path()).map_err(|err| match FsError::from(err) {
            FsError::NotFound => ErrorCode::PATH_NOT_FOUND,
            FsError::NotADirectory => ErrorCode::DIRECTORY,
            other => {
                error!(target: "mirrorfs", %path, error = %other, "directory listing failed");
                ErrorCode::from_error(&other, ErrorCode::READ_FAULT)
            }
        })?;

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                debug!(target: "mirrorfs", %path, name = ?file_name, "skipping non-UTF-8 entry");
                continue;
            };
            if !matches_pattern(name, pattern) {
                continue;
            }
            let host = entry.path();
            let Ok(metadata) = fs::symlink_metadata(&host) else {
                continue;
            };
            sink(FindData {
                file_name: name.to_string(),
                attributes: self.visible_attributes(&host, &metadata),
                creation_time: file_time(metadata.created().or_else(|_| metadata.modified())),
                last_access_time: file_time(metadata.accessed()),
                last_write_time: file_time(metadata.modified()),
                file_size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        Ok(())
    }

    /// Make the settable attributes of `path` equal to `attributes`.
    ///
    /// A zero word is read the way `FILE_BASIC_INFORMATION` reads it: no
    /// change. It does not clear the settable flags; `NORMAL` does that.
    pub fn set_file_attributes(
        &self,
        path: &str,
        attributes: u32,
        ctx: &FileContext,
    ) -> OpResult<()> {
        let path = self.resolve(path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", %path, attributes, "set_file_attributes");
        if attributes == 0 {
            return Ok(());
        }

        let requested = FileAttributes::from_bits_truncate(attributes) & FileAttributes::SETTABLE;
        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        self.attributes
            .apply(path.host_path(), requested)
            .or_status(ErrorCode::WRITE_FAULT)
    }

    /// Update access and write times. Zero values are left unchanged; the
    /// host cannot set creation time.
    pub fn set_file_time(
        &self,
        path: &str,
        creation: FileTime,
        last_access: FileTime,
        last_write: FileTime,
        ctx: &FileContext,
    ) -> OpResult<()> {
        let path = self.resolve(path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", %path, ?creation, ?last_access, ?last_write, "set_file_time");

        let mut times = FileTimes::new();
        let mut changed = false;
        if let Some(accessed) = last_access.to_system_time() {
            times = times.set_accessed(accessed);
            changed = true;
        }
        if let Some(modified) = last_write.to_system_time() {
            times = times.set_modified(modified);
            changed = true;
        }

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        if !changed {
            return fs::symlink_metadata(path.host_path())
                .map(|_| ())
                .or_status(ErrorCode::WRITE_FAULT);
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(path.host_path())
            .or_status(ErrorCode::WRITE_FAULT)?;
        file.set_times(times)
            .or_status(ErrorCode::WRITE_FAULT)
    }

    /// Check that the file at `path` may be deleted. Removal happens in
    /// [`MirrorFs::cleanup`] once the driver marks the context delete-on-close.
    pub fn delete_file(&self, path: &str, ctx: &FileContext) -> OpResult<()> {
        let path = self.resolve(path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, "delete_file");
        if ctx.is_directory {
            return Err(ErrorCode::ACCESS_DENIED);
        }

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Exclusive);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        self.check_file_deletable(path.host_path(), ctx.handle)
    }

    fn check_file_deletable(&self, host: &Path, own: HandleId) -> OpResult<()> {
        let metadata = fs::symlink_metadata(host).map_err(|err| match FsError::from(err) {
            FsError::NotFound => ErrorCode::FILE_NOT_FOUND,
            other => ErrorCode::from_error(&other, ErrorCode::GEN_FAILURE),
        })?;
        if metadata.is_dir() {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        if self
            .visible_attributes(host, &metadata)
            .contains(FileAttributes::READONLY)
        {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        if !self.handles.is_deletable(FileIdentity::of(&metadata), own) {
            return Err(ErrorCode::BUSY);
        }
        Ok(())
    }

    /// Check that the directory at `path` may be deleted.
    pub fn delete_directory(&self, path: &str, ctx: &FileContext) -> OpResult<()> {
        let path = self.resolve(path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, "delete_directory");
        if !ctx.is_directory || path.is_root() {
            return Err(ErrorCode::ACCESS_DENIED);
        }

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Exclusive);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        self.check_directory_deletable(path.host_path())
    }

    fn check_directory_deletable(&self, host: &Path) -> OpResult<()> {
        let metadata = fs::symlink_metadata(host).map_err(|err| match FsError::from(err) {
            FsError::NotFound => ErrorCode::PATH_NOT_FOUND,
            other => ErrorCode::from_error(&other, ErrorCode::CURRENT_DIRECTORY),
        })?;
        if !metadata.is_dir() {
            return Err(ErrorCode::DIRECTORY);
        }
        if self
            .visible_attributes(host, &metadata)
            .contains(FileAttributes::READONLY)
        {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        let mut entries = fs::read_dir(host).map_err(|err| match FsError::from(err) {
            FsError::NotFound => ErrorCode::PATH_NOT_FOUND,
            _ => ErrorCode::CURRENT_DIRECTORY,
        })?;
        if entries.next().is_some() {
            return Err(ErrorCode::DIR_NOT_EMPTY);
        }
        Ok(())
    }

    /// Release the context's handle and perform a pending delete.
    pub fn cleanup(&self, path: &str, ctx: &mut FileContext) {
        trace!(target: "mirrorfs", path, handle = ctx.handle.0, delete = ctx.delete_on_close, "cleanup");
        if !ctx.handle.is_none() {
            self.handles.close(ctx.handle);
            self.range_locks.release_handle(ctx.handle);
        }
        if !ctx.delete_on_close {
            return;
        }
        let Ok(path) = self.resolve(path) else {
            return;
        };
        if path.is_root() {
            return;
        }

        let path_lock = self.locks.acquire_path_lock(&path, LockMode::Exclusive);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        let host = path.host_path();
        let removed = if ctx.is_directory {
            self.check_directory_deletable(host)
                .and_then(|()| fs::remove_dir(host).or_status(ErrorCode::GEN_FAILURE))
        } else {
            self.check_file_deletable(host, HandleId::NONE)
                .and_then(|()| fs::remove_file(host).or_status(ErrorCode::GEN_FAILURE))
        };
        match removed {
            Ok(()) => {
                if let Err(err) = self.attributes.forget(host) {
                    debug!(target: "mirrorfs", %path, error = %err, "dropping stored attributes failed");
                }
                debug!(target: "mirrorfs", %path, "deleted on close");
            }
            Err(status) => {
                debug!(target: "mirrorfs", %path, %status, "delete on close skipped");
            }
        }
    }

    /// Final release of a context. Closes a handle the driver never cleaned up.
    pub fn close_file(&self, path: &str, ctx: &mut FileContext) {
        trace!(target: "mirrorfs", path, handle = ctx.handle.0, "close_file");
        if !ctx.handle.is_none() && self.handles.close(ctx.handle) {
            self.range_locks.release_handle(ctx.handle);
            warn!(target: "mirrorfs", path, handle = ctx.handle.0, "handle closed without cleanup");
        }
        ctx.handle = HandleId::NONE;
    }

    /// Rename `path` to `new_path`, replacing an existing target only when
    /// `replace_if_existing` is set.
    pub fn move_file(
        &self,
        path: &str,
        new_path: &str,
        replace_if_existing: bool,
        ctx: &FileContext,
    ) -> OpResult<()> {
        let source = self.resolve(path)?;
        let target = self.resolve(new_path)?;
        Self::require_handle(ctx)?;
        trace!(target: "mirrorfs", from = %source, to = %target, replace_if_existing, "move_file");
        if source.is_root() || target.is_root() {
            return Err(ErrorCode::ACCESS_DENIED);
        }

        let _held = self.locks.acquire_move_locks(&source, &target);
        let source_metadata = fs::symlink_metadata(source.host_path())
            .or_status(ErrorCode::GEN_FAILURE)?;
        if source.lock_key() != target.lock_key() {
            match fs::symlink_metadata(target.host_path()) {
                Ok(existing) => {
                    if !replace_if_existing {
                        return Err(ErrorCode::FILE_EXISTS);
                    }
                    self.clear_replaced_target(&target, &existing, &source_metadata)?;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(ErrorCode::from_error(&FsError::from(err), ErrorCode::GEN_FAILURE))
                }
            }
        }

        fs::rename(source.host_path(), target.host_path()).map_err(|err| {
            debug!(target: "mirrorfs", from = %source, to = %target, error = %err, "rename failed");
            match FsError::from(err) {
                FsError::NotFound => ErrorCode::PATH_NOT_FOUND,
                other => ErrorCode::from_error(&other, ErrorCode::GEN_FAILURE),
            }
        })?;
        if let Err(err) = self.attributes.moved(source.host_path(), target.host_path()) {
            warn!(target: "mirrorfs", from = %source, to = %target, error = %err,
                "stored attributes did not follow the rename");
        }
        Ok(())
    }

    /// Make room for a replacing rename. Files and empty directories can be
    /// replaced; a directory never replaces a file.
    fn clear_replaced_target(
        &self,
        target: &MirroredPath,
        existing: &Metadata,
        source: &Metadata,
    ) -> OpResult<()> {
        if !existing.is_dir() {
            return if source.is_dir() {
                Err(ErrorCode::ACCESS_DENIED)
            } else {
                Ok(())
            };
        }
        let mut entries = fs::read_dir(target.host_path()).or_status(ErrorCode::GEN_FAILURE)?;
        if entries.next().is_some() {
            return Err(ErrorCode::DIR_NOT_EMPTY);
        }
        debug!(target: "mirrorfs", %target, "replacing empty directory");
        if !source.is_dir() {
            // rename(2) only swaps a directory for a directory.
            fs::remove_dir(target.host_path()).or_status(ErrorCode::GEN_FAILURE)?;
        }
        Ok(())
    }

    pub fn set_end_of_file(&self, path: &str, length: u64, ctx: &FileContext) -> OpResult<()> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, length, "set_end_of_file");
        self.truncate(&path, length, ctx)
    }

    /// Allocation is not tracked separately; the file is cut or extended to `length`.
    pub fn set_allocation_size(&self, path: &str, length: u64, ctx: &FileContext) -> OpResult<()> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, length, "set_allocation_size");
        self.truncate(&path, length, ctx)
    }

    fn truncate(&self, path: &MirroredPath, length: u64, ctx: &FileContext) -> OpResult<()> {
        let path_lock = self.locks.acquire_path_lock(path, LockMode::Shared);
        let _data = path_lock.lock_data(LockMode::Exclusive);
        let resource = self.registered_file(ctx)?;
        let Some(file) = resource.as_file() else {
            return Err(ErrorCode::INVALID_HANDLE);
        };
        if !file.options.write {
            return Err(ErrorCode::ACCESS_DENIED);
        }
        file.file
            .set_len(length)
            .or_status(ErrorCode::WRITE_FAULT)
    }

    pub fn lock_file(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        ctx: &FileContext,
    ) -> OpResult<()> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, offset, length, "lock_file");
        let resource = self.registered_file(ctx)?;
        let identity = resource.as_file().map(|f| f.identity).ok_or(ErrorCode::INVALID_HANDLE)?;
        self.range_locks
            .lock(identity, ctx.handle, LockRange::new(offset, length))
            .or_status(ErrorCode::LOCK_VIOLATION)
    }

    pub fn unlock_file(
        &self,
        path: &str,
        offset: u64,
        length: u64,
        ctx: &FileContext,
    ) -> OpResult<()> {
        let path = self.resolve(path)?;
        trace!(target: "mirrorfs", %path, handle = ctx.handle.0, offset, length, "unlock_file");
        let resource = self.registered_file(ctx)?;
        let identity = resource.as_file().map(|f| f.identity).ok_or(ErrorCode::INVALID_HANDLE)?;
        self.range_locks
            .unlock(identity, ctx.handle, LockRange::new(offset, length))
            .or_status(ErrorCode::NOT_LOCKED)
    }

    pub fn get_disk_free_space(&self) -> OpResult<DiskFreeSpace> {
        let stats = nix::sys::statvfs::statvfs(&self.root).map_err(|err| {
            debug!(target: "mirrorfs", error = %err, "statvfs failed");
            ErrorCode::READ_FAULT
        })?;
        let unit = u64::from(stats.fragment_size());
        Ok(DiskFreeSpace {
            free_bytes_available: u64::from(stats.blocks_available()).saturating_mul(unit),
            total_bytes: u64::from(stats.blocks()).saturating_mul(unit),
            total_free_bytes: u64::from(stats.blocks_free()).saturating_mul(unit),
        })
    }

    pub fn get_volume_information(&self) -> OpResult<VolumeInformation> {
        Ok(VolumeInformation {
            volume_name: self.volume.name.clone(),
            serial_number: self.volume.serial_number,
            max_component_length: self.volume.max_component_length,
            file_system_flags: self.volume.file_system_flags,
            file_system_name: self.volume.file_system_name.clone(),
        })
    }

    pub fn mounted(&self) -> OpResult<()> {
        info!(target: "mirrorfs", root = %self.root.display(), "mounted");
        self.lifecycle.notify_mounted();
        Ok(())
    }

    pub fn unmounted(&self) -> OpResult<()> {
        info!(target: "mirrorfs", root = %self.root.display(), "unmounted");
        self.lifecycle.notify_unmounted();
        Ok(())
    }
}
