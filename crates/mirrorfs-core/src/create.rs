// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Create/open state machine.
//!
//! Every create request passes through three phases: an unlocked probe of
//! the target, an exclusive lock on both tiers of the target path, and then
//! either the directory branch or the file branch. Handles are only ever
//! minted here.

use std::fs::{self, Metadata};
use std::io;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::dispatcher::MirrorFs;
use crate::error::FsError;
use crate::handles::OpenOptions;
use crate::locks::LockMode;
use crate::path::MirroredPath;
use crate::status::{ErrorCode, OpResult};
use crate::types::{
    AccessMask, CreateOptions, CreationDisposition, FileAttributes, FileContext, HandleId,
    ShareAccess,
};

/// A decoded create request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateRequest {
    pub desired_access: AccessMask,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub disposition: CreationDisposition,
    pub create_options: CreateOptions,
}

impl CreateRequest {
    pub fn new(disposition: CreationDisposition) -> Self {
        Self {
            desired_access: AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
            file_attributes: FileAttributes::NORMAL,
            share_access: ShareAccess::all(),
            disposition,
            create_options: CreateOptions::NON_DIRECTORY_FILE,
        }
    }

    /// A directory request with the given disposition.
    pub fn directory(disposition: CreationDisposition) -> Self {
        Self {
            desired_access: AccessMask::GENERIC_READ,
            file_attributes: FileAttributes::empty(),
            share_access: ShareAccess::all(),
            disposition,
            create_options: CreateOptions::DIRECTORY_FILE,
        }
    }

    /// Decode the raw values the driver delivers with a kernel create.
    pub fn from_kernel(
        desired_access: u32,
        file_attributes: u32,
        share_access: u32,
        disposition: u32,
        create_options: u32,
    ) -> OpResult<Self> {
        let disposition =
            CreationDisposition::from_kernel(disposition).ok_or(ErrorCode::INVALID_PARAMETER)?;
        Ok(Self {
            desired_access: AccessMask::from_bits_retain(desired_access),
            file_attributes: FileAttributes::from_bits_truncate(file_attributes),
            share_access: ShareAccess::from_bits_truncate(share_access),
            disposition,
            create_options: CreateOptions::from_bits_retain(create_options),
        })
    }

    pub fn with_access(mut self, access: AccessMask) -> Self {
        self.desired_access = access;
        self
    }

    pub fn with_attributes(mut self, attributes: FileAttributes) -> Self {
        self.file_attributes = attributes;
        self
    }

    pub fn with_share(mut self, share: ShareAccess) -> Self {
        self.share_access = share;
        self
    }

    pub fn with_options(mut self, options: CreateOptions) -> Self {
        self.create_options = options;
        self
    }

    /// Whether serving this request could change the mirror. Settable
    /// attributes count even on plain opens since directory opens store them.
    pub fn modifies(&self) -> bool {
        self.disposition.creates()
            || self.disposition.truncates()
            || self.desired_access.wants_write()
            || self.create_options.contains(CreateOptions::DELETE_ON_CLOSE)
            || self.file_attributes.intersects(FileAttributes::SETTABLE)
    }

    fn wants_directory(&self) -> bool {
        self.create_options.contains(CreateOptions::DIRECTORY_FILE)
    }

    /// Host open options for a file request, given whether the target exists.
    pub fn open_options(&self, exists: bool, write_to_end_of_file: bool) -> OpenOptions {
        let truncate = exists && self.disposition.truncates();
        let mut read = self.desired_access.wants_read();
        let mut write = self.desired_access.wants_write() || truncate;
        if !read && !write {
            read = true;
        }
        if truncate {
            write = true;
        }
        OpenOptions {
            read,
            write,
            create: !exists
                && matches!(
                    self.disposition,
                    CreationDisposition::CreateAlways | CreationDisposition::OpenAlways
                ),
            create_new: self.disposition == CreationDisposition::CreateNew,
            truncate,
            append: write_to_end_of_file,
            sync: self.create_options.intersects(
                CreateOptions::WRITE_THROUGH | CreateOptions::NO_INTERMEDIATE_BUFFERING,
            ),
            sparse: self.file_attributes.contains(FileAttributes::SPARSE_FILE),
            share: self.share_access,
        }
    }
}

/// Result of a create request.
///
/// `ALREADY_EXISTS` counts as success: an existing target was opened with a
/// disposition that would otherwise have created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateOutcome {
    pub status: ErrorCode,
    pub handle: HandleId,
    pub is_directory: bool,
}

impl CreateOutcome {
    pub fn failed(status: ErrorCode) -> Self {
        Self {
            status,
            handle: HandleId::NONE,
            is_directory: false,
        }
    }

    fn opened(status: ErrorCode, handle: HandleId, is_directory: bool) -> Self {
        Self {
            status,
            handle,
            is_directory,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ErrorCode::SUCCESS | ErrorCode::ALREADY_EXISTS)
    }
}

fn probe(path: &MirroredPath) -> io::Result<Option<Metadata>> {
    match fs::symlink_metadata(path.host_path()) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(err)
            if err.kind() == io::ErrorKind::NotFound
                || err.raw_os_error() == Some(libc::ENOTDIR) =>
        {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl MirrorFs {
    /// Open or create `path`. On success the context carries the new handle
    /// and whether it refers to a directory.
    pub fn create_file(
        &self,
        path: &str,
        request: &CreateRequest,
        ctx: &mut FileContext,
    ) -> CreateOutcome {
        let Ok(path) = MirroredPath::resolve(self.root(), path) else {
            debug!(target: "mirrorfs::create", path, "rejected bad pathname");
            return CreateOutcome::failed(ErrorCode::BAD_PATHNAME);
        };
        trace!(target: "mirrorfs::create", %path, disposition = ?request.disposition, "create_file");

        if request.create_options.contains(CreateOptions::DELETE_ON_CLOSE) {
            ctx.delete_on_close = true;
        }
        let outcome = self.create_resolved(&path, request, ctx);
        ctx.handle = outcome.handle;
        if outcome.is_success() {
            ctx.is_directory = outcome.is_directory;
        }
        debug!(target: "mirrorfs::create", %path, handle = outcome.handle.0, status = %outcome.status, "create_file done");
        outcome
    }

    fn create_resolved(
        &self,
        path: &MirroredPath,
        request: &CreateRequest,
        ctx: &FileContext,
    ) -> CreateOutcome {
        let directory_hint = ctx.is_directory || request.wants_directory();
        if directory_hint && request.create_options.contains(CreateOptions::NON_DIRECTORY_FILE) {
            return CreateOutcome::failed(ErrorCode::INVALID_PARAMETER);
        }

        let probed = match probe(path) {
            Ok(probed) => probed,
            Err(err) => {
                debug!(target: "mirrorfs::create", %path, error = %err, "probe failed");
                return CreateOutcome::failed(ErrorCode::IO_DEVICE);
            }
        };

        let mut is_directory = directory_hint;
        if let Some(metadata) = &probed {
            let file_type = metadata.file_type();
            if file_type.is_dir() {
                if request.create_options.contains(CreateOptions::NON_DIRECTORY_FILE) {
                    debug!(target: "mirrorfs::create", %path, "directory cannot be opened as a file");
                    return CreateOutcome::failed(ErrorCode::INVALID_DATA);
                }
                is_directory = true;
            } else if file_type.is_file() {
                if directory_hint {
                    debug!(target: "mirrorfs::create", %path, "file cannot be opened as a directory");
                    return CreateOutcome::failed(ErrorCode::DIRECTORY);
                }
            } else {
                return CreateOutcome::failed(ErrorCode::CANT_ACCESS_FILE);
            }
        }

        let path_lock = self.locks().acquire_path_lock(path, LockMode::Exclusive);
        let _data_lock = path_lock.lock_data(LockMode::Exclusive);
        if is_directory {
            self.create_directory_locked(path, request)
        } else {
            self.create_regular_locked(path, request, ctx)
        }
    }

    fn create_directory_locked(
        &self,
        path: &MirroredPath,
        request: &CreateRequest,
    ) -> CreateOutcome {
        let host = path.host_path();
        let mut created = false;
        if matches!(
            request.disposition,
            CreationDisposition::CreateNew | CreationDisposition::OpenAlways
        ) {
            match fs::create_dir(host) {
                Ok(()) => {
                    trace!(target: "mirrorfs::create", %path, "directory created");
                    created = true;
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if request.disposition == CreationDisposition::CreateNew {
                        return CreateOutcome::failed(ErrorCode::FILE_EXISTS);
                    }
                }
                Err(err) => {
                    debug!(target: "mirrorfs::create", %path, error = %err, "directory creation failed");
                    return CreateOutcome::failed(ErrorCode::CANNOT_MAKE);
                }
            }
        }

        if fs::symlink_metadata(host).is_ok_and(|m| m.is_file()) {
            return CreateOutcome::failed(ErrorCode::ACCESS_DENIED);
        }

        let settable = request.file_attributes & FileAttributes::SETTABLE;
        if created || !settable.is_empty() {
            if let Err(err) = self.attributes().apply(host, request.file_attributes) {
                debug!(target: "mirrorfs::create", %path, error = %err, "applying directory attributes failed");
                return CreateOutcome::failed(match err {
                    FsError::NotFound => ErrorCode::PATH_NOT_FOUND,
                    other => ErrorCode::from_error(&other, ErrorCode::OPEN_FAILED),
                });
            }
        }

        match self.handles().open_directory(host) {
            Ok(handle) => {
                let status = if !created && request.disposition == CreationDisposition::OpenAlways {
                    ErrorCode::ALREADY_EXISTS
                } else {
                    ErrorCode::SUCCESS
                };
                CreateOutcome::opened(status, handle, true)
            }
            Err(FsError::NotFound | FsError::NotADirectory) => {
                CreateOutcome::failed(ErrorCode::PATH_NOT_FOUND)
            }
            Err(err) => {
                debug!(target: "mirrorfs::create", %path, error = %err, "opening directory failed");
                CreateOutcome::failed(ErrorCode::OPEN_FAILED)
            }
        }
    }

    fn create_regular_locked(
        &self,
        path: &MirroredPath,
        request: &CreateRequest,
        ctx: &FileContext,
    ) -> CreateOutcome {
        let host = path.host_path();
        // Re-probe under the lock; the unlocked probe may be stale.
        let existing = match probe(path) {
            Ok(existing) => existing,
            Err(_) => return CreateOutcome::failed(ErrorCode::IO_DEVICE),
        };
        if existing.as_ref().is_some_and(|m| m.is_dir()) {
            return CreateOutcome::failed(ErrorCode::ACCESS_DENIED);
        }

        let existing_attributes = match &existing {
            Some(metadata) => match self.attributes().read(host, metadata) {
                Ok(attributes) => Some(attributes),
                Err(FsError::Corrupt(reason)) => return self.open_restricted(path, &reason),
                Err(err) => {
                    debug!(target: "mirrorfs::create", %path, error = %err, "reading attributes failed");
                    return CreateOutcome::failed(ErrorCode::OPEN_FAILED);
                }
            },
            None => None,
        };

        if let Some(current) = existing_attributes {
            let protected = |flag: FileAttributes| {
                current.contains(flag) && !request.file_attributes.contains(flag)
            };
            if request.disposition.truncates()
                && (protected(FileAttributes::HIDDEN) || protected(FileAttributes::SYSTEM))
            {
                debug!(target: "mirrorfs::create", %path, "refusing to overwrite hidden or system file");
                return CreateOutcome::failed(ErrorCode::ACCESS_DENIED);
            }
        }
        let read_only = existing_attributes.is_some_and(|a| a.contains(FileAttributes::READONLY))
            || request.file_attributes.contains(FileAttributes::READONLY);
        if read_only && ctx.delete_on_close {
            return CreateOutcome::failed(ErrorCode::FILE_READ_ONLY);
        }
        if existing_attributes.is_some_and(|a| a.contains(FileAttributes::READONLY))
            && (request.disposition.truncates() || request.desired_access.wants_write())
        {
            debug!(target: "mirrorfs::create", %path, "refusing to modify read-only file");
            return CreateOutcome::failed(ErrorCode::ACCESS_DENIED);
        }

        let exists = existing.is_some();
        let options = request.open_options(exists, ctx.write_to_end_of_file);
        let handle = match self.handles().open_file(host, options) {
            Ok(handle) => handle,
            Err(FsError::Corrupt(reason)) if exists => return self.open_restricted(path, &reason),
            Err(err) => {
                debug!(target: "mirrorfs::create", %path, error = %err, "open failed");
                return CreateOutcome::failed(match err {
                    FsError::NotFound if !host.parent().is_some_and(Path::is_dir) => {
                        ErrorCode::PATH_NOT_FOUND
                    }
                    FsError::NotFound => ErrorCode::FILE_NOT_FOUND,
                    FsError::PathNotFound | FsError::NotADirectory => ErrorCode::PATH_NOT_FOUND,
                    FsError::AlreadyExists => ErrorCode::FILE_EXISTS,
                    FsError::AccessDenied | FsError::IsADirectory => ErrorCode::ACCESS_DENIED,
                    _ if exists => ErrorCode::OPEN_FAILED,
                    _ => ErrorCode::CANNOT_MAKE,
                });
            }
        };

        // Attributes only apply when the file is created or overwritten.
        if !exists || request.disposition.truncates() {
            let applied = self
                .attributes()
                .apply(host, request.file_attributes)
                .and_then(|()| {
                    if options.sparse {
                        self.attributes().set_sparse(host, true)
                    } else {
                        Ok(())
                    }
                });
            if let Err(err) = applied {
                debug!(target: "mirrorfs::create", %path, error = %err, "applying attributes failed");
                self.handles().close(handle);
                let fallback = if exists { ErrorCode::OPEN_FAILED } else { ErrorCode::CANNOT_MAKE };
                return CreateOutcome::failed(ErrorCode::from_error(&err, fallback));
            }
        }

        let status = if exists
            && matches!(
                request.disposition,
                CreationDisposition::OpenAlways | CreationDisposition::CreateAlways
            ) {
            ErrorCode::ALREADY_EXISTS
        } else {
            ErrorCode::SUCCESS
        };
        CreateOutcome::opened(status, handle, false)
    }

    fn open_restricted(&self, path: &MirroredPath, reason: &str) -> CreateOutcome {
        let handle = self.handles().open_restricted(path.host_path());
        warn!(target: "mirrorfs::create", %path, handle = handle.0, reason,
            "metadata appears modified on disk; opened in restricted mode");
        CreateOutcome::opened(ErrorCode::FILE_CORRUPT, handle, false)
    }
}
