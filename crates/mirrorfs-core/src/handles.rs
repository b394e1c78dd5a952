// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Opaque handle table for open files and directories

use std::fs::{self, File};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::error::{FsError, FsResult};
use crate::types::{HandleId, ShareAccess};

/// Host open options derived from a create request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    /// Writes land at end of file regardless of offset.
    pub append: bool,
    /// Writes reach stable storage before returning.
    pub sync: bool,
    pub sparse: bool,
    pub share: ShareAccess,
}

impl OpenOptions {
    /// Minimal access for a transient reopen.
    pub fn read_only() -> Self {
        Self {
            read: true,
            share: ShareAccess::all(),
            ..Self::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            share: ShareAccess::all(),
            ..Self::default()
        }
    }

    fn to_host(self) -> fs::OpenOptions {
        let mut host = fs::OpenOptions::new();
        // The host refuses to create or truncate through a read-only descriptor.
        host.read(self.read)
            .write(self.write || self.truncate || self.create || self.create_new)
            .truncate(self.truncate)
            .create(self.create)
            .create_new(self.create_new);
        let mut flags = libc::O_NOFOLLOW;
        if self.sync {
            flags |= libc::O_SYNC;
        }
        host.custom_flags(flags);
        host
    }
}

/// Host identity of an open object, stable across renames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    pub fn of(metadata: &fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

#[derive(Debug)]
pub struct OpenFile {
    pub path: PathBuf,
    pub file: File,
    pub options: OpenOptions,
    pub identity: FileIdentity,
}

#[derive(Debug)]
pub struct OpenDirectory {
    pub path: PathBuf,
    pub dir: File,
    pub identity: FileIdentity,
}

/// Metadata-only handle issued when a target's stored metadata is corrupt.
#[derive(Debug)]
pub struct RestrictedFile {
    pub path: PathBuf,
}

#[derive(Debug)]
pub enum OpenResource {
    File(OpenFile),
    Directory(OpenDirectory),
    Restricted(RestrictedFile),
}

impl OpenResource {
    pub fn path(&self) -> &Path {
        match self {
            OpenResource::File(f) => &f.path,
            OpenResource::Directory(d) => &d.path,
            OpenResource::Restricted(r) => &r.path,
        }
    }

    pub fn as_file(&self) -> Option<&OpenFile> {
        match self {
            OpenResource::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, OpenResource::Restricted(_))
    }
}

/// Map from handle id to open resource.
///
/// Lookups return a shared reference, so a close racing with an in-flight
/// read only drops the table's entry; the host descriptor is released once
/// the last reader finishes with it.
pub struct HandleTable {
    handles: DashMap<HandleId, Arc<OpenResource>>,
    next_handle: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_handle: AtomicU64::new(1), // 0 is "no handle"
        }
    }

    fn insert(&self, resource: OpenResource) -> HandleId {
        let id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        trace!(target: "mirrorfs::handles", handle = id.0, path = %resource.path().display(),
            "registered");
        self.handles.insert(id, Arc::new(resource));
        id
    }

    /// Open (and possibly create) a regular file on the host.
    pub fn open_file(&self, path: &Path, options: OpenOptions) -> FsResult<HandleId> {
        let file = options.to_host().open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(FsError::CannotAccess);
        }
        Ok(self.insert(OpenResource::File(OpenFile {
            path: path.to_path_buf(),
            file,
            options,
            identity: FileIdentity::of(&metadata),
        })))
    }

    pub fn open_directory(&self, path: &Path) -> FsResult<HandleId> {
        let dir = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY | libc::O_NOFOLLOW)
            .open(path)?;
        let metadata = dir.metadata()?;
        Ok(self.insert(OpenResource::Directory(OpenDirectory {
            path: path.to_path_buf(),
            dir,
            identity: FileIdentity::of(&metadata),
        })))
    }

    pub fn open_restricted(&self, path: &Path) -> HandleId {
        self.insert(OpenResource::Restricted(RestrictedFile {
            path: path.to_path_buf(),
        }))
    }

    pub fn get(&self, id: HandleId) -> Option<Arc<OpenResource>> {
        self.handles.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn exists(&self, id: HandleId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Remove a handle. Returns false if it was already gone.
    pub fn close(&self, id: HandleId) -> bool {
        let removed = self.handles.remove(&id).is_some();
        if removed {
            trace!(target: "mirrorfs::handles", handle = id.0, "closed");
        }
        removed
    }

    /// Whether the object identified by `identity` may be deleted, given the
    /// share modes of every other open file on it.
    pub fn is_deletable(&self, identity: FileIdentity, except: HandleId) -> bool {
        !self.handles.iter().any(|entry| {
            *entry.key() != except
                && entry.value().as_file().is_some_and(|f| {
                    f.identity == identity && !f.options.share.contains(ShareAccess::DELETE)
                })
        })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
