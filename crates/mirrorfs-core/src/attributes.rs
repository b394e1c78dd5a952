// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Translation between host metadata and driver attribute bits.
//!
//! The host has no hidden, system or archive bits. Those, the sparse flag
//! and the read-only flag of directories are kept in an [`AttributeStore`]
//! as one little-endian 32-bit word per path. The read-only flag of regular
//! files maps onto the host write permission bits so host tools see it.

use std::fs::{self, Metadata};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::AttributeStoreMode;
use crate::error::{FsError, FsResult};
use crate::types::FileAttributes;

/// Extended attribute holding the stored word.
pub const XATTR_NAME: &str = "user.mirrorfs.attributes";

/// Bits that may appear in a stored word.
const STORED: FileAttributes = FileAttributes::HIDDEN
    .union(FileAttributes::SYSTEM)
    .union(FileAttributes::ARCHIVE)
    .union(FileAttributes::SPARSE_FILE)
    .union(FileAttributes::READONLY);

/// Raw per-path storage for the attribute word.
#[cfg_attr(test, mockall::automock)]
pub trait AttributeStore: Send + Sync {
    fn load(&self, path: &Path) -> FsResult<Option<Vec<u8>>>;
    fn store(&self, path: &Path, raw: &[u8]) -> FsResult<()>;
    /// Forget `path` and, for directories, everything below it.
    fn remove(&self, path: &Path) -> FsResult<()>;
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;
}

/// Attribute words kept in an in-process table.
#[derive(Default)]
pub struct MemoryStore {
    words: DashMap<PathBuf, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeStore for MemoryStore {
    fn load(&self, path: &Path) -> FsResult<Option<Vec<u8>>> {
        Ok(self.words.get(path).map(|word| word.value().clone()))
    }

    fn store(&self, path: &Path, raw: &[u8]) -> FsResult<()> {
        self.words.insert(path.to_path_buf(), raw.to_vec());
        Ok(())
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        self.words.retain(|key, _| !key.starts_with(path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let moved: Vec<PathBuf> = self
            .words
            .iter()
            .filter(|entry| entry.key().starts_with(from))
            .map(|entry| entry.key().clone())
            .collect();
        // Anything previously stored at the target is replaced.
        self.words.retain(|key, _| !key.starts_with(to) || key.starts_with(from));
        for old in moved {
            if let Some((_, word)) = self.words.remove(&old) {
                let suffix = old.strip_prefix(from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(suffix)
                };
                self.words.insert(new, word);
            }
        }
        Ok(())
    }
}

/// Attribute words kept in a user extended attribute. They travel with the
/// inode, so rename and delete need no bookkeeping.
#[derive(Default)]
pub struct XattrStore;

#[cfg(target_os = "linux")]
mod xattr_sys {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use super::XATTR_NAME;
    use crate::error::{FsError, FsResult};

    fn c_path(path: &Path) -> FsResult<CString> {
        CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::BadPathname)
    }

    fn c_name() -> CString {
        CString::new(XATTR_NAME).unwrap_or_default()
    }

    pub fn get(path: &Path) -> FsResult<Option<Vec<u8>>> {
        let path = c_path(path)?;
        let name = c_name();
        let mut buf = [0u8; 16];
        // SAFETY: both strings are NUL-terminated and `buf` outlives the call.
        let len = unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if len < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENODATA) => Ok(None),
                Some(libc::ERANGE) => Err(FsError::Corrupt("oversized attribute word".into())),
                _ => Err(err.into()),
            };
        }
        Ok(Some(buf[..len as usize].to_vec()))
    }

    pub fn set(path: &Path, raw: &[u8]) -> FsResult<()> {
        let path = c_path(path)?;
        let name = c_name();
        // SAFETY: both strings are NUL-terminated and `raw` outlives the call.
        let rc = unsafe {
            libc::lsetxattr(path.as_ptr(), name.as_ptr(), raw.as_ptr().cast(), raw.len(), 0)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn probe(path: &Path) -> FsResult<()> {
        match get(path) {
            Ok(_) | Err(FsError::Corrupt(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod xattr_sys {
    use std::path::Path;

    use crate::error::{FsError, FsResult};

    pub fn get(_path: &Path) -> FsResult<Option<Vec<u8>>> {
        Err(FsError::Unsupported)
    }

    pub fn set(_path: &Path, _raw: &[u8]) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    pub fn probe(_path: &Path) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
}

impl XattrStore {
    /// Check that `root` accepts user extended attributes.
    pub fn probe(root: &Path) -> FsResult<Self> {
        xattr_sys::probe(root)?;
        Ok(Self)
    }
}

impl AttributeStore for XattrStore {
    fn load(&self, path: &Path) -> FsResult<Option<Vec<u8>>> {
        xattr_sys::get(path)
    }

    fn store(&self, path: &Path, raw: &[u8]) -> FsResult<()> {
        xattr_sys::set(path, raw)
    }

    fn remove(&self, _path: &Path) -> FsResult<()> {
        Ok(())
    }

    fn rename(&self, _from: &Path, _to: &Path) -> FsResult<()> {
        Ok(())
    }
}

/// Build the store selected by configuration.
pub fn open_store(mode: AttributeStoreMode, root: &Path) -> FsResult<Arc<dyn AttributeStore>> {
    match mode {
        AttributeStoreMode::Memory => Ok(Arc::new(MemoryStore::new())),
        AttributeStoreMode::Xattr => Ok(Arc::new(XattrStore::probe(root)?)),
        AttributeStoreMode::Auto => match XattrStore::probe(root) {
            Ok(store) => Ok(Arc::new(store)),
            Err(err) => {
                warn!(target: "mirrorfs::attributes", root = %root.display(), error = %err,
                    "extended attributes unavailable; attribute bits will not persist");
                Ok(Arc::new(MemoryStore::new()))
            }
        },
    }
}

fn decode(raw: &[u8]) -> FsResult<FileAttributes> {
    let bytes: [u8; 4] = raw
        .try_into()
        .map_err(|_| FsError::Corrupt(format!("attribute word has {} bytes", raw.len())))?;
    let word = u32::from_le_bytes(bytes);
    FileAttributes::from_bits(word)
        .filter(|bits| STORED.contains(*bits))
        .ok_or_else(|| FsError::Corrupt(format!("attribute word {word:#x} has unknown bits")))
}

/// Attribute bits visible without consulting the store.
pub fn derived_attributes(metadata: &Metadata) -> FileAttributes {
    let mut attrs = FileAttributes::empty();
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        attrs |= FileAttributes::DIRECTORY;
    }
    if file_type.is_symlink() {
        attrs |= FileAttributes::REPARSE_POINT;
    }
    if file_type.is_file() && metadata.permissions().readonly() {
        attrs |= FileAttributes::READONLY;
    }
    if attrs.is_empty() {
        attrs = FileAttributes::NORMAL;
    }
    attrs
}

/// Reads and writes the full attribute set of host paths.
#[derive(Clone)]
pub struct AttributeMapper {
    store: Arc<dyn AttributeStore>,
}

impl AttributeMapper {
    pub fn new(store: Arc<dyn AttributeStore>) -> Self {
        Self { store }
    }

    fn stored(&self, path: &Path) -> FsResult<FileAttributes> {
        match self.store.load(path)? {
            Some(raw) => decode(&raw),
            None => Ok(FileAttributes::empty()),
        }
    }

    /// Full attribute set. Fails with `Corrupt` when the stored word is bad.
    pub fn read(&self, path: &Path, metadata: &Metadata) -> FsResult<FileAttributes> {
        let mut stored = self.stored(path)?;
        if metadata.is_file() {
            // Regular files carry read-only in their permission bits.
            stored.remove(FileAttributes::READONLY);
        }
        let mut attrs = derived_attributes(metadata).union(stored);
        if attrs.contains(FileAttributes::NORMAL) && attrs != FileAttributes::NORMAL {
            attrs.remove(FileAttributes::NORMAL);
        }
        Ok(attrs)
    }

    /// Make the settable flags of `path` equal to those in `requested`.
    ///
    /// Flags outside the settable set are left as they are; a stored word
    /// that fails to decode is overwritten.
    pub fn apply(&self, path: &Path, requested: FileAttributes) -> FsResult<()> {
        let metadata = fs::symlink_metadata(path)?;
        let wanted = requested & FileAttributes::SETTABLE;

        if metadata.is_file() {
            let mut permissions = metadata.permissions();
            let mode = permissions.mode();
            let new_mode = if wanted.contains(FileAttributes::READONLY) {
                mode & !0o222
            } else if mode & 0o222 == 0 {
                mode | 0o200
            } else {
                mode
            };
            if new_mode != mode {
                permissions.set_mode(new_mode);
                fs::set_permissions(path, permissions)?;
            }
        }

        let (current, repair) = match self.stored(path) {
            Ok(current) => (current, false),
            Err(err) => {
                debug!(target: "mirrorfs::attributes", path = %path.display(), error = %err,
                    "replacing unreadable attribute word");
                (FileAttributes::empty(), true)
            }
        };
        let portable = FileAttributes::HIDDEN | FileAttributes::SYSTEM | FileAttributes::ARCHIVE;
        let mut word = (current & FileAttributes::SPARSE_FILE) | (wanted & portable);
        if metadata.is_dir() && wanted.contains(FileAttributes::READONLY) {
            word |= FileAttributes::READONLY;
        }
        if word != current || repair {
            self.store.store(path, &word.bits().to_le_bytes())?;
        }
        Ok(())
    }

    pub fn set_sparse(&self, path: &Path, sparse: bool) -> FsResult<()> {
        let current = self.stored(path)?;
        let mut word = current;
        word.set(FileAttributes::SPARSE_FILE, sparse);
        if word != current {
            self.store.store(path, &word.bits().to_le_bytes())?;
        }
        Ok(())
    }

    /// Drop stored state for a deleted path.
    pub fn forget(&self, path: &Path) -> FsResult<()> {
        self.store.remove(path)
    }

    /// Carry stored state along with a rename.
    pub fn moved(&self, from: &Path, to: &Path) -> FsResult<()> {
        self.store.rename(from, to)
    }
}
