// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request path resolution against the mirror root

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsResult};

const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\0'];

/// A request path rooted under the mirror root.
///
/// Built once per callback. The normalized relative form doubles as the
/// lock key, so two spellings of the same path share their locks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirroredPath {
    relative: String,
    host: PathBuf,
}

impl MirroredPath {
    /// Resolve a driver path (`\dir\file.txt`) under `root`.
    ///
    /// `.` and `..` are folded lexically; a path that would climb above the
    /// root, or a component carrying a reserved character, is rejected.
    pub fn resolve(root: &Path, request: &str) -> FsResult<Self> {
        let mut parts: Vec<&str> = Vec::new();
        for component in request.split(['\\', '/']) {
            match component {
                "" | "." => {}
                ".." => {
                    if parts.pop().is_none() {
                        return Err(FsError::BadPathname);
                    }
                }
                name => {
                    if name.contains(RESERVED) {
                        return Err(FsError::BadPathname);
                    }
                    parts.push(name);
                }
            }
        }

        let relative = parts.join("/");
        let mut host = root.to_path_buf();
        for part in &parts {
            host.push(part);
        }
        Ok(Self { relative, host })
    }

    pub fn host_path(&self) -> &Path {
        &self.host
    }

    /// Normalized relative path, `""` for the root.
    pub fn lock_key(&self) -> &str {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Last component, or `\` for the root itself.
    pub fn file_name(&self) -> &str {
        match self.relative.rsplit_once('/') {
            Some((_, name)) => name,
            None if self.relative.is_empty() => "\\",
            None => &self.relative,
        }
    }
}

impl fmt::Display for MirroredPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\\{}", self.relative.replace('/', "\\"))
    }
}
