// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte-range locks owned by open handles

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{FsError, FsResult};
use crate::handles::FileIdentity;
use crate::types::HandleId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockRange {
    pub offset: u64,
    pub len: u64,
}

impl LockRange {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    fn end(&self) -> u64 {
        self.offset.saturating_add(self.len)
    }

    fn overlaps(&self, other: &LockRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

#[derive(Clone, Copy, Debug)]
struct ActiveLock {
    handle: HandleId,
    range: LockRange,
}

/// Exclusive byte-range locks, keyed by host file identity.
#[derive(Default)]
pub struct RangeLocks {
    locks: Mutex<HashMap<FileIdentity, Vec<ActiveLock>>>,
}

impl RangeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, file: FileIdentity, handle: HandleId, range: LockRange) -> FsResult<()> {
        let mut locks = self.locks.lock();
        let file_locks = locks.entry(file).or_default();
        if file_locks.iter().any(|held| held.range.overlaps(&range)) {
            return Err(FsError::LockViolation);
        }
        file_locks.push(ActiveLock { handle, range });
        Ok(())
    }

    /// Release exactly the range previously locked by `handle`.
    pub fn unlock(&self, file: FileIdentity, handle: HandleId, range: LockRange) -> FsResult<()> {
        let mut locks = self.locks.lock();
        let file_locks = locks.get_mut(&file).ok_or(FsError::NotLocked)?;
        let position = file_locks
            .iter()
            .position(|held| held.handle == handle && held.range == range)
            .ok_or(FsError::NotLocked)?;
        file_locks.swap_remove(position);
        if file_locks.is_empty() {
            locks.remove(&file);
        }
        Ok(())
    }

    /// Fail if another handle holds a lock overlapping `range`.
    pub fn check_access(
        &self,
        file: FileIdentity,
        handle: HandleId,
        range: LockRange,
    ) -> FsResult<()> {
        let locks = self.locks.lock();
        let conflict = locks.get(&file).is_some_and(|file_locks| {
            file_locks
                .iter()
                .any(|held| held.handle != handle && held.range.overlaps(&range))
        });
        if conflict {
            Err(FsError::LockViolation)
        } else {
            Ok(())
        }
    }

    /// Drop every lock owned by a closing handle.
    pub fn release_handle(&self, handle: HandleId) {
        let mut locks = self.locks.lock();
        locks.retain(|_, file_locks| {
            file_locks.retain(|held| held.handle != handle);
            !file_locks.is_empty()
        });
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
