// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-path reader/writer locks.
//!
//! Every path has two tiers. The path tier guards the directory entry and
//! its metadata; the data tier, taken while holding the path tier, guards
//! the file content. Locks are created on first use and forgotten once the
//! last holder releases them.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use tracing::trace;

use crate::path::MirroredPath;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

type Registry = Mutex<HashMap<String, Weak<LockSlot>>>;

struct LockSlot {
    key: String,
    registry: Weak<Registry>,
    path: Arc<RwLock<()>>,
    data: Arc<RwLock<()>>,
}

impl Drop for LockSlot {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut slots = registry.lock();
        // A newer slot may already have replaced this one under the same key.
        if slots.get(&self.key).is_some_and(|weak| weak.strong_count() == 0) {
            slots.remove(&self.key);
        }
    }
}

enum TierGuard {
    Shared(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

fn lock_tier(lock: &Arc<RwLock<()>>, mode: LockMode) -> TierGuard {
    match mode {
        LockMode::Shared => TierGuard::Shared(lock.read_arc()),
        LockMode::Exclusive => TierGuard::Exclusive(lock.write_arc()),
    }
}

/// Hands out path locks keyed by normalized path.
#[derive(Default)]
pub struct LockManager {
    registry: Arc<Registry>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<LockSlot> {
        let mut slots = self.registry.lock();
        if let Some(slot) = slots.get(key).and_then(Weak::upgrade) {
            return slot;
        }
        let slot = Arc::new(LockSlot {
            key: key.to_string(),
            registry: Arc::downgrade(&self.registry),
            path: Arc::new(RwLock::new(())),
            data: Arc::new(RwLock::new(())),
        });
        slots.insert(key.to_string(), Arc::downgrade(&slot));
        slot
    }

    /// Block until the path tier of `path` is held in `mode`.
    pub fn acquire_path_lock(&self, path: &MirroredPath, mode: LockMode) -> PathLock {
        self.lock_key(path.lock_key(), mode)
    }

    fn lock_key(&self, key: &str, mode: LockMode) -> PathLock {
        let slot = self.slot(key);
        trace!(target: "mirrorfs::locks", key, ?mode, "acquiring path lock");
        let guard = lock_tier(&slot.path, mode);
        PathLock { guard, slot }
    }

    /// Exclusively lock both tiers of two paths for a rename.
    ///
    /// Locks are taken in lexicographic key order so two renames crossing
    /// the same pair of paths cannot deadlock. Identical keys are locked once.
    pub fn acquire_move_locks(&self, source: &MirroredPath, target: &MirroredPath) -> MoveLocks {
        let mut keys = vec![source.lock_key(), target.lock_key()];
        keys.sort_unstable();
        keys.dedup();

        let paths: Vec<PathLock> = keys
            .iter()
            .map(|key| self.lock_key(key, LockMode::Exclusive))
            .collect();
        let data = paths
            .iter()
            .map(|path| lock_tier(&path.slot.data, LockMode::Exclusive))
            .collect();
        MoveLocks { data, paths }
    }

    /// Number of paths with a live lock slot.
    pub fn tracked_paths(&self) -> usize {
        self.registry.lock().len()
    }
}

/// The path tier of one path, held until dropped.
pub struct PathLock {
    #[allow(dead_code)]
    guard: TierGuard,
    slot: Arc<LockSlot>,
}

impl PathLock {
    /// Take the data tier of the same path. The borrow keeps the path tier
    /// held for as long as the data lock lives.
    pub fn lock_data(&self, mode: LockMode) -> DataLock<'_> {
        DataLock {
            _guard: lock_tier(&self.slot.data, mode),
            _path: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.slot.key
    }
}

/// The data tier of a path whose path tier is held.
pub struct DataLock<'a> {
    _guard: TierGuard,
    _path: PhantomData<&'a PathLock>,
}

/// Both tiers of the source and target of a rename.
pub struct MoveLocks {
    // Released before the path tiers.
    #[allow(dead_code)]
    data: Vec<TierGuard>,
    paths: Vec<PathLock>,
}

impl MoveLocks {
    pub fn keys(&self) -> Vec<&str> {
        self.paths.iter().map(PathLock::key).collect()
    }
}
