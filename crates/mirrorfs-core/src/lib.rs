// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! MirrorFS Core - user-mode mirror file system provider
//!
//! Exposes a host directory tree through driver callbacks that may arrive
//! concurrently from many worker threads. Per-path two-tier locks serialize
//! conflicting work, a handle table tracks open resources, and every
//! callback answers with a Win32 status code.

pub mod attributes;
pub mod config;
pub mod create;
pub mod dispatcher;
pub mod error;
pub mod handles;
pub mod locks;
pub mod mount;
pub mod operations;
pub mod path;
pub mod range_locks;
pub mod status;
pub mod types;

// Re-export key types
pub use attributes::{AttributeStore, MemoryStore, XattrStore};
pub use config::{AttributeStoreMode, MirrorConfig, MountOptions, VolumeConfig};
pub use create::{CreateOutcome, CreateRequest};
pub use dispatcher::MirrorFs;
pub use error::{FsError, FsResult};
pub use mount::{Driver, DriverError, Mount, MountError, MountFactory, MountSignal, MountState};
pub use operations::OperationTable;
pub use status::{ErrorCode, OpResult};
pub use types::*;

#[cfg(test)]
mod test_concurrency;
#[cfg(test)]
mod test_create;
#[cfg(test)]
mod testing;
