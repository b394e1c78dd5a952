// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Provider and mount configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{DriverMountFlags, FileSystemFlags};

/// Where the attribute bits the host cannot represent natively are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeStoreMode {
    /// Extended attributes on the mirrored files.
    Xattr,
    /// An in-process table; lost on unmount.
    Memory,
    /// Extended attributes when the root supports them, memory otherwise.
    #[default]
    Auto,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub name: String,
    pub serial_number: u32,
    pub file_system_name: String,
    pub max_component_length: u32,
    pub file_system_flags: FileSystemFlags,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            name: "Mirror".to_string(),
            serial_number: 30974,
            file_system_name: "MirrorFS".to_string(),
            max_component_length: 255,
            file_system_flags: FileSystemFlags::CASE_PRESERVED_NAMES
                | FileSystemFlags::CASE_SENSITIVE_SEARCH
                | FileSystemFlags::UNICODE_ON_DISK,
        }
    }
}

/// Options handed to the driver at mount time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    pub thread_count: u16,
    /// Driver-side request timeout.
    pub timeout_ms: u64,
    pub allocation_unit_size: u32,
    pub sector_size: u32,
    pub options: DriverMountFlags,
    /// How long mounting waits for the driver's `mounted` notification.
    pub mount_timeout_ms: u64,
}

impl MountOptions {
    pub const DEFAULT_THREAD_COUNT: u16 = 5;
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_ALLOCATION_UNIT_SIZE: u32 = 4096;
    pub const DEFAULT_SECTOR_SIZE: u32 = 4096;
    pub const DEFAULT_MOUNT_TIMEOUT_MS: u64 = 5_000;
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            thread_count: Self::DEFAULT_THREAD_COUNT,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
            allocation_unit_size: Self::DEFAULT_ALLOCATION_UNIT_SIZE,
            sector_size: Self::DEFAULT_SECTOR_SIZE,
            options: DriverMountFlags::CURRENT_SESSION,
            mount_timeout_ms: Self::DEFAULT_MOUNT_TIMEOUT_MS,
        }
    }
}

/// Full provider configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Host directory being mirrored.
    pub root: PathBuf,
    pub volume: VolumeConfig,
    pub attributes: AttributeStoreMode,
    pub mount: MountOptions,
}

impl MirrorConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute_store(mut self, mode: AttributeStoreMode) -> Self {
        self.attributes = mode;
        self
    }
}
