// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host configuration file (JSON)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use mirrorfs_core::MirrorConfig;
use mirrorfs_logging::CliLoggingArgs;
use serde::{Deserialize, Serialize};

use crate::options::parse_mount_options;

/// Where the loopback driver pretends to mount when nothing else is given.
pub const DEFAULT_MOUNT_POINT: &str = "/mirrorfs";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostConfig {
    /// Provider settings; `root`, `volume`, `attributes` and `mount` keys.
    #[serde(flatten)]
    pub mirror: MirrorConfig,
    pub mount_point: Option<PathBuf>,
    pub logging: CliLoggingArgs,
}

impl HostConfig {
    /// Apply command-line overrides. An option string is parsed on top of
    /// the configured mount options.
    pub fn with_overrides(
        mut self,
        root: Option<&Path>,
        mount_options: Option<&str>,
    ) -> Result<Self> {
        if let Some(root) = root {
            self.mirror.root = root.to_path_buf();
        }
        if let Some(input) = mount_options {
            self.mirror.mount = parse_mount_options(input, self.mirror.mount.clone())
                .with_context(|| format!("bad --mount-options {input:?}"))?;
        }
        if self.mirror.root.as_os_str().is_empty() {
            bail!("no mirror root given; pass --root or set \"root\" in the config file");
        }
        Ok(self)
    }

    pub fn mount_point(&self) -> PathBuf {
        self.mount_point
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNT_POINT))
    }
}

pub fn load_config(config_path: Option<&Path>) -> Result<HostConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config {}", path.display()))
        }
        None => Ok(HostConfig::default()),
    }
}
