// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host side of MirrorFS: configuration, mount option strings, an
//! in-process loopback driver and the workloads the CLI runs over it.

pub mod config;
pub mod driver;
pub mod options;
pub mod workload;

pub use config::{load_config, HostConfig};
pub use driver::{LoopbackDriver, Reply, Request, Response};
pub use options::{parse_mount_options, OptionsError};
