// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount option strings such as
//! `--thread-count 10 --sector-size 4096 --options CURRENT_SESSION,DEBUG_MODE`.
//!
//! Only long options are accepted. Values not named in the string keep the
//! value of the base options they are applied to.

use clap::Parser;
use mirrorfs_core::{DriverMountFlags, MountOptions};

/// Largest worker count a driver accepts.
pub const MAX_THREAD_COUNT: u16 = i16::MAX as u16;

#[derive(thiserror::Error, Debug)]
pub enum OptionsError {
    #[error("invalid mount option string: {0}")]
    Syntax(String),
    #[error("unknown driver option {0}")]
    UnknownFlag(String),
    #[error("driver option {0} is not supported")]
    UnsupportedFlag(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "mount-options",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct OptionArgs {
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=MAX_THREAD_COUNT as i64))]
    thread_count: Option<u16>,

    /// Driver request timeout in milliseconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    allocation_unit_size: Option<u32>,

    #[arg(long)]
    sector_size: Option<u32>,

    #[arg(long, value_delimiter = ',')]
    options: Vec<String>,
}

/// Parse a single driver flag name, e.g. `CURRENT_SESSION`.
pub fn parse_flag(name: &str) -> Result<DriverMountFlags, OptionsError> {
    let name = name.trim();
    let flag = DriverMountFlags::from_name(name)
        .ok_or_else(|| OptionsError::UnknownFlag(name.to_string()))?;
    // Alternate data streams are not mirrored.
    if flag == DriverMountFlags::ALT_STREAM {
        return Err(OptionsError::UnsupportedFlag(name.to_string()));
    }
    Ok(flag)
}

/// Apply `input` on top of `base`.
///
/// A non-empty `--options` list replaces the base flag set.
pub fn parse_mount_options(input: &str, base: MountOptions) -> Result<MountOptions, OptionsError> {
    let args = OptionArgs::try_parse_from(input.split_whitespace())
        .map_err(|err| OptionsError::Syntax(err.to_string().trim().to_string()))?;

    let mut options = base;
    if let Some(thread_count) = args.thread_count {
        options.thread_count = thread_count;
    }
    if let Some(timeout) = args.timeout {
        options.timeout_ms = timeout;
    }
    if let Some(size) = args.allocation_unit_size {
        options.allocation_unit_size = size;
    }
    if let Some(size) = args.sector_size {
        options.sector_size = size;
    }
    if !args.options.is_empty() {
        let mut flags = DriverMountFlags::empty();
        for name in args.options.iter().filter(|n| !n.trim().is_empty()) {
            flags |= parse_flag(name)?;
        }
        options.options = flags;
    }
    Ok(options)
}
