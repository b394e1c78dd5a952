// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! MirrorFS host: mounts a mirror of a local directory on the loopback
//! driver and runs workloads against it.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use mirrorfs_host::config::{load_config, HostConfig};
use mirrorfs_host::workload::{run_check, run_stress, run_volume_info, StressOptions};
use mirrorfs_logging::CliLoggingArgs;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Mirror a local directory through the MirrorFS provider")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Driver option string, e.g. "--thread-count 4 --options CURRENT_SESSION"
    #[arg(long, global = true, allow_hyphen_values = true)]
    mount_options: Option<String>,

    #[command(flatten)]
    logging: CliLoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted create/write/read/move/delete pass and report each step
    Check(TargetArgs),
    /// Run concurrent random operations for a while
    Stress(StressArgs),
    /// Print volume information and free space of the mirrored root
    VolumeInfo(TargetArgs),
}

#[derive(Args)]
struct TargetArgs {
    /// Directory to mirror
    #[arg(long)]
    root: Option<PathBuf>,

    /// Also write the JSON report here
    #[arg(long)]
    json_output: Option<PathBuf>,
}

#[derive(Args)]
struct StressArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Number of worker threads
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 10)]
    duration_sec: u64,

    /// Upper bound on files alive at once
    #[arg(long, default_value_t = 256)]
    max_files: usize,

    /// Largest single write, in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    max_file_size: usize,
}

fn resolve(cli: &Cli, target: &TargetArgs) -> Result<HostConfig> {
    load_config(cli.config.as_deref())?
        .with_overrides(target.root.as_deref(), cli.mount_options.as_deref())
}

fn emit<T: serde::Serialize>(value: &T, json_output: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = json_output {
        serde_json::to_writer_pretty(File::create(path)?, value)?;
    }
    let mut out = io::stdout().lock();
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let target = match &cli.command {
        Command::Check(target) | Command::VolumeInfo(target) => target,
        Command::Stress(args) => &args.target,
    };
    let config = resolve(&cli, target)?;
    cli.logging.clone().or(&config.logging).init("mirrorfs-host")?;
    info!(root = %config.mirror.root.display(), "mirrorfs host starting");

    match &cli.command {
        Command::Check(args) => {
            let report = run_check(&config)?;
            emit(&report, args.json_output.as_ref())?;
            if !report.passed {
                bail!("check failed");
            }
        }
        Command::Stress(args) => {
            let options = StressOptions {
                threads: args.threads,
                duration: Duration::from_secs(args.duration_sec),
                max_files: args.max_files,
                max_file_size: args.max_file_size,
            };
            let report = run_stress(&config, &options)?;
            emit(&report, args.target.json_output.as_ref())?;
            if report.status != "ok" {
                bail!("stress run failed");
            }
        }
        Command::VolumeInfo(args) => {
            let report = run_volume_info(&config)?;
            emit(&report, args.json_output.as_ref())?;
        }
    }
    Ok(())
}
