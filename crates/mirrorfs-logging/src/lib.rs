// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup shared by MirrorFS binaries
//!
//! Provider code logs through `tracing` under the `mirrorfs` target family
//! (`mirrorfs`, `mirrorfs::locks`, `mirrorfs::attributes`, ...). Binaries
//! call one of the `init*` functions once at startup; `RUST_LOG` overrides
//! the level chosen on the command line.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing::Level;

/// Target prefix used by the provider crates.
pub const PROVIDER_TARGET: &str = "mirrorfs";

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaintext" | "text" => Ok(LogFormat::Plaintext),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}. Use 'plaintext' or 'json'")),
        }
    }
}

/// Log level accepted on the command line
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum, Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    /// Every callback, lock acquisition and handle change
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Logging arguments for `#[command(flatten)]` in binary CLIs.
///
/// Logs go to stderr unless `--log-file` or `--log-dir` is given, so that
/// stdout stays free for command output.
#[derive(Clone, Debug, Default, PartialEq, Eq, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    /// Log verbosity level (default: info)
    #[arg(long, value_enum, global = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format (default: plaintext)
    #[arg(long, value_enum, global = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    /// Directory for log files
    #[arg(long, global = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Log file name or path
    #[arg(long, global = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl CliLoggingArgs {
    /// Initialize logging for `component` from the parsed arguments.
    pub fn init(&self, component: &str) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or_default().into();
        let format = self.log_format.unwrap_or_default();
        match self.log_path(component) {
            Some(path) => init_to_file(component, level, format, &path),
            None => init(component, level, format),
        }
    }

    /// Fill unset fields from `fallback`, typically values read from a
    /// configuration file.
    pub fn or(self, fallback: &CliLoggingArgs) -> CliLoggingArgs {
        CliLoggingArgs {
            log_level: self.log_level.or(fallback.log_level),
            log_format: self.log_format.or(fallback.log_format),
            log_dir: self.log_dir.or_else(|| fallback.log_dir.clone()),
            log_file: self.log_file.or_else(|| fallback.log_file.clone()),
        }
    }

    /// Log file for `component`, or `None` when logging to the console.
    ///
    /// An absolute `log_file` wins; a relative one is placed under
    /// `log_dir` when set. A bare `log_dir` gets `<component>.log`.
    pub fn log_path(&self, component: &str) -> Option<PathBuf> {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if file.is_absolute() => Some(file.clone()),
            (Some(file), Some(dir)) => Some(dir.join(file)),
            (Some(file), None) => Some(file.clone()),
            (None, Some(dir)) => Some(dir.join(format!("{component}.log"))),
            (None, None) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.log_level.is_none()
            && self.log_format.is_none()
            && self.log_dir.is_none()
            && self.log_file.is_none()
    }
}

/// Platform log location for `component`.
///
/// - macOS: ~/Library/Logs/mirrorfs/<component>.log
/// - Linux and others: <data dir>/mirrorfs/<component>.log
pub fn standard_log_path(component: &str) -> PathBuf {
    #[cfg(target_os = "macos")]
    let mut path = {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        path.push("Library");
        path.push("Logs");
        path
    };

    #[cfg(not(target_os = "macos"))]
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"));

    path.push("mirrorfs");
    path.push(format!("{component}.log"));
    path
}

/// Filter used when `RUST_LOG` is unset: `level` for everything, with the
/// component and provider targets pinned to the same level.
pub fn default_directives(component: &str, level: Level) -> String {
    let component = component.replace('-', "_");
    if component == PROVIDER_TARGET {
        format!("{level},{PROVIDER_TARGET}={level}")
    } else {
        format!("{level},{component}={level},{PROVIDER_TARGET}={level}")
    }
}

/// Initialize console logging on stderr.
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Initialize logging to `log_path`, appending to an existing file.
pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    use std::fs;

    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    init_with_writer(component, default_level, format, std::sync::Mutex::new(log_file))
}

/// Initialize logging with a custom writer.
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(component, default_level)));

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .json()
                .with_current_span(false)
                .with_thread_names(true);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            #[cfg(debug_assertions)]
            let layer = layer.with_file(true).with_line_number(true);

            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}
