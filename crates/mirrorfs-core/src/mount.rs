// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mount lifecycle: running a driver against a provider until unmount.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::{MirrorConfig, MountOptions, VolumeConfig};
use crate::dispatcher::MirrorFs;
use crate::error::FsError;
use crate::operations::OperationTable;
use crate::types::DriverMountFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountState {
    Pending,
    Mounted,
    Unmounted,
}

/// Completed by the provider's `mounted` callback.
pub struct MountSignal {
    state: Mutex<MountState>,
    changed: Condvar,
}

impl Default for MountSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl MountSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MountState::Pending),
            changed: Condvar::new(),
        }
    }

    pub fn notify_mounted(&self) {
        self.set(MountState::Mounted);
    }

    pub fn notify_unmounted(&self) {
        self.set(MountState::Unmounted);
    }

    fn set(&self, state: MountState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }

    pub fn state(&self) -> MountState {
        *self.state.lock()
    }

    /// Block until the state leaves `Pending` or `timeout` elapses. Returns
    /// the state observed last.
    pub fn wait(&self, timeout: Duration) -> MountState {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state == MountState::Pending {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("driver error {code}: {message}")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The external driver that delivers kernel requests as callbacks.
#[cfg_attr(test, mockall::automock)]
pub trait Driver: Send + Sync {
    /// Serve `operations` at `mount_point`. Blocks until unmounted.
    fn run(
        &self,
        operations: OperationTable,
        mount_point: &Path,
        options: &MountOptions,
    ) -> Result<(), DriverError>;

    /// Ask a running driver to stop serving `mount_point`.
    fn unmount(&self, mount_point: &Path) -> Result<(), DriverError>;
}

#[derive(thiserror::Error, Debug)]
pub enum MountError {
    #[error("cannot mirror {root}: {source}")]
    Provider {
        root: PathBuf,
        #[source]
        source: FsError,
    },
    #[error("failed to start driver thread: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("driver thread panicked")]
    DriverPanicked,
    #[error("mount at {mount_point} not confirmed within {timeout:?}")]
    Timeout {
        mount_point: PathBuf,
        timeout: Duration,
    },
}

/// Mounts mirror providers through one driver.
pub struct MountFactory {
    driver: Arc<dyn Driver>,
}

impl MountFactory {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Mirror `root` at `mount_point` under the given volume and file
    /// system names.
    pub fn mount(
        &self,
        root: &Path,
        mount_point: &Path,
        volume_name: &str,
        file_system_name: &str,
        options: MountOptions,
    ) -> Result<Mount, MountError> {
        let config = MirrorConfig {
            root: root.to_path_buf(),
            volume: VolumeConfig {
                name: volume_name.to_string(),
                file_system_name: file_system_name.to_string(),
                ..VolumeConfig::default()
            },
            mount: options,
            ..MirrorConfig::default()
        };
        self.mount_config(&config, mount_point)
    }

    pub fn mount_config(
        &self,
        config: &MirrorConfig,
        mount_point: &Path,
    ) -> Result<Mount, MountError> {
        let provider = MirrorFs::new(config).map_err(|source| MountError::Provider {
            root: config.root.clone(),
            source,
        })?;
        self.mount_provider(Arc::new(provider), mount_point, config.mount.clone())
    }

    /// Run the driver for an existing provider and wait for its `mounted`
    /// notification.
    pub fn mount_provider(
        &self,
        provider: Arc<MirrorFs>,
        mount_point: &Path,
        options: MountOptions,
    ) -> Result<Mount, MountError> {
        let signal = provider.mount_signal();
        let timeout = Duration::from_millis(options.mount_timeout_ms);
        let operations = if options.options.contains(DriverMountFlags::WRITE_PROTECTION) {
            OperationTable::read_only(Arc::clone(&provider))
        } else {
            OperationTable::for_provider(Arc::clone(&provider))
        };

        let driver = Arc::clone(&self.driver);
        let thread_signal = Arc::clone(&signal);
        let thread_mount_point = mount_point.to_path_buf();
        debug!(target: "mirrorfs::mount", mount_point = %mount_point.display(), "starting driver");
        let worker = thread::Builder::new()
            .name("mirrorfs-driver".to_string())
            .spawn(move || {
                let result = driver.run(operations, &thread_mount_point, &options);
                thread_signal.notify_unmounted();
                result
            })
            .map_err(MountError::Spawn)?;

        let mut mount = Mount {
            driver: Arc::clone(&self.driver),
            mount_point: mount_point.to_path_buf(),
            provider,
            worker: Some(worker),
        };
        match signal.wait(timeout) {
            MountState::Mounted => {
                info!(target: "mirrorfs::mount", mount_point = %mount_point.display(), "mount ready");
                Ok(mount)
            }
            MountState::Unmounted => {
                // The driver returned before confirming the mount.
                mount.join()?;
                Err(MountError::Driver(DriverError::new(
                    -1,
                    "driver stopped before mounting",
                )))
            }
            MountState::Pending => {
                if let Err(err) = mount.stop() {
                    warn!(target: "mirrorfs::mount", error = %err, "stopping unconfirmed mount failed");
                }
                Err(MountError::Timeout {
                    mount_point: mount_point.to_path_buf(),
                    timeout,
                })
            }
        }
    }
}

/// A running mount. Dropping it unmounts.
pub struct Mount {
    driver: Arc<dyn Driver>,
    mount_point: PathBuf,
    provider: Arc<MirrorFs>,
    worker: Option<JoinHandle<Result<(), DriverError>>>,
}

impl Mount {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn provider(&self) -> &Arc<MirrorFs> {
        &self.provider
    }

    pub fn unmount(mut self) -> Result<(), MountError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), MountError> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.driver.unmount(&self.mount_point)?;
        self.join()
    }

    fn join(&mut self) -> Result<(), MountError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(result) => result.map_err(MountError::from),
            Err(_) => Err(MountError::DriverPanicked),
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(target: "mirrorfs::mount", mount_point = %self.mount_point.display(), error = %err,
                "unmount on drop failed");
        }
    }
}
