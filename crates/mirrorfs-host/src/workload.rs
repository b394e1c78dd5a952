// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Scripted and randomized workloads driven through the loopback driver.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mirrorfs_core::{
    AccessMask, CreateRequest, CreationDisposition, DiskFreeSpace, Driver, DriverError,
    ErrorCode, FileContext, MirrorFs, Mount, MountFactory, VolumeInformation,
};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::driver::{LoopbackDriver, Reply, Request, Response};

fn timestamp(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// A provider mounted on a fresh loopback driver.
pub struct LoopbackMount {
    driver: Arc<LoopbackDriver>,
    mount: Mount,
}

impl LoopbackMount {
    pub fn start(config: &HostConfig) -> Result<Self> {
        let driver = Arc::new(LoopbackDriver::new());
        let factory = MountFactory::new(Arc::clone(&driver) as Arc<dyn Driver>);
        let mount = factory
            .mount_config(&config.mirror, &config.mount_point())
            .with_context(|| format!("failed to mount {}", config.mirror.root.display()))?;
        Ok(Self { driver, mount })
    }

    pub fn driver(&self) -> &LoopbackDriver {
        &self.driver
    }

    pub fn provider(&self) -> &Arc<MirrorFs> {
        self.mount.provider()
    }

    pub fn finish(self) -> Result<()> {
        self.mount.unmount().context("unmount failed")
    }
}

/// Open and release files through a driver the way a kernel client would.
struct Client<'a> {
    driver: &'a LoopbackDriver,
    process_id: u32,
}

impl Client<'_> {
    fn create(&self, path: &str, request: CreateRequest) -> Result<Response, DriverError> {
        self.driver.call(Request::CreateFile {
            path: path.to_string(),
            request,
            context: FileContext::for_process(self.process_id),
        })
    }

    fn release(&self, path: &str, context: FileContext) -> Result<(), DriverError> {
        let cleaned = self.driver.call(Request::Cleanup {
            path: path.to_string(),
            context,
        })?;
        self.driver.call(Request::CloseFile {
            path: path.to_string(),
            context: cleaned.context,
        })?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub step: String,
    pub expected: String,
    pub status: String,
    pub passed: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    pub root: PathBuf,
    pub mount_point: PathBuf,
    pub start_time: String,
    pub end_time: String,
    pub steps: Vec<StepReport>,
    pub open_handles: usize,
    pub passed: bool,
}

struct Checker<'a> {
    client: Client<'a>,
    steps: Vec<StepReport>,
}

impl Checker<'_> {
    fn step(
        &mut self,
        name: &str,
        request: Request,
        expected: ErrorCode,
        verify: impl FnOnce(&Reply) -> bool,
    ) -> Result<Response> {
        let response = self
            .client
            .driver
            .call(request)
            .with_context(|| format!("check step '{name}'"))?;
        let passed = response.status == expected && verify(&response.reply);
        if passed {
            debug!(step = name, status = %response.status, "check step passed");
        } else {
            warn!(step = name, %expected, status = %response.status, "check step failed");
        }
        self.steps.push(StepReport {
            step: name.to_string(),
            expected: expected.name().to_string(),
            status: response.status.name().to_string(),
            passed,
        });
        Ok(response)
    }

    fn open(
        &mut self,
        name: &str,
        path: &str,
        request: CreateRequest,
        expected: ErrorCode,
    ) -> Result<FileContext> {
        let response = self.step(
            name,
            Request::CreateFile {
                path: path.to_string(),
                request,
                context: FileContext::for_process(self.client.process_id),
            },
            expected,
            |_| true,
        )?;
        Ok(response.context)
    }

    fn release(&mut self, path: &str, context: FileContext) -> Result<()> {
        if context.handle.is_none() {
            return Ok(());
        }
        self.client
            .release(path, context)
            .with_context(|| format!("releasing {path}"))
    }
}

/// Create, write, read, list, move and delete through every layer.
pub fn run_check(config: &HostConfig) -> Result<CheckReport> {
    let start_time = chrono::Utc::now();
    let mount = LoopbackMount::start(config)?;
    let mut checker = Checker {
        client: Client {
            driver: mount.driver(),
            process_id: std::process::id(),
        },
        steps: Vec::new(),
    };

    let dir = format!("\\mirrorfs-check-{}", start_time.timestamp_millis());
    let file = format!("{dir}\\hello.txt");
    let renamed = format!("{dir}\\renamed.txt");
    let payload = b"hello from mirrorfs\n".to_vec();

    let dir_ctx = checker.open(
        "create directory",
        &dir,
        CreateRequest::directory(CreationDisposition::CreateNew),
        ErrorCode::SUCCESS,
    )?;
    let ctx = checker.open(
        "create file",
        &file,
        CreateRequest::new(CreationDisposition::CreateNew),
        ErrorCode::SUCCESS,
    )?;

    let expected_len = payload.len();
    checker.step(
        "write",
        Request::WriteFile {
            path: file.clone(),
            offset: 0,
            data: payload.clone(),
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |reply| *reply == Reply::Written(expected_len),
    )?;
    checker.step(
        "flush",
        Request::FlushFileBuffers {
            path: file.clone(),
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |_| true,
    )?;
    checker.step(
        "read back",
        Request::ReadFile {
            path: file.clone(),
            offset: 0,
            length: 4096,
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |reply| *reply == Reply::Data(payload.clone()),
    )?;
    checker.step(
        "file information",
        Request::GetFileInformation {
            path: file.clone(),
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |reply| matches!(reply, Reply::Information(info) if info.file_size == expected_len as u64),
    )?;
    checker.step(
        "list directory",
        Request::FindFiles {
            path: dir.clone(),
            pattern: Some("*.txt".to_string()),
            context: dir_ctx,
        },
        ErrorCode::SUCCESS,
        |reply| {
            matches!(reply, Reply::Entries(entries)
                if entries.len() == 1 && entries[0].file_name == "hello.txt")
        },
    )?;
    let duplicate = checker.open(
        "create existing file",
        &file,
        CreateRequest::new(CreationDisposition::CreateNew),
        ErrorCode::FILE_EXISTS,
    )?;
    checker.release(&file, duplicate)?;

    checker.step(
        "lock range",
        Request::LockFile {
            path: file.clone(),
            offset: 0,
            length: 4,
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |_| true,
    )?;
    checker.step(
        "unlock range",
        Request::UnlockFile {
            path: file.clone(),
            offset: 0,
            length: 4,
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |_| true,
    )?;
    checker.step(
        "move",
        Request::MoveFile {
            path: file.clone(),
            new_path: renamed.clone(),
            replace_if_existing: false,
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |_| true,
    )?;
    let deleted = checker.step(
        "delete file",
        Request::DeleteFile {
            path: renamed.clone(),
            context: ctx,
        },
        ErrorCode::SUCCESS,
        |_| true,
    )?;
    checker.release(&renamed, deleted.context)?;

    let deleted = checker.step(
        "delete directory",
        Request::DeleteDirectory {
            path: dir.clone(),
            context: dir_ctx,
        },
        ErrorCode::SUCCESS,
        |_| true,
    )?;
    checker.release(&dir, deleted.context)?;

    let gone = checker.open(
        "directory removed",
        &dir,
        CreateRequest::directory(CreationDisposition::OpenExisting),
        ErrorCode::PATH_NOT_FOUND,
    )?;
    checker.release(&dir, gone)?;

    let steps = checker.steps;
    let open_handles = mount.provider().open_handles();
    mount.finish()?;

    let passed = open_handles == 0 && steps.iter().all(|s| s.passed);
    info!(passed, steps = steps.len(), "check finished");
    Ok(CheckReport {
        root: config.mirror.root.clone(),
        mount_point: config.mount_point(),
        start_time: timestamp(start_time),
        end_time: timestamp(chrono::Utc::now()),
        steps,
        open_handles,
        passed,
    })
}

#[derive(Clone, Debug)]
pub struct StressOptions {
    pub threads: usize,
    pub duration: Duration,
    pub max_files: usize,
    pub max_file_size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Create,
    Write,
    Read,
    List,
    Rename,
    Delete,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::List => "list",
            Operation::Rename => "rename",
            Operation::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StressReport {
    pub root: PathBuf,
    pub threads: usize,
    pub duration_ms: u64,
    pub max_files: usize,
    pub start_time: String,
    pub end_time: String,
    /// Completed operations by kind.
    pub operations: BTreeMap<String, u64>,
    /// Failed operations by status name. Races between workers make some
    /// of these expected (a file deleted before another worker opens it).
    pub failures: BTreeMap<String, u64>,
    pub driver_errors: u64,
    pub total_ops: u64,
    pub open_handles: usize,
    pub locked_paths: usize,
    pub status: String,
}

#[derive(Default)]
struct WorkerResult {
    operations: BTreeMap<String, u64>,
    failures: BTreeMap<String, u64>,
    driver_errors: u64,
}

const STRESS_DIR: &str = "\\stress";

struct Worker<'a> {
    id: usize,
    client: Client<'a>,
    files: &'a Mutex<Vec<String>>,
    options: &'a StressOptions,
    run_until: Instant,
    rng: SmallRng,
    seq: u64,
}

impl Worker<'_> {
    fn run(mut self) -> WorkerResult {
        let mut result = WorkerResult::default();
        while Instant::now() < self.run_until {
            let op = self.pick_operation();
            match self.perform(op) {
                Ok(ErrorCode::SUCCESS) => {
                    *result.operations.entry(op.label().to_string()).or_insert(0) += 1;
                }
                Ok(status) => {
                    *result.failures.entry(status.name().to_string()).or_insert(0) += 1;
                }
                Err(err) => {
                    result.driver_errors += 1;
                    warn!(worker = self.id, op = op.label(), error = %err, "driver error");
                }
            }
        }
        result
    }

    fn pick_operation(&mut self) -> Operation {
        match self.rng.gen_range(0..100) {
            0..=24 => Operation::Create,
            25..=49 => Operation::Write,
            50..=74 => Operation::Read,
            75..=84 => Operation::List,
            85..=92 => Operation::Rename,
            _ => Operation::Delete,
        }
    }

    fn next_name(&mut self) -> String {
        self.seq += 1;
        format!("{STRESS_DIR}\\w{}-{}.bin", self.id, self.seq)
    }

    fn pick_file(&mut self) -> Option<String> {
        self.files.lock().choose(&mut self.rng).cloned()
    }

    fn random_data(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(1..=self.options.max_file_size.max(1));
        let mut data = vec![0u8; len];
        self.rng.fill(&mut data[..]);
        data
    }

    fn perform(&mut self, op: Operation) -> Result<ErrorCode, DriverError> {
        let file_count = self.files.lock().len();
        let op = match op {
            Operation::Create if file_count >= self.options.max_files => Operation::Write,
            Operation::Write | Operation::Read | Operation::Rename | Operation::Delete
                if file_count == 0 =>
            {
                Operation::Create
            }
            op => op,
        };
        match op {
            Operation::Create => self.create(),
            Operation::Write => self.write(),
            Operation::Read => self.read(),
            Operation::List => self.list(),
            Operation::Rename => self.rename(),
            Operation::Delete => self.delete(),
        }
    }

    /// Run `body` against an open handle on `path` and release it.
    fn with_open(
        &self,
        path: &str,
        request: CreateRequest,
        body: impl FnOnce(&mut FileContext) -> Result<ErrorCode, DriverError>,
    ) -> Result<ErrorCode, DriverError> {
        let opened = self.client.create(path, request)?;
        if !opened.status.is_success() {
            return Ok(opened.status);
        }
        let mut context = opened.context;
        let status = body(&mut context);
        self.client.release(path, context)?;
        status
    }

    fn create(&mut self) -> Result<ErrorCode, DriverError> {
        let path = self.next_name();
        let data = self.random_data();
        let driver = self.client.driver;
        let status = self.with_open(
            &path,
            CreateRequest::new(CreationDisposition::CreateNew),
            |context| {
                let response = driver.call(Request::WriteFile {
                    path: path.clone(),
                    offset: 0,
                    data,
                    context: *context,
                })?;
                Ok(response.status)
            },
        )?;
        if status.is_success() {
            self.files.lock().push(path);
        }
        Ok(status)
    }

    fn write(&mut self) -> Result<ErrorCode, DriverError> {
        let Some(path) = self.pick_file() else {
            return Ok(ErrorCode::FILE_NOT_FOUND);
        };
        let data = self.random_data();
        let offset = self.rng.gen_range(0..self.options.max_file_size.max(1)) as u64;
        let driver = self.client.driver;
        self.with_open(
            &path,
            CreateRequest::new(CreationDisposition::OpenExisting),
            |context| {
                let response = driver.call(Request::WriteFile {
                    path: path.clone(),
                    offset,
                    data,
                    context: *context,
                })?;
                Ok(response.status)
            },
        )
    }

    fn read(&mut self) -> Result<ErrorCode, DriverError> {
        let Some(path) = self.pick_file() else {
            return Ok(ErrorCode::FILE_NOT_FOUND);
        };
        let length = self.options.max_file_size.max(1);
        let driver = self.client.driver;
        self.with_open(
            &path,
            CreateRequest::new(CreationDisposition::OpenExisting)
                .with_access(AccessMask::GENERIC_READ),
            |context| {
                let response = driver.call(Request::ReadFile {
                    path: path.clone(),
                    offset: 0,
                    length,
                    context: *context,
                })?;
                Ok(response.status)
            },
        )
    }

    fn list(&mut self) -> Result<ErrorCode, DriverError> {
        let driver = self.client.driver;
        self.with_open(
            STRESS_DIR,
            CreateRequest::directory(CreationDisposition::OpenExisting),
            |context| {
                let response = driver.call(Request::FindFiles {
                    path: STRESS_DIR.to_string(),
                    pattern: None,
                    context: *context,
                })?;
                Ok(response.status)
            },
        )
    }

    fn rename(&mut self) -> Result<ErrorCode, DriverError> {
        let Some(path) = self.pick_file() else {
            return Ok(ErrorCode::FILE_NOT_FOUND);
        };
        let new_path = self.next_name();
        let driver = self.client.driver;
        let status = self.with_open(
            &path,
            CreateRequest::new(CreationDisposition::OpenExisting),
            |context| {
                let response = driver.call(Request::MoveFile {
                    path: path.clone(),
                    new_path: new_path.clone(),
                    replace_if_existing: false,
                    context: *context,
                })?;
                Ok(response.status)
            },
        )?;
        if status.is_success() {
            let mut files = self.files.lock();
            files.retain(|f| *f != path);
            files.push(new_path);
        }
        Ok(status)
    }

    fn delete(&mut self) -> Result<ErrorCode, DriverError> {
        let Some(path) = self.pick_file() else {
            return Ok(ErrorCode::FILE_NOT_FOUND);
        };
        let driver = self.client.driver;
        let status = self.with_open(
            &path,
            CreateRequest::new(CreationDisposition::OpenExisting),
            |context| {
                let response = driver.call(Request::DeleteFile {
                    path: path.clone(),
                    context: *context,
                })?;
                // Carries delete-on-close into the release.
                *context = response.context;
                Ok(response.status)
            },
        )?;
        if status.is_success() {
            self.files.lock().retain(|f| *f != path);
        }
        Ok(status)
    }
}

fn merge_counts(target: &mut BTreeMap<String, u64>, source: &BTreeMap<String, u64>) {
    for (key, value) in source {
        *target.entry(key.clone()).or_insert(0) += value;
    }
}

/// Hammer the provider from `options.threads` workers for `options.duration`.
pub fn run_stress(config: &HostConfig, options: &StressOptions) -> Result<StressReport> {
    let start_time = chrono::Utc::now();
    let mount = LoopbackMount::start(config)?;
    let client = Client {
        driver: mount.driver(),
        process_id: std::process::id(),
    };
    let opened = client
        .create(STRESS_DIR, CreateRequest::directory(CreationDisposition::OpenAlways))
        .context("failed to open the stress directory")?;
    if !opened.status.is_success() {
        anyhow::bail!("cannot create {STRESS_DIR}: {}", opened.status);
    }
    client.release(STRESS_DIR, opened.context)?;

    info!(
        threads = options.threads,
        duration = ?options.duration,
        max_files = options.max_files,
        "stress workload starting"
    );
    let files = Mutex::new(Vec::new());
    let run_until = Instant::now() + options.duration;
    let seed_base = start_time.timestamp_nanos_opt().unwrap_or_default() as u64;

    let results: Vec<WorkerResult> = thread::scope(|s| {
        let handles: Vec<_> = (0..options.threads.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    client: Client {
                        driver: mount.driver(),
                        process_id: 1000 + id as u32,
                    },
                    files: &files,
                    options,
                    run_until,
                    rng: SmallRng::seed_from_u64(seed_base ^ id as u64),
                    seq: 0,
                };
                s.spawn(move || worker.run())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| WorkerResult {
                    driver_errors: 1,
                    ..WorkerResult::default()
                })
            })
            .collect()
    });

    let mut report = StressReport {
        root: config.mirror.root.clone(),
        threads: options.threads.max(1),
        duration_ms: u64::try_from(options.duration.as_millis()).unwrap_or(u64::MAX),
        max_files: options.max_files,
        start_time: timestamp(start_time),
        ..StressReport::default()
    };
    for result in &results {
        merge_counts(&mut report.operations, &result.operations);
        merge_counts(&mut report.failures, &result.failures);
        report.driver_errors += result.driver_errors;
    }
    report.total_ops = report.operations.values().sum();
    report.open_handles = mount.provider().open_handles();
    report.locked_paths = mount.provider().locked_paths();
    mount.finish()?;

    report.end_time = timestamp(chrono::Utc::now());
    let clean = report.driver_errors == 0 && report.open_handles == 0 && report.locked_paths == 0;
    report.status = if clean { "ok" } else { "failed" }.to_string();
    info!(total_ops = report.total_ops, status = %report.status, "stress workload finished");
    Ok(report)
}

#[derive(Clone, Debug, Serialize)]
pub struct VolumeReport {
    pub root: PathBuf,
    pub mount_point: PathBuf,
    pub volume: VolumeInformation,
    pub space: DiskFreeSpace,
}

/// Query volume information and free space through the driver.
pub fn run_volume_info(config: &HostConfig) -> Result<VolumeReport> {
    let mount = LoopbackMount::start(config)?;
    let volume = match mount.driver().call(Request::GetVolumeInformation)? {
        Response {
            reply: Reply::Volume(volume),
            ..
        } => volume,
        other => anyhow::bail!("volume information failed: {}", other.status),
    };
    let space = match mount.driver().call(Request::GetDiskFreeSpace)? {
        Response {
            reply: Reply::DiskFreeSpace(space),
            ..
        } => space,
        other => anyhow::bail!("disk free space failed: {}", other.status),
    };
    mount.finish()?;
    Ok(VolumeReport {
        root: config.mirror.root.clone(),
        mount_point: config.mount_point(),
        volume,
        space,
    })
}
