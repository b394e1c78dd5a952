// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-process driver serving an [`OperationTable`] from a worker pool.
//!
//! Callers submit a [`Request`]; one of `thread_count` workers pops it from a
//! lock-free queue, invokes the matching callback and sends a [`Response`]
//! back over a channel. Callbacks therefore run concurrently, the way a
//! kernel driver delivers them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use mirrorfs_core::dispatcher::matches_pattern;
use mirrorfs_core::{
    CreateOutcome, CreateRequest, DiskFreeSpace, Driver, DriverError, ErrorCode, FileContext,
    FileInformation, FileTime, FindData, MountOptions, OpResult, OperationTable, VolumeInformation,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

/// Generic driver failure.
pub const DRIVER_ERROR: i32 = -1;
/// Workers could not be started.
pub const START_ERROR: i32 = -4;
/// The driver is already serving a mount.
pub const MOUNT_ERROR: i32 = -5;
/// Nothing is mounted at the given mount point.
pub const MOUNT_POINT_ERROR: i32 = -6;

/// Capacity, in UTF-16 units, of the volume and file system name buffers.
pub const NAME_BUFFER_CAPACITY: usize = 261;

const IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Clone, Debug)]
pub enum Request {
    CreateFile {
        path: String,
        request: CreateRequest,
        context: FileContext,
    },
    ReadFile {
        path: String,
        offset: u64,
        length: usize,
        context: FileContext,
    },
    WriteFile {
        path: String,
        offset: u64,
        data: Vec<u8>,
        context: FileContext,
    },
    FlushFileBuffers {
        path: String,
        context: FileContext,
    },
    GetFileInformation {
        path: String,
        context: FileContext,
    },
    FindFiles {
        path: String,
        pattern: Option<String>,
        context: FileContext,
    },
    SetFileAttributes {
        path: String,
        attributes: u32,
        context: FileContext,
    },
    SetFileTime {
        path: String,
        creation: FileTime,
        last_access: FileTime,
        last_write: FileTime,
        context: FileContext,
    },
    DeleteFile {
        path: String,
        context: FileContext,
    },
    DeleteDirectory {
        path: String,
        context: FileContext,
    },
    MoveFile {
        path: String,
        new_path: String,
        replace_if_existing: bool,
        context: FileContext,
    },
    SetEndOfFile {
        path: String,
        length: u64,
        context: FileContext,
    },
    SetAllocationSize {
        path: String,
        length: u64,
        context: FileContext,
    },
    LockFile {
        path: String,
        offset: u64,
        length: u64,
        context: FileContext,
    },
    UnlockFile {
        path: String,
        offset: u64,
        length: u64,
        context: FileContext,
    },
    Cleanup {
        path: String,
        context: FileContext,
    },
    CloseFile {
        path: String,
        context: FileContext,
    },
    GetDiskFreeSpace,
    GetVolumeInformation,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::CreateFile { .. } => "create_file",
            Request::ReadFile { .. } => "read_file",
            Request::WriteFile { .. } => "write_file",
            Request::FlushFileBuffers { .. } => "flush_file_buffers",
            Request::GetFileInformation { .. } => "get_file_information",
            Request::FindFiles { .. } => "find_files",
            Request::SetFileAttributes { .. } => "set_file_attributes",
            Request::SetFileTime { .. } => "set_file_time",
            Request::DeleteFile { .. } => "delete_file",
            Request::DeleteDirectory { .. } => "delete_directory",
            Request::MoveFile { .. } => "move_file",
            Request::SetEndOfFile { .. } => "set_end_of_file",
            Request::SetAllocationSize { .. } => "set_allocation_size",
            Request::LockFile { .. } => "lock_file",
            Request::UnlockFile { .. } => "unlock_file",
            Request::Cleanup { .. } => "cleanup",
            Request::CloseFile { .. } => "close_file",
            Request::GetDiskFreeSpace => "get_disk_free_space",
            Request::GetVolumeInformation => "get_volume_information",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    None,
    Created(CreateOutcome),
    Data(Vec<u8>),
    Written(usize),
    Information(FileInformation),
    Entries(Vec<FindData>),
    DiskFreeSpace(DiskFreeSpace),
    Volume(VolumeInformation),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: ErrorCode,
    pub reply: Reply,
    /// The request's context as the callback left it.
    pub context: FileContext,
}

impl Response {
    fn new(status: ErrorCode, reply: Reply, context: FileContext) -> Self {
        Self {
            status,
            reply,
            context,
        }
    }

    fn not_implemented(context: FileContext) -> Self {
        Self::new(ErrorCode::CALL_NOT_IMPLEMENTED, Reply::None, context)
    }
}

struct Job {
    request: Request,
    reply: mpsc::Sender<Response>,
}

struct Queue {
    jobs: SegQueue<Job>,
    pending: Mutex<bool>,
    wake: Condvar,
    shutdown: AtomicBool,
}

impl Queue {
    fn push(&self, job: Job) {
        self.jobs.push(job);
        *self.pending.lock() = true;
        self.wake.notify_one();
    }

    /// Worker loop. Drains the queue before honouring shutdown.
    fn serve(&self, operations: &OperationTable) {
        loop {
            match self.jobs.pop() {
                Some(job) => {
                    let response = dispatch(operations, job.request);
                    // The caller may have stopped waiting.
                    let _ = job.reply.send(response);
                }
                None => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    let mut pending = self.pending.lock();
                    if !*pending {
                        self.wake.wait_for(&mut pending, IDLE_WAIT);
                    }
                    *pending = false;
                }
            }
        }
    }

    fn stop(&self, workers: Vec<JoinHandle<()>>) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_all();
        for worker in workers {
            if worker.join().is_err() {
                warn!(target: "mirrorfs::loopback", "worker panicked");
            }
        }
    }
}

#[derive(Default)]
struct Session {
    mount_point: Option<PathBuf>,
    timeout: Duration,
    stop_requested: bool,
}

impl Session {
    fn accepting(&self) -> bool {
        self.mount_point.is_some() && !self.stop_requested
    }
}

/// A [`Driver`] that serves requests submitted from the same process.
pub struct LoopbackDriver {
    queue: Arc<Queue>,
    session: Mutex<Session>,
    session_changed: Condvar,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Queue {
                jobs: SegQueue::new(),
                pending: Mutex::new(false),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            session: Mutex::new(Session::default()),
            session_changed: Condvar::new(),
        }
    }

    /// Whether a mount is currently accepting requests.
    pub fn is_serving(&self) -> bool {
        self.session.lock().accepting()
    }

    /// Queue `request`; its response arrives on the returned channel.
    pub fn submit(&self, request: Request) -> Result<mpsc::Receiver<Response>, DriverError> {
        self.enqueue(request).map(|(receiver, _)| receiver)
    }

    /// Submit `request` and wait for its response, up to the mount's
    /// request timeout.
    pub fn call(&self, request: Request) -> Result<Response, DriverError> {
        let kind = request.kind();
        let (receiver, timeout) = self.enqueue(request)?;
        receiver.recv_timeout(timeout).map_err(|err| match err {
            mpsc::RecvTimeoutError::Timeout => {
                DriverError::new(DRIVER_ERROR, format!("{kind} timed out after {timeout:?}"))
            }
            mpsc::RecvTimeoutError::Disconnected => {
                DriverError::new(DRIVER_ERROR, format!("{kind} was dropped by the driver"))
            }
        })
    }

    fn enqueue(
        &self,
        request: Request,
    ) -> Result<(mpsc::Receiver<Response>, Duration), DriverError> {
        let session = self.session.lock();
        if !session.accepting() {
            return Err(DriverError::new(MOUNT_POINT_ERROR, "driver is not serving a mount"));
        }
        let (reply, receiver) = mpsc::channel();
        // Pushed under the session lock so shutdown never strands a job.
        self.queue.push(Job { request, reply });
        Ok((receiver, session.timeout))
    }

    fn spawn_workers(
        &self,
        operations: &Arc<OperationTable>,
        count: u16,
    ) -> Result<Vec<JoinHandle<()>>, DriverError> {
        let mut workers = Vec::with_capacity(usize::from(count));
        for index in 0..count {
            let queue = Arc::clone(&self.queue);
            let operations = Arc::clone(operations);
            let spawned = thread::Builder::new()
                .name(format!("mirrorfs-worker-{index}"))
                .spawn(move || queue.serve(&operations));
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    self.queue.stop(workers);
                    return Err(DriverError::new(
                        START_ERROR,
                        format!("failed to spawn worker {index}: {err}"),
                    ));
                }
            }
        }
        Ok(workers)
    }
}

impl Driver for LoopbackDriver {
    fn run(
        &self,
        operations: OperationTable,
        mount_point: &Path,
        options: &MountOptions,
    ) -> Result<(), DriverError> {
        {
            let mut session = self.session.lock();
            if let Some(active) = &session.mount_point {
                return Err(DriverError::new(
                    MOUNT_ERROR,
                    format!("already serving {}", active.display()),
                ));
            }
            *session = Session {
                mount_point: Some(mount_point.to_path_buf()),
                timeout: Duration::from_millis(options.timeout_ms),
                stop_requested: false,
            };
        }
        self.queue.shutdown.store(false, Ordering::Release);

        let operations = Arc::new(operations);
        let workers = match self.spawn_workers(&operations, options.thread_count.max(1)) {
            Ok(workers) => workers,
            Err(err) => {
                *self.session.lock() = Session::default();
                return Err(err);
            }
        };

        info!(target: "mirrorfs::loopback", mount_point = %mount_point.display(),
            threads = workers.len(), callbacks = ?operations.implemented(), "serving");
        if let Some(mounted) = &operations.mounted {
            if let Err(status) = mounted() {
                warn!(target: "mirrorfs::loopback", %status, "mounted callback failed");
            }
        }

        {
            let mut session = self.session.lock();
            while !session.stop_requested {
                self.session_changed.wait(&mut session);
            }
        }
        self.queue.stop(workers);
        if let Some(unmounted) = &operations.unmounted {
            if let Err(status) = unmounted() {
                warn!(target: "mirrorfs::loopback", %status, "unmounted callback failed");
            }
        }
        *self.session.lock() = Session::default();
        info!(target: "mirrorfs::loopback", mount_point = %mount_point.display(), "stopped");
        Ok(())
    }

    fn unmount(&self, mount_point: &Path) -> Result<(), DriverError> {
        let mut session = self.session.lock();
        match &session.mount_point {
            Some(active) if active == mount_point => {
                debug!(target: "mirrorfs::loopback", mount_point = %mount_point.display(),
                    "unmount requested");
                session.stop_requested = true;
                self.session_changed.notify_all();
                Ok(())
            }
            _ => Err(DriverError::new(
                MOUNT_POINT_ERROR,
                format!("nothing mounted at {}", mount_point.display()),
            )),
        }
    }
}

/// Invoke `callback` if the table has it.
fn answer<F: ?Sized>(
    callback: &Option<Box<F>>,
    context: FileContext,
    call: impl FnOnce(&F) -> OpResult<Reply>,
) -> Response {
    let Some(callback) = callback else {
        return Response::not_implemented(context);
    };
    match call(&**callback) {
        Ok(reply) => Response::new(ErrorCode::SUCCESS, reply, context),
        Err(status) => Response::new(status, Reply::None, context),
    }
}

/// A successful delete check marks the context so cleanup removes the file.
fn delete_pending(mut response: Response) -> Response {
    if response.status.is_success() {
        response.context.delete_on_close = true;
    }
    response
}

fn dispatch(operations: &OperationTable, request: Request) -> Response {
    trace!(target: "mirrorfs::loopback", kind = request.kind(), "dispatch");
    match request {
        Request::CreateFile {
            path,
            request,
            mut context,
        } => {
            let Some(create) = &operations.create_file else {
                return Response::not_implemented(context);
            };
            let outcome = create(&path, &request, &mut context);
            Response::new(outcome.status, Reply::Created(outcome), context)
        }
        Request::ReadFile {
            path,
            offset,
            length,
            context,
        } => answer(&operations.read_file, context, |read| {
            let mut buffer = vec![0u8; length];
            let n = read(&path, &mut buffer, offset, &context)?;
            buffer.truncate(n);
            Ok(Reply::Data(buffer))
        }),
        Request::WriteFile {
            path,
            offset,
            data,
            context,
        } => answer(&operations.write_file, context, |write| {
            write(&path, &data, offset, &context).map(Reply::Written)
        }),
        Request::FlushFileBuffers { path, context } => {
            answer(&operations.flush_file_buffers, context, |flush| {
                flush(&path, &context).map(|()| Reply::None)
            })
        }
        Request::GetFileInformation { path, context } => {
            answer(&operations.get_file_information, context, |info| {
                info(&path, &context).map(Reply::Information)
            })
        }
        Request::FindFiles {
            path,
            pattern,
            context,
        } => find_files(operations, &path, pattern.as_deref(), context),
        Request::SetFileAttributes {
            path,
            attributes,
            context,
        } => answer(&operations.set_file_attributes, context, |set| {
            set(&path, attributes, &context).map(|()| Reply::None)
        }),
        Request::SetFileTime {
            path,
            creation,
            last_access,
            last_write,
            context,
        } => answer(&operations.set_file_time, context, |set| {
            set(&path, creation, last_access, last_write, &context).map(|()| Reply::None)
        }),
        Request::DeleteFile { path, context } => {
            delete_pending(answer(&operations.delete_file, context, |delete| {
                delete(&path, &context).map(|()| Reply::None)
            }))
        }
        Request::DeleteDirectory { path, context } => {
            delete_pending(answer(&operations.delete_directory, context, |delete| {
                delete(&path, &context).map(|()| Reply::None)
            }))
        }
        Request::MoveFile {
            path,
            new_path,
            replace_if_existing,
            context,
        } => answer(&operations.move_file, context, |rename| {
            rename(&path, &new_path, replace_if_existing, &context).map(|()| Reply::None)
        }),
        Request::SetEndOfFile {
            path,
            length,
            context,
        } => answer(&operations.set_end_of_file, context, |set| {
            set(&path, length, &context).map(|()| Reply::None)
        }),
        Request::SetAllocationSize {
            path,
            length,
            context,
        } => answer(&operations.set_allocation_size, context, |set| {
            set(&path, length, &context).map(|()| Reply::None)
        }),
        Request::LockFile {
            path,
            offset,
            length,
            context,
        } => answer(&operations.lock_file, context, |lock| {
            lock(&path, offset, length, &context).map(|()| Reply::None)
        }),
        Request::UnlockFile {
            path,
            offset,
            length,
            context,
        } => answer(&operations.unlock_file, context, |unlock| {
            unlock(&path, offset, length, &context).map(|()| Reply::None)
        }),
        Request::Cleanup { path, mut context } => match &operations.cleanup {
            Some(cleanup) => {
                cleanup(&path, &mut context);
                Response::new(ErrorCode::SUCCESS, Reply::None, context)
            }
            None => Response::not_implemented(context),
        },
        Request::CloseFile { path, mut context } => match &operations.close_file {
            Some(close) => {
                close(&path, &mut context);
                Response::new(ErrorCode::SUCCESS, Reply::None, context)
            }
            None => Response::not_implemented(context),
        },
        Request::GetDiskFreeSpace => {
            answer(&operations.get_disk_free_space, FileContext::default(), |space| {
                space().map(Reply::DiskFreeSpace)
            })
        }
        Request::GetVolumeInformation => {
            answer(&operations.get_volume_information, FileContext::default(), |volume| {
                volume().map(|info| {
                    Reply::Volume(info.truncated(NAME_BUFFER_CAPACITY, NAME_BUFFER_CAPACITY))
                })
            })
        }
    }
}

/// Enumerate with the provider's pattern support, or filter a full listing
/// here when the provider only lists.
fn find_files(
    operations: &OperationTable,
    path: &str,
    pattern: Option<&str>,
    context: FileContext,
) -> Response {
    let mut entries = Vec::new();
    let result = match (pattern, &operations.find_files_with_pattern, &operations.find_files) {
        (Some(pattern), Some(find), _) => find(path, pattern, &context, &mut |e| entries.push(e)),
        (pattern, _, Some(find)) => find(path, &context, &mut |entry| {
            if pattern.map_or(true, |p| matches_pattern(&entry.file_name, p)) {
                entries.push(entry);
            }
        }),
        (_, _, None) => return Response::not_implemented(context),
    };
    match result {
        Ok(()) => Response::new(ErrorCode::SUCCESS, Reply::Entries(entries), context),
        Err(status) => Response::new(status, Reply::None, context),
    }
}
