//! Lifecycle manager: process-wide setup and teardown.
//!
//! At most one diagnostics context is active per process. Initialization
//! acquires, in order: the log file, its lock, the dump queue, the dump
//! worker and the two signal handlers. Every acquired stage pushes its
//! cleanup onto a [`Rollback`] stack. A failed stage unwinds the stack LIFO;
//! a committed context keeps the stack and teardown unwinds it.
//!
//! Transitions never wait. A concurrent or repeated call fails with
//! `AlreadyActive`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::config::DiagConfig;
use crate::control::ControlSignal;
use crate::error::{DiagError, Result};
use crate::files::{self, FileKind};
use crate::queue::{DumpSender, dump_queue};
use crate::signal;
use crate::snapshot::select_producer;
use crate::state;
use crate::types::LogLevel;
use crate::worker::DumpWorker;
use crate::writer;

/// Initialization stages, in acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStage {
    /// Creating the run log.
    LogFile,
    /// Locking the run log.
    FileLock,
    /// Creating the dump queue.
    DumpQueue,
    /// Starting the dump worker.
    DumpWorker,
    /// Installing the level handler.
    LevelHandler,
    /// Installing the dump handler.
    DumpHandler,
}

impl InitStage {
    /// All stages, in acquisition order.
    pub const ALL: [Self; 6] = [
        Self::LogFile,
        Self::FileLock,
        Self::DumpQueue,
        Self::DumpWorker,
        Self::LevelHandler,
        Self::DumpHandler,
    ];
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LogFile => "log-file",
            Self::FileLock => "file-lock",
            Self::DumpQueue => "dump-queue",
            Self::DumpWorker => "dump-worker",
            Self::LevelHandler => "level-handler",
            Self::DumpHandler => "dump-handler",
        };
        f.write_str(name)
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// LIFO stack of cleanup actions for acquired stages.
///
/// Unwinds on drop.
#[derive(Default)]
pub struct Rollback {
    steps: Vec<(InitStage, Cleanup)>,
}

impl Rollback {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the cleanup for an acquired `stage`.
    pub fn push(&mut self, stage: InitStage, cleanup: impl FnOnce() + Send + 'static) {
        self.steps.push((stage, Box::new(cleanup)));
    }

    /// Stages acquired so far, in acquisition order.
    #[must_use]
    pub fn stages(&self) -> Vec<InitStage> {
        self.steps.iter().map(|(stage, _)| *stage).collect()
    }

    /// Runs every cleanup, most recent first.
    pub fn unwind(&mut self) {
        while let Some((stage, cleanup)) = self.steps.pop() {
            tracing::debug!(%stage, "releasing");
            cleanup();
        }
    }
}

impl fmt::Debug for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rollback")
            .field("stages", &self.stages())
            .finish()
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        self.unwind();
    }
}

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const ACTIVE: u8 = 2;
const TEARING_DOWN: u8 = 3;

static LIFECYCLE: AtomicU8 = AtomicU8::new(UNINIT);

/// Resources owned by the active context. The writer owns the log file.
struct Context {
    log_path: Option<PathBuf>,
    backend: Option<&'static str>,
    sender: Option<DumpSender>,
    worker: Option<DumpWorker>,
    cleanup: Option<Rollback>,
}

static CONTEXT: Mutex<Context> = Mutex::new(Context {
    log_path: None,
    backend: None,
    sender: None,
    worker: None,
    cleanup: None,
});

/// Initializes diagnostics with default settings, writing into `path` (or
/// the working directory).
///
/// # Errors
/// See [`initialize_with`].
pub fn initialize(path: Option<&Path>) -> Result<()> {
    let config = DiagConfig {
        log_dir: path.map(Path::to_path_buf),
        ..DiagConfig::default()
    };
    initialize_with(config)
}

/// Initializes diagnostics from `config`.
///
/// On success the level is MAX and both control signals are live.
///
/// # Errors
/// - `AlreadyActive` if a context is active or a transition is in flight.
/// - `InvalidArgument` if the configuration is invalid.
/// - `FileError`, `SyncError` or `WorkerStartError` if a stage fails; every
///   earlier stage has been released when this returns.
pub fn initialize_with(config: DiagConfig) -> Result<()> {
    if LIFECYCLE
        .compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(DiagError::AlreadyActive);
    }

    match acquire(&config) {
        Ok(()) => {
            state::store_level(LogLevel::Max);
            LIFECYCLE.store(ACTIVE, Ordering::Release);
            tracing::info!("diagnostics initialized");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "diagnostics initialization failed");
            LIFECYCLE.store(UNINIT, Ordering::Release);
            Err(e)
        }
    }
}

/// Runs every stage. On error the local rollback stack is dropped, which
/// releases whatever was acquired.
fn acquire(config: &DiagConfig) -> Result<()> {
    config.validate()?;
    let dir = config.effective_log_dir();
    let mut rollback = Rollback::new();

    inject_fault(config, InitStage::LogFile)?;
    let log_path = files::output_path(&dir, FileKind::Log);
    let file = files::open_log_file(&log_path)?;
    drop(writer::install_sink(file));
    rollback.push(InitStage::LogFile, || drop(writer::take_sink()));
    tracing::debug!(path = %log_path.display(), "log file opened");

    if config.remount_for_mandatory_lock {
        let status = files::ensure_mandatory_locking(Path::new("/"));
        tracing::debug!(enabled = status.is_enabled(), ?status, "mandatory locking");
    }
    let producer = select_producer(&config.pmap_program);
    let backend = producer.name();

    inject_fault(config, InitStage::FileLock)?;
    writer::with_sink(files::lock_file)
        .unwrap_or_else(|| Err(DiagError::sync("log file vanished before locking")))?;
    rollback.push(InitStage::FileLock, || {
        if let Some(Err(e)) = writer::with_sink(files::unlock_file) {
            tracing::warn!(error = %e, "failed to unlock log file");
        }
    });

    inject_fault(config, InitStage::DumpQueue)?;
    let (sender, receiver) = dump_queue()?;
    if let Some(capacity) = sender.capacity() {
        tracing::debug!(capacity, "dump queue created");
    }
    state::attach_dump_sender(sender.raw_fd());
    CONTEXT.lock().sender = Some(sender);
    rollback.push(InitStage::DumpQueue, || {
        state::detach_dump_sender();
        state::quiesce_handlers();
        drop(CONTEXT.lock().sender.take());
    });

    inject_fault(config, InitStage::DumpWorker)?;
    let worker = DumpWorker::spawn(receiver, producer, dir)?;
    CONTEXT.lock().worker = Some(worker);
    rollback.push(InitStage::DumpWorker, stop_worker);

    signal::unblock_control_signals()?;

    inject_fault(config, InitStage::LevelHandler)?;
    signal::install_handler(ControlSignal::Level)?;
    rollback.push(InitStage::LevelHandler, || {
        restore(ControlSignal::Level);
        // No level handler can run past this point, so OFF sticks
        state::quiesce_handlers();
        state::store_level(LogLevel::Off);
    });

    inject_fault(config, InitStage::DumpHandler)?;
    signal::install_handler(ControlSignal::Dump)?;
    rollback.push(InitStage::DumpHandler, || restore(ControlSignal::Dump));

    let mut ctx = CONTEXT.lock();
    ctx.log_path = Some(log_path);
    ctx.backend = Some(backend);
    ctx.cleanup = Some(rollback);
    Ok(())
}

/// Cancels the worker, wakes it by closing the queue write end, then joins.
///
/// The write end closes only once no dump handler can still hold its
/// descriptor number.
fn stop_worker() {
    let (worker, sender) = {
        let mut ctx = CONTEXT.lock();
        (ctx.worker.take(), ctx.sender.take())
    };
    state::detach_dump_sender();
    state::quiesce_handlers();
    if let Some(worker) = worker {
        worker.cancel();
        drop(sender);
        worker.join();
    }
}

fn restore(signal: ControlSignal) {
    if let Err(e) = signal::restore_default(signal) {
        tracing::warn!(error = %e, "failed to restore signal disposition");
    }
}

#[cfg(any(test, feature = "fault-injection"))]
fn inject_fault(config: &DiagConfig, stage: InitStage) -> Result<()> {
    if config.fail_at != Some(stage) {
        return Ok(());
    }
    tracing::debug!(%stage, "injected failure");
    let reason = format!("injected failure at {stage}");
    Err(match stage {
        InitStage::LogFile => DiagError::file(
            config.effective_log_dir(),
            std::io::Error::other(reason),
        ),
        InitStage::DumpWorker => DiagError::WorkerStart(std::io::Error::other(reason)),
        InitStage::FileLock
        | InitStage::DumpQueue
        | InitStage::LevelHandler
        | InitStage::DumpHandler => DiagError::sync(reason),
    })
}

#[cfg(not(any(test, feature = "fault-injection")))]
#[allow(clippy::unnecessary_wraps)]
const fn inject_fault(_config: &DiagConfig, _stage: InitStage) -> Result<()> {
    Ok(())
}

/// Tears the active context down.
///
/// Restores default dispositions, stops the worker (killing an in-flight
/// snapshot), closes the queue, unlocks and closes the log file and resets
/// the level to OFF.
///
/// # Errors
/// Returns `AlreadyActive` if no context is active or a transition is in
/// flight.
pub fn teardown() -> Result<()> {
    if LIFECYCLE
        .compare_exchange(ACTIVE, TEARING_DOWN, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(DiagError::AlreadyActive);
    }

    // Silences the worker's reports while it stops
    state::store_level(LogLevel::Off);
    let cleanup = {
        let mut ctx = CONTEXT.lock();
        ctx.log_path = None;
        ctx.backend = None;
        ctx.cleanup.take()
    };
    if let Some(mut cleanup) = cleanup {
        cleanup.unwind();
    }

    LIFECYCLE.store(UNINIT, Ordering::Release);
    tracing::info!("diagnostics torn down");
    Ok(())
}

/// Returns true while a context is active.
#[must_use]
pub fn is_active() -> bool {
    LIFECYCLE.load(Ordering::Acquire) == ACTIVE
}

/// Path of the active run log.
#[must_use]
pub fn log_file_path() -> Option<PathBuf> {
    CONTEXT.lock().log_path.clone()
}

/// Name of the snapshot backend picked at initialization.
#[must_use]
pub fn snapshot_backend() -> Option<&'static str> {
    CONTEXT.lock().backend
}
