//! Snapshot producers: the mechanisms that write dump content.
//!
//! Two implementations exist. [`PmapProducer`] runs the external `pmap`
//! tool with a detail flag derived from the dump level. [`ProcMapsProducer`]
//! copies `/proc/<pid>/maps` and has a single fidelity. The choice is made
//! once by [`select_producer`] and never revisited.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::types::DumpLevel;

/// How often a running snapshot command is checked for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot failure.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot command ran and reported failure.
    #[error("command `{command}` returned code [{}]", exit_code(.status))]
    Exit {
        /// Command line.
        command: String,
        /// Exit status.
        status: ExitStatus,
    },

    /// The snapshot command could not be started.
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        /// Command line.
        command: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Reading the source or writing the dump failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Teardown stopped the snapshot.
    #[error("snapshot cancelled")]
    Cancelled,
}

fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// Cooperative cancellation flag shared between teardown and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A capability that writes a memory-map snapshot of `pid` into `dest`.
pub trait SnapshotProducer: Send + Sync {
    /// Short backend name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Writes the snapshot.
    ///
    /// Returns a description of the command used on success.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] if the snapshot could not be written or was
    /// cancelled.
    fn capture(
        &self,
        pid: u32,
        level: DumpLevel,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<String, SnapshotError>;
}

/// Runs the external `pmap` tool.
#[derive(Debug, Clone)]
pub struct PmapProducer {
    program: String,
}

impl PmapProducer {
    /// Creates a producer running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for `pid` at `level`.
    #[must_use]
    pub fn args(level: DumpLevel, pid: u32) -> Vec<String> {
        level
            .pmap_flag()
            .map(str::to_string)
            .into_iter()
            .chain(std::iter::once(pid.to_string()))
            .collect()
    }
}

impl SnapshotProducer for PmapProducer {
    fn name(&self) -> &'static str {
        "pmap"
    }

    fn capture(
        &self,
        pid: u32,
        level: DumpLevel,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<String, SnapshotError> {
        let args = Self::args(level, pid);
        let command = format!("{} {}", self.program, args.join(" "));

        let output = File::create(dest).map_err(|source| SnapshotError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SnapshotError::Launch {
                command: command.clone(),
                source,
            })?;

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SnapshotError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(CANCEL_POLL_INTERVAL),
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SnapshotError::Launch { command, source });
                }
            }
        };

        if status.success() {
            Ok(command)
        } else {
            Err(SnapshotError::Exit { command, status })
        }
    }
}

/// Copies the kernel's per-process map listing.
#[derive(Debug, Clone, Default)]
pub struct ProcMapsProducer {
    source: Option<PathBuf>,
}

impl ProcMapsProducer {
    /// Creates a producer reading `/proc/<pid>/maps`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a producer reading a fixed file instead of procfs.
    #[must_use]
    pub fn from_source(source: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }

    fn source_for(&self, pid: u32) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/proc/{pid}/maps")))
    }
}

impl SnapshotProducer for ProcMapsProducer {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn capture(
        &self,
        pid: u32,
        _level: DumpLevel,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<String, SnapshotError> {
        let source = self.source_for(pid);
        // procfs reports a zero size, so read instead of copy
        let maps = std::fs::read(&source).map_err(|e| SnapshotError::Io {
            path: source.clone(),
            source: e,
        })?;
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let io_err = |e| SnapshotError::Io {
            path: dest.to_path_buf(),
            source: e,
        };
        let mut file = File::create(dest).map_err(io_err)?;
        file.write_all(&maps).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        Ok(format!("cat {}", source.display()))
    }
}

/// Returns true if `program -V` runs successfully.
pub fn probe_pmap(program: &str) -> bool {
    Command::new(program)
        .arg("-V")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Probes for `program` once and picks the producer.
pub fn select_producer(program: &str) -> Box<dyn SnapshotProducer> {
    if probe_pmap(program) {
        tracing::info!(program, "memory-map tool available");
        Box::new(PmapProducer::new(program))
    } else {
        tracing::info!(program, "memory-map tool not available, using procfs fallback");
        Box::new(ProcMapsProducer::new())
    }
}
