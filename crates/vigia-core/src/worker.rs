//! Dump worker: turns queued dump requests into snapshot files.
//!
//! Runs on its own named thread for the lifetime of the active context. It
//! blocks on the queue, writes one DUMP file per request and reports every
//! outcome through the writer at MIN. A failed snapshot never stops the
//! loop; end of stream or cancellation does.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crate::error::{DiagError, Result};
use crate::files::{FileKind, output_path};
use crate::queue::DumpReceiver;
use crate::snapshot::{CancelFlag, SnapshotError, SnapshotProducer};
use crate::types::{DumpLevel, LogLevel};
use crate::vigia_log;

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "vigia-dump";

/// Handle to the running dump worker.
#[derive(Debug)]
pub struct DumpWorker {
    handle: JoinHandle<()>,
    cancel: CancelFlag,
}

impl DumpWorker {
    /// Starts the worker.
    ///
    /// # Errors
    /// Returns `WorkerStartError` if the thread cannot be spawned.
    pub fn spawn(
        receiver: DumpReceiver,
        producer: Box<dyn SnapshotProducer>,
        dump_dir: PathBuf,
    ) -> Result<Self> {
        let cancel = CancelFlag::new();
        let loop_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(&receiver, producer.as_ref(), &dump_dir, &loop_cancel))
            .map_err(DiagError::WorkerStart)?;

        tracing::debug!(thread = WORKER_THREAD_NAME, "dump worker started");
        Ok(Self { handle, cancel })
    }

    /// Asks the worker to stop and kills an in-flight snapshot command.
    ///
    /// The worker only notices once it is woken, so the queue write end must
    /// be closed before [`join`](Self::join).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true while the worker thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Waits for the worker thread to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("dump worker panicked");
        } else {
            tracing::debug!("dump worker stopped");
        }
    }
}

fn run(
    receiver: &DumpReceiver,
    producer: &dyn SnapshotProducer,
    dump_dir: &Path,
    cancel: &CancelFlag,
) {
    let pid = std::process::id();
    loop {
        let byte = match receiver.recv() {
            Ok(Some(byte)) => byte,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "dump queue failed; worker exiting");
                break;
            }
        };
        if cancel.is_cancelled() {
            break;
        }

        let Some(level) = DumpLevel::from_byte(byte) else {
            let _ = vigia_log!(LogLevel::Min, "Unrecognized dump level [{byte}], request skipped");
            continue;
        };

        let path = output_path(dump_dir, FileKind::Dump);
        match producer.capture(pid, level, &path, cancel) {
            Ok(command) => {
                tracing::debug!(path = %path.display(), %level, "dump created");
                let _ = vigia_log!(LogLevel::Min, "Created DUMP file using command: `{command}`");
            }
            Err(SnapshotError::Cancelled) => {
                let _ = std::fs::remove_file(&path);
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, backend = producer.name(), "dump failed");
                let _ = vigia_log!(LogLevel::Min, "Failed to create DUMP file: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::dump_queue;
    use crate::snapshot::ProcMapsProducer;
    use std::time::{Duration, Instant};

    fn dump_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "DUMP"))
            .collect()
    }

    #[test]
    fn test_worker_exits_on_eof() {
        let _serial = crate::tests::serial();
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = dump_queue().unwrap();
        let worker =
            DumpWorker::spawn(rx, Box::new(ProcMapsProducer::new()), dir.path().to_path_buf())
                .unwrap();
        assert!(worker.is_running());
        drop(tx);
        worker.join();
    }

    #[test]
    fn test_worker_writes_dump_file() {
        let _serial = crate::tests::serial();
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = dump_queue().unwrap();
        let worker =
            DumpWorker::spawn(rx, Box::new(ProcMapsProducer::new()), dir.path().to_path_buf())
                .unwrap();
        assert!(tx.try_send(DumpLevel::Normal));

        let deadline = Instant::now() + Duration::from_secs(5);
        while dump_files(dir.path()).is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        drop(tx);
        worker.join();

        let files = dump_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(std::fs::metadata(&files[0]).unwrap().len() > 0);
    }

    #[test]
    fn test_worker_skips_unknown_bytes() {
        let _serial = crate::tests::serial();
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = dump_queue().unwrap();
        let worker =
            DumpWorker::spawn(rx, Box::new(ProcMapsProducer::new()), dir.path().to_path_buf())
                .unwrap();
        assert!(crate::queue::write_byte(tx.raw_fd(), 0xff));
        drop(tx);
        worker.join();
        assert!(dump_files(dir.path()).is_empty());
    }

    #[test]
    fn test_cancel_before_request_discards_it() {
        let _serial = crate::tests::serial();
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = dump_queue().unwrap();
        let worker =
            DumpWorker::spawn(rx, Box::new(ProcMapsProducer::new()), dir.path().to_path_buf())
                .unwrap();
        worker.cancel();
        assert!(tx.try_send(DumpLevel::Full));
        drop(tx);
        worker.join();
        assert!(dump_files(dir.path()).is_empty());
    }
}
