//! Lock-free cells shared with signal handlers.
//!
//! These are the only values restricted-context code touches. Each is a
//! single atomic word, so reads and writes are indivisible without a lock.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use crate::types::LogLevel;

const NO_FD: RawFd = -1;

/// Current verbosity. Written only by the lifecycle manager and the level
/// handler.
static CURRENT_LEVEL: AtomicI32 = AtomicI32::new(LogLevel::Off as i32);

/// Write end of the dump queue as seen by the dump handler.
static DUMP_SENDER_FD: AtomicI32 = AtomicI32::new(NO_FD);

/// Handlers currently executing, on any thread.
static HANDLERS_IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Returns the current log level.
#[must_use]
pub fn current_level() -> LogLevel {
    LogLevel::from_raw(CURRENT_LEVEL.load(Ordering::Acquire)).unwrap_or(LogLevel::Off)
}

/// Stores a new level. Signal-safe.
pub(crate) fn store_level(level: LogLevel) {
    CURRENT_LEVEL.store(level.as_raw(), Ordering::Release);
}

/// Publishes the queue write end to the dump handler.
pub(crate) fn attach_dump_sender(fd: RawFd) {
    DUMP_SENDER_FD.store(fd, Ordering::SeqCst);
}

/// Withdraws the queue write end.
///
/// A handler on another thread may already have loaded the old number.
/// Call [`quiesce_handlers`] before closing the descriptor so that number
/// cannot be reused under it.
pub(crate) fn detach_dump_sender() {
    DUMP_SENDER_FD.store(NO_FD, Ordering::SeqCst);
}

/// Queue write end for the dump handler, if attached. Signal-safe.
pub(crate) fn dump_sender_fd() -> Option<RawFd> {
    let fd = DUMP_SENDER_FD.load(Ordering::SeqCst);
    (fd != NO_FD).then_some(fd)
}

/// Marks a handler as running until dropped. Signal-safe.
pub(crate) struct HandlerGuard(());

impl HandlerGuard {
    pub(crate) fn enter() -> Self {
        HANDLERS_IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
        Self(())
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        HANDLERS_IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Waits until no handler is running.
///
/// A handler entered after this returns observes every store made before
/// the call. Handlers never block, so the wait is short.
pub(crate) fn quiesce_handlers() {
    while HANDLERS_IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_quiesce_waits_for_running_handler() {
        let _serial = crate::tests::serial();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handler = std::thread::spawn(move || {
            let _guard = HandlerGuard::enter();
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        entered_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let closer = std::thread::spawn(move || {
            quiesce_handlers();
            done_tx.send(()).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handler.join().unwrap();
        closer.join().unwrap();
    }

    #[test]
    fn test_quiesce_without_handlers_returns() {
        let _serial = crate::tests::serial();
        quiesce_handlers();
    }

    #[test]
    fn test_detached_sender_is_none() {
        let _serial = crate::tests::serial();
        attach_dump_sender(7);
        assert_eq!(dump_sender_fd(), Some(7));
        detach_dump_sender();
        assert_eq!(dump_sender_fd(), None);
    }
}
