//! Dispatch client: sends control messages to a process.
//!
//! Delivery success only means the kernel queued the signal. Nothing checks
//! whether the target has a diagnostics context installed; a target without
//! one gets the default action for a real-time signal, which terminates it.

use libc::pid_t;
use nix::errno::Errno;

use crate::control::{ControlMessage, ControlSignal};
use crate::error::{DiagError, Result};
use crate::signal::int_sigval;
use crate::types::{DumpLevel, LogLevel};

/// Asks `pid` (0 = this process) to switch to `level`.
///
/// # Errors
/// Returns `InvalidArgument` for a negative pid and `SyncError` if the
/// signal could not be queued.
pub fn dispatch_level(pid: pid_t, level: LogLevel) -> Result<()> {
    send(pid, ControlMessage::SetLevel(level))
}

/// Asks `pid` (0 = this process) to write a dump at `level`.
///
/// # Errors
/// Returns `InvalidArgument` for a negative pid and `SyncError` if the
/// signal could not be queued.
pub fn dispatch_dump(pid: pid_t, level: DumpLevel) -> Result<()> {
    send(pid, ControlMessage::RequestDump(level))
}

/// Sends any control message.
///
/// # Errors
/// See [`dispatch_level`].
pub fn send(pid: pid_t, message: ControlMessage) -> Result<()> {
    let (signal, payload) = message.encode();
    send_raw_payload(pid, signal, payload)
}

/// Queues `signal` with an arbitrary integer payload, valid or not.
///
/// Receivers drop payloads outside the signal's domain; this is the way to
/// exercise that path.
///
/// # Errors
/// See [`dispatch_level`].
#[allow(unsafe_code)]
pub fn send_raw_payload(pid: pid_t, signal: ControlSignal, payload: i32) -> Result<()> {
    let target = resolve_pid(pid)?;
    let value = int_sigval(payload);

    // SAFETY: sigqueue(2) only reads its arguments; the payload is never
    // dereferenced.
    let rc = unsafe { libc::sigqueue(target, signal.number(), value) };
    if rc != 0 {
        let errno = Errno::last();
        return Err(DiagError::sync(format!(
            "failed to queue {} signal to pid {target}: {errno}",
            signal.name()
        )));
    }

    tracing::trace!(pid = target, signal = signal.name(), payload, "control signal queued");
    Ok(())
}

fn resolve_pid(pid: pid_t) -> Result<pid_t> {
    match pid {
        0 => Ok(nix::unistd::getpid().as_raw()),
        p if p > 0 => Ok(p),
        p => Err(DiagError::invalid_argument(format!(
            "pid must be positive or 0 for self, got {p}"
        ))),
    }
}
