//! Restricted-context handlers for the control signals.
//!
//! Handlers run as an immediate reaction to signal delivery and may preempt
//! any thread. They only decode the payload, then either store into the
//! level cell or write one byte to the dump queue. No allocation, no locks,
//! no blocking; invalid payloads and a full queue are dropped silently.

use std::ptr;

use libc::{c_int, c_void, siginfo_t};
use nix::errno::Errno;

use crate::control::{ControlMessage, ControlSignal};
use crate::error::{DiagError, Result};
use crate::queue::write_byte;
use crate::state;

type SigActionFn = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);

/// Wraps an integer payload as the `sival_int` member of a `sigval`.
#[allow(unsafe_code)]
pub(crate) fn int_sigval(payload: i32) -> libc::sigval {
    // SAFETY: an all-zero sigval is valid. Every union member starts at
    // offset 0, so the int member is the first `c_int` of the union whatever
    // the byte order.
    unsafe {
        let mut value: libc::sigval = std::mem::zeroed();
        ptr::write((&raw mut value).cast::<c_int>(), payload);
        value
    }
}

/// Reads the `sival_int` member of a `sigval`.
#[allow(unsafe_code)]
pub(crate) fn sigval_int(value: libc::sigval) -> i32 {
    // SAFETY: the union is at least as large and aligned as a c_int, and the
    // int member sits at offset 0.
    unsafe { ptr::read((&raw const value).cast::<c_int>()) }
}

/// Integer payload of a queued signal.
#[allow(unsafe_code)]
fn payload(info: *const siginfo_t) -> Option<i32> {
    if info.is_null() {
        return None;
    }
    // SAFETY: with SA_SIGINFO the kernel hands the handler a valid siginfo_t.
    let value = unsafe { (*info).si_value() };
    Some(sigval_int(value))
}

extern "C" fn on_level_signal(_signo: c_int, info: *mut siginfo_t, _ucontext: *mut c_void) {
    let _running = state::HandlerGuard::enter();
    let saved = Errno::last_raw();
    if let Some(raw) = payload(info) {
        if let Some(ControlMessage::SetLevel(level)) =
            ControlMessage::decode(ControlSignal::Level, raw)
        {
            state::store_level(level);
        }
    }
    Errno::set_raw(saved);
}

extern "C" fn on_dump_signal(_signo: c_int, info: *mut siginfo_t, _ucontext: *mut c_void) {
    let _running = state::HandlerGuard::enter();
    let saved = Errno::last_raw();
    if let Some(raw) = payload(info) {
        if let Some(ControlMessage::RequestDump(level)) =
            ControlMessage::decode(ControlSignal::Dump, raw)
        {
            if let Some(fd) = state::dump_sender_fd() {
                // Full queue or closed descriptor: dropped
                let _ = write_byte(fd, level.as_byte());
            }
        }
    }
    Errno::set_raw(saved);
}

const fn handler_for(signal: ControlSignal) -> SigActionFn {
    match signal {
        ControlSignal::Level => on_level_signal,
        ControlSignal::Dump => on_dump_signal,
    }
}

/// Installs the handler for `signal`, with every signal masked while it runs.
///
/// # Errors
/// Returns `SyncError` if `sigaction(2)` fails.
#[allow(unsafe_code)]
pub fn install_handler(signal: ControlSignal) -> Result<()> {
    // SAFETY: the sigaction struct is zero-initialized then fully set up;
    // the handler only performs async-signal-safe operations.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler_for(signal) as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigfillset(&mut action.sa_mask);
        libc::sigaction(signal.number(), &action, ptr::null_mut())
    };
    if rc != 0 {
        return Err(DiagError::sync(format!(
            "failed to install {} handler: {}",
            signal.name(),
            Errno::last()
        )));
    }
    tracing::debug!(signal = signal.name(), signo = signal.number(), "installed control handler");
    Ok(())
}

/// Restores the default disposition of `signal`.
///
/// # Errors
/// Returns `SyncError` if `sigaction(2)` fails.
#[allow(unsafe_code)]
pub fn restore_default(signal: ControlSignal) -> Result<()> {
    // SAFETY: SIG_DFL with an empty mask is always a valid disposition.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal.number(), &action, ptr::null_mut())
    };
    if rc != 0 {
        return Err(DiagError::sync(format!(
            "failed to restore {} disposition: {}",
            signal.name(),
            Errno::last()
        )));
    }
    tracing::debug!(signal = signal.name(), "restored default disposition");
    Ok(())
}

/// Unblocks both control signals for the calling thread.
///
/// # Errors
/// Returns `SyncError` if the mask cannot be changed.
#[allow(unsafe_code)]
pub fn unblock_control_signals() -> Result<()> {
    // SAFETY: the set is initialized by sigemptyset before use.
    let rc = unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for signal in ControlSignal::ALL {
            libc::sigaddset(&mut set, signal.number());
        }
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, ptr::null_mut())
    };
    if rc != 0 {
        return Err(DiagError::sync(format!(
            "failed to unblock control signals: {}",
            Errno::from_raw(rc)
        )));
    }
    Ok(())
}

/// Returns true if `signal` currently has this module's handler installed.
#[allow(unsafe_code)]
pub fn handler_installed(signal: ControlSignal) -> bool {
    // SAFETY: querying with a null new action only reads the disposition.
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signal.number(), ptr::null(), &mut current) != 0 {
            return false;
        }
        current.sa_sigaction == handler_for(signal) as libc::sighandler_t
    }
}
