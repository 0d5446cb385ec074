//! Dump queue: a bounded single-producer/single-consumer byte channel.
//!
//! Backed by a pipe. The write end is non-blocking so the dump handler can
//! push from signal context without ever waiting; a full pipe drops the
//! request. The read end blocks and is owned by the dump worker. Both ends
//! are close-on-exec so snapshot child processes never hold the queue open.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::unistd::{pipe2, read};

use crate::error::{DiagError, Result};
use crate::types::DumpLevel;

/// Creates a connected sender/receiver pair.
///
/// # Errors
/// Returns `SyncError` if the pipe cannot be created or configured.
pub fn dump_queue() -> Result<(DumpSender, DumpReceiver)> {
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| DiagError::sync(format!("failed to create dump queue: {e}")))?;

    let flags = fcntl(write_end.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| DiagError::sync(format!("failed to read dump queue flags: {e}")))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(write_end.as_raw_fd(), FcntlArg::F_SETFL(flags))
        .map_err(|e| DiagError::sync(format!("failed to make dump queue non-blocking: {e}")))?;

    Ok((DumpSender { fd: write_end }, DumpReceiver { fd: read_end }))
}

/// Write end of the dump queue.
#[derive(Debug)]
pub struct DumpSender {
    fd: OwnedFd,
}

impl DumpSender {
    /// Raw descriptor, for publishing to the signal handler.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Pushes one request without blocking. Returns false if it was dropped.
    #[cfg(test)]
    pub(crate) fn try_send(&self, level: DumpLevel) -> bool {
        write_byte(self.raw_fd(), level.as_byte())
    }

    /// Number of bytes the queue can hold, if the platform reports it.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        pipe_capacity(self.raw_fd())
    }
}

/// Read end of the dump queue.
#[derive(Debug)]
pub struct DumpReceiver {
    fd: OwnedFd,
}

impl DumpReceiver {
    /// Blocks until one byte arrives.
    ///
    /// Returns `Ok(None)` once every write end is closed.
    ///
    /// # Errors
    /// Returns `SyncError` on a read failure other than `EINTR`.
    pub fn recv(&self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match read(self.fd.as_raw_fd(), &mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(DiagError::sync(format!("dump queue read failed: {e}"))),
            }
        }
    }
}

/// Writes a single byte with a bare `write(2)`.
///
/// Async-signal-safe: no allocation, no locks, no blocking on a
/// non-blocking descriptor.
#[allow(unsafe_code)]
pub(crate) fn write_byte(fd: RawFd, byte: u8) -> bool {
    let buf = [byte];
    // SAFETY: `buf` is a live one-byte buffer; an invalid or closed `fd`
    // only makes write(2) fail with EBADF.
    let written = unsafe { libc::write(fd, buf.as_ptr().cast(), 1) };
    written == 1
}

#[cfg(target_os = "linux")]
pub(crate) fn pipe_capacity(fd: RawFd) -> Option<usize> {
    fcntl(fd, FcntlArg::F_GETPIPE_SZ)
        .ok()
        .and_then(|size| usize::try_from(size).ok())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pipe_capacity(_fd: RawFd) -> Option<usize> {
    None
}
