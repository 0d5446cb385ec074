//! Level-filtered, append-only record writer.
//!
//! This is the only path that appends to the run log. A single coarse lock
//! serializes host messages and dump-worker reports; every record is synced
//! to storage before the lock is released.

use std::fmt;
use std::fs::File;
use std::io::Write;

use chrono::Local;
use parking_lot::Mutex;

use crate::error::{DiagError, Result};
use crate::state;
use crate::types::{LogLevel, WriteOutcome};

/// Timestamp layout used in record headers.
const HEADER_TIMESTAMP: &str = "%Y-%m-%d|%H:%M:%S";

/// The open run log. `None` while no context is active.
static SINK: Mutex<Option<File>> = Mutex::new(None);

/// Appends one record tagged `level`, if the current level admits it.
///
/// Prefer the [`vigia_log!`](crate::vigia_log) macro.
///
/// # Errors
/// - `InvalidArgument` if `level` is [`LogLevel::Off`].
/// - `AlreadyActive` if no context is active.
/// - `Other` if the record could not be written or synced.
pub fn write(level: LogLevel, args: fmt::Arguments<'_>) -> Result<WriteOutcome> {
    if level == LogLevel::Off {
        return Err(DiagError::invalid_argument(
            "OFF is not a message level; use MIN, STD or MAX",
        ));
    }

    let current = state::current_level();
    if current == LogLevel::Off {
        return Ok(WriteOutcome::Off);
    }
    if !current.admits(level) {
        return Ok(WriteOutcome::Ignored);
    }

    let record = format_record(level, &Local::now().format(HEADER_TIMESTAMP), args);

    let mut guard = SINK.lock();
    let file = guard.as_mut().ok_or(DiagError::AlreadyActive)?;
    file.write_all(record.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| DiagError::other(format!("failed to append log record: {e}")))?;

    Ok(WriteOutcome::Written)
}

/// Same as [`write`] for an already formatted message.
///
/// # Errors
/// See [`write`].
pub fn write_str(level: LogLevel, message: &str) -> Result<WriteOutcome> {
    write(level, format_args!("{message}"))
}

/// Formats `[TAG @ timestamp] message\n`.
fn format_record(level: LogLevel, timestamp: &dyn fmt::Display, args: fmt::Arguments<'_>) -> String {
    format!("[{} @ {timestamp}] {args}\n", level.tag())
}

/// Installs the run log. Returns the previous sink, if any.
pub(crate) fn install_sink(file: File) -> Option<File> {
    SINK.lock().replace(file)
}

/// Removes the run log. Closing happens when the caller drops it.
pub(crate) fn take_sink() -> Option<File> {
    SINK.lock().take()
}

/// Runs `f` on the installed run log while holding the writer lock.
pub(crate) fn with_sink<R>(f: impl FnOnce(&File) -> R) -> Option<R> {
    SINK.lock().as_ref().map(f)
}

/// Logs a formatted message through the level-filtered writer.
///
/// Expands to a call to [`writer::write`](crate::writer::write) and evaluates
/// to its `Result<WriteOutcome>`.
///
/// ```rust,no_run
/// use vigia_core::{LogLevel, vigia_log};
///
/// let _ = vigia_log!(LogLevel::Standard, "served {} requests", 42);
/// ```
#[macro_export]
macro_rules! vigia_log {
    ($level:expr, $($arg:tt)+) => {
        $crate::writer::write($level, ::std::format_args!($($arg)+))
    };
}
