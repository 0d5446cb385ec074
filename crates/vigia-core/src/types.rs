//! Core value types: verbosity levels, dump levels and result codes.
//!
//! Every type here is `Copy` and decodable from a raw integer without
//! allocating, so the decoders can run inside a signal handler.

use std::fmt;
use std::str::FromStr;

use crate::error::DiagError;

/// Log verbosity.
///
/// Totally ordered: `Off < Min < Standard < Max`. `Off` disables output and
/// is never a valid tag for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum LogLevel {
    /// Logging is turned off.
    Off = -1,
    /// Lowest detail; printed whenever logging is on.
    Min = 0,
    /// Standard detail; printed at `Standard` and `Max`.
    Standard = 1,
    /// Highest detail; printed only at `Max`.
    Max = 2,
}

impl LogLevel {
    /// All levels, lowest first.
    pub const ALL: [Self; 4] = [Self::Off, Self::Min, Self::Standard, Self::Max];

    /// Levels a message may be tagged with.
    pub const MESSAGE_LEVELS: [Self; 3] = [Self::Min, Self::Standard, Self::Max];

    /// Decodes a raw control payload. Signal-safe.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Off),
            0 => Some(Self::Min),
            1 => Some(Self::Standard),
            2 => Some(Self::Max),
            _ => None,
        }
    }

    /// Returns the raw control payload.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Three-letter tag used in the record header.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Min => "MIN",
            Self::Standard => "STD",
            Self::Max => "MAX",
        }
    }

    /// Returns true if a message tagged `message` passes a filter set to `self`.
    #[must_use]
    pub fn admits(self, message: Self) -> bool {
        self != Self::Off && message != Self::Off && self >= message
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LogLevel {
    type Err = DiagError;

    /// Parses the operator spelling (`off`, `min`, `std`, `max`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "min" => Ok(Self::Min),
            "std" | "standard" => Ok(Self::Standard),
            "max" => Ok(Self::Max),
            other => Err(DiagError::invalid_argument(format!(
                "unknown log level: {other}"
            ))),
        }
    }
}

/// Detail of a memory-map dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DumpLevel {
    /// Plain map listing.
    Normal = 0,
    /// Extended format (`pmap -x`).
    Detail = 1,
    /// Everything the kernel exposes per mapping (`pmap -X`).
    Extended = 2,
    /// Full kernel detail (`pmap -XX`).
    Full = 3,
}

impl DumpLevel {
    /// All dump levels, least detailed first.
    pub const ALL: [Self; 4] = [Self::Normal, Self::Detail, Self::Extended, Self::Full];

    /// Decodes a raw control payload. Signal-safe.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Normal),
            1 => Some(Self::Detail),
            2 => Some(Self::Extended),
            3 => Some(Self::Full),
            _ => None,
        }
    }

    /// Decodes a byte read from the dump queue.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Self::from_raw(byte as i32)
    }

    /// Returns the raw control payload.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns the queue byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Detail flag passed to `pmap`, if any.
    #[must_use]
    pub const fn pmap_flag(self) -> Option<&'static str> {
        match self {
            Self::Normal => None,
            Self::Detail => Some("-x"),
            Self::Extended => Some("-X"),
            Self::Full => Some("-XX"),
        }
    }
}

impl fmt::Display for DumpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "norm",
            Self::Detail => "detl",
            Self::Extended => "extd",
            Self::Full => "full",
        };
        f.write_str(name)
    }
}

impl FromStr for DumpLevel {
    type Err = DiagError;

    /// Parses the operator spelling (`norm`, `detl`, `extd`, `full`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "norm" | "normal" => Ok(Self::Normal),
            "detl" | "detail" => Ok(Self::Detail),
            "extd" | "extended" => Ok(Self::Extended),
            "full" => Ok(Self::Full),
            other => Err(DiagError::invalid_argument(format!(
                "unknown dump level: {other}"
            ))),
        }
    }
}

/// Non-error outcome of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was appended and synced.
    Written,
    /// The message level is above the current level.
    Ignored,
    /// Logging is off.
    Off,
}

impl WriteOutcome {
    /// Numeric result code.
    #[must_use]
    pub const fn code(self) -> ResultCode {
        match self {
            Self::Written => ResultCode::Success,
            Self::Ignored => ResultCode::Ignored,
            Self::Off => ResultCode::Off,
        }
    }
}

/// Flat numeric result table shared with non-Rust callers and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    /// Message discarded because logging is off.
    Off = -2,
    /// Message discarded because its level is above the current one.
    Ignored = -1,
    /// Operation succeeded.
    Success = 0,
    /// Duplicate init/teardown, or module busy.
    AlreadyActive = 1,
    /// Invalid argument.
    InvalidArgument = 2,
    /// File creation or I/O failure.
    FileError = 3,
    /// Locking, queue or signal failure.
    SyncError = 4,
    /// Worker thread could not start.
    WorkerStartError = 5,
    /// Anything else.
    Other = 255,
}

impl ResultCode {
    /// Returns the raw code.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}
