// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # vigia-core
//!
//! Runtime diagnostics for long-lived POSIX processes, controlled remotely
//! over real-time signals.
//!
//! An operator in another process can change this process's log level or
//! ask for a memory-map dump without restarting it, attaching a debugger or
//! opening a network port:
//!
//! - [`initialize`] / [`teardown`] manage the process-wide context
//! - [`vigia_log!`] appends level-filtered records to the run log
//! - [`dispatch_level`] / [`dispatch_dump`] send control messages to a pid
//!
//! Two real-time signals carry the control messages (`SIGRTMIN` for the
//! level, `SIGRTMIN + 1` for dumps). Their handlers only store an atomic or
//! push one byte to a pipe; all blocking work happens on the dump worker
//! thread.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vigia_core::{DumpLevel, LogLevel, dispatch_dump, dispatch_level, vigia_log};
//!
//! vigia_core::initialize(None)?;
//! vigia_log!(LogLevel::Min, "service started on port {}", 8080)?;
//!
//! // Normally sent by another process, e.g. `vigia-ctl log_lvl std <pid>`
//! dispatch_level(0, LogLevel::Standard)?;
//! dispatch_dump(0, DumpLevel::Detail)?;
//!
//! vigia_core::teardown()?;
//! # Ok::<(), vigia_core::DiagError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod queue;
pub mod signal;
pub mod snapshot;
mod state;
#[cfg(test)]
mod tests;
pub mod types;
pub mod worker;
pub mod writer;

pub use config::{DiagConfig, DiagConfigBuilder};
pub use control::{ControlMessage, ControlSignal};
pub use dispatch::{dispatch_dump, dispatch_level};
pub use error::{DiagError, Result};
pub use files::{FileKind, MandatoryLocking};
pub use lifecycle::{
    InitStage, initialize, initialize_with, is_active, log_file_path, snapshot_backend, teardown,
};
pub use snapshot::{PmapProducer, ProcMapsProducer, SnapshotProducer};
pub use state::current_level;
pub use types::{DumpLevel, LogLevel, ResultCode, WriteOutcome};
