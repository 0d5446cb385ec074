//! Vigia: signal-driven runtime diagnostics for long-lived POSIX processes.
//!
//! Change a running process's log level, or have it write a memory-map
//! dump, from another process. See [`core`] for the library and the
//! `vigia-ctl` binary for the operator side.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vigia::prelude::*;
//!
//! initialize(None)?;
//! vigia_log!(LogLevel::Min, "worker pool ready ({} threads)", 8)?;
//! teardown()?;
//! # Ok::<(), DiagError>(())
//! ```

pub use vigia_core as core;

/// Prelude module for common imports.
pub mod prelude {
    pub use vigia_core::{
        DiagConfig, DiagError, DumpLevel, LogLevel, WriteOutcome, current_level, dispatch_dump,
        dispatch_level, initialize, initialize_with, is_active, teardown, vigia_log,
    };
}
