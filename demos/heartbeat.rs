//! Heartbeat demo
//!
//! Logs one message per level every second for a minute, so the level and
//! dump controls can be tried from another terminal.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example heartbeat
//!
//! # in another terminal, with the printed pid
//! cargo run -p vigia-ctl -- log_lvl std <pid>
//! cargo run -p vigia-ctl -- dump_ord extd <pid>
//! ```

use std::time::Duration;

use nix::sys::signal::SigSet;
use vigia::prelude::*;

const ITERATIONS: u32 = 60;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    println!("Running program with pid: {}", std::process::id());

    // Everything stays blocked here except the two control signals, which
    // initialization unblocks for this thread.
    if let Err(e) = SigSet::all().thread_block() {
        eprintln!("Failed to block signals: {e}");
        std::process::exit(1);
    }

    if let Err(e) = initialize(None) {
        eprintln!("Failed to initialize diagnostics: {e} (code {})", e.code().as_raw());
        std::process::exit(1);
    }

    for i in 0..ITERATIONS {
        println!("Printing: {i}");
        for (level, name) in [
            (LogLevel::Min, "Minimal"),
            (LogLevel::Standard, "Standard"),
            (LogLevel::Max, "Maximal"),
        ] {
            if let Err(e) = vigia_log!(level, "{name} message [{i}]") {
                tracing::warn!(error = %e, "log write failed");
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    if let Err(e) = teardown() {
        eprintln!("Failed to tear down diagnostics: {e}");
        std::process::exit(1);
    }
    println!("Done.");
}
