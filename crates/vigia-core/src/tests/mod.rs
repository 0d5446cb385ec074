//! Cross-module scenarios for the process-wide context.
//!
//! The context is a process singleton, so every test here (and every unit
//! test that touches the writer sink or the level cell) holds [`serial`].

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::config::DiagConfig;
use crate::dispatch::dispatch_level;
use crate::state::current_level;
use crate::types::LogLevel;


static SERIAL: Mutex<()> = Mutex::new(());

/// Serializes tests that touch process-wide state.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Configuration for tests: no remount, procfs snapshots.
pub fn test_config(dir: &Path) -> DiagConfig {
    DiagConfig::builder()
        .log_dir(dir)
        .remount_for_mandatory_lock(false)
        .pmap_program("vigia-test-missing-pmap")
        .build()
}

/// Sends `level` to this process and waits for the handler to apply it.
pub fn apply_level(level: LogLevel) {
    dispatch_level(0, level).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while current_level() != level {
        assert!(Instant::now() < deadline, "level {level} never applied");
        std::thread::sleep(Duration::from_millis(5));
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Runs `hook` at the first event carrying `message`.
struct EventHook {
    message: &'static str,
    hook: Mutex<Option<Hook>>,
}

struct MessageVisitor(Option<String>);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for EventHook {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if visitor.0.as_deref() != Some(self.message) {
            return;
        }
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Runs `f` on this thread, calling `hook` the first time `f` emits an event
/// with `message`.
pub fn with_event_hook<T>(
    message: &'static str,
    hook: impl FnOnce() + Send + 'static,
    f: impl FnOnce() -> T,
) -> T {
    let layer = EventHook {
        message,
        hook: Mutex::new(Some(Box::new(hook))),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, f)
}
