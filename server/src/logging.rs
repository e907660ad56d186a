//! Structured logging initialization.
//!
//! Configures the tracing subscriber. The `RUST_LOG` environment variable
//! takes precedence over the configured level. When file logging is
//! enabled, formatted lines go to the rotating [`filelog::FileSink`]
//! (asynchronous unless the queue capacity is 0); otherwise to stderr.

use crate::config::LoggingConfig;
use filelog::FileSink;
use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Timestamps as `YYYY-MM-DD HH:MM:SS.uuuuuu` in local time.
struct MicroTime;

impl fmt::time::FormatTime for MicroTime {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

/// Runtime control over the active level filter.
pub struct LevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    current: Mutex<String>,
}

impl LevelHandle {
    /// Swap the active filter. Returns false when the directive string does
    /// not parse.
    pub fn set_level(&self, level: &str) -> bool {
        let Ok(filter) = EnvFilter::try_new(level) else {
            return false;
        };
        if self.handle.reload(filter).is_err() {
            return false;
        }
        *self.current.lock().unwrap() = level.to_string();
        true
    }

    /// The currently active filter directives.
    pub fn get_level(&self) -> String {
        self.current.lock().unwrap().clone()
    }
}

/// Initialize the logging subsystem.
pub fn init(config: &LoggingConfig) -> LevelHandle {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(&config.level)
    };
    let initial = filter.to_string();
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);
    let level = LevelHandle {
        handle,
        current: Mutex::new(initial),
    };

    let mut sink_error = None;
    if config.file {
        match FileSink::new(&config.dir, &config.suffix, config.queue_capacity) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                let layer = fmt::layer()
                    .with_timer(MicroTime)
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(move || sink.writer());
                let _ = registry.with(layer).try_init();
                return level;
            }
            Err(err) => sink_error = Some(err),
        }
    }

    let layer = fmt::layer()
        .with_timer(MicroTime)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = registry.with(layer).try_init();
    if let Some(err) = sink_error {
        tracing::error!(%err, "log file sink unavailable, logging to stderr");
    }
    level
}
