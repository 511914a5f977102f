//! Logging initialisation

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Log file prefix inside the log directory
pub const LOG_FILE_NAME: &str = "shotline.log";

/// Installs the global subscriber: an `RUST_LOG`-aware filter (INFO by
/// default), a stderr layer, and a daily rolling file when `log_dir` is
/// given. Later calls are no-ops.
pub fn init_logging(log_dir: Option<&Path>) {
    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Cannot create log directory {}: {e}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if LOG_GUARD.set(guard).is_err() {
            return None;
        }
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
    });

    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    // Already initialised (tests, repeated CLI setup)
    let _ = tracing::subscriber::set_global_default(subscriber);
}
