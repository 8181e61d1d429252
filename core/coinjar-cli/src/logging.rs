//! Subscriber setup: filtered `fmt` output to a daily-rolling file under
//! `<root>/logs`. Falls back to stderr when the directory can't be created.

use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "COINJAR_LOG";
const DEBUG_ENV: &str = "COINJAR_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "coinjar.log";

/// Installs the global subscriber. Keep the returned guard alive until exit
/// or buffered lines are lost.
pub fn init(logs_dir: &Path, default_level: &str) -> Option<WorkerGuard> {
    let filter = build_filter(default_level);

    if let Err(err) = std::fs::create_dir_all(logs_dir) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        tracing::warn!(
            dir = %logs_dir.display(),
            error = %err,
            "Log directory unavailable; logging to stderr"
        );
        return None;
    }

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .try_init();
    Some(guard)
}

fn build_filter(default_level: &str) -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
