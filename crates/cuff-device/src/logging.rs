//! Logging initialization.
//!
//! - **Production**: JSON logs to a daily rolling file plus compact stdout
//! - **Development**: pretty stdout with file and line

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fallback level variable, read when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "CUFF_LOG_LEVEL";

/// Log file prefix.
const LOG_FILE_PREFIX: &str = "cuff";

// Non-blocking writers stop flushing once their guard drops.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the logging system.
///
/// Call once at startup, before anything logs. The filter comes from
/// `RUST_LOG`, then [`LOG_LEVEL_ENV`], then `info`.
///
/// # Arguments
///
/// * `is_production` - If true, uses production configuration (JSON file
///   logging). If false, uses development configuration (pretty stdout).
///
/// # Production Mode
///
/// - JSON-formatted logs written to a daily rolling file in
///   [`log_directory`] (`/var/log/cuff` on Linux)
/// - Compact plain-text logs to stdout for the service journal
/// - Non-blocking writers whose guards live for the rest of the process
///
/// # Development Mode
///
/// - Pretty-printed, colored logs to stdout
/// - Source file and line number on every event
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or a subscriber is
/// already installed.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let env_filter = build_filter(std::env::var(LOG_LEVEL_ENV).ok().as_deref())?;

    if is_production {
        init_production(env_filter)
    } else {
        init_development(env_filter)
    }
}

fn build_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    let level = level.unwrap_or("info");
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
}

fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("cannot create {}: {e}", log_dir.display());
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) -> anyhow::Result<()> {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()?;
    Ok(())
}

/// Where production logs are written.
///
/// # Platform Behavior
///
/// - **Linux**: `/var/log/cuff`
/// - **Other**: the platform data directory plus `logs`, falling back to
///   `./logs`
#[must_use]
pub fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/cuff")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "cuff")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
