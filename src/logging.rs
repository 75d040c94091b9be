use crate::models::LoggingSettings;
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn prepare_log_dir(log_dir: &str) -> Result<()> {
    let log_path = Utf8PathBuf::from(log_dir);
    if !log_path.exists() {
        fs::create_dir_all(&log_path)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

fn env_filter(debug_mode: bool) -> EnvFilter {
    // RUST_LOG wins when set, e.g. RUST_LOG=project_reload=trace
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Setup logging with a daily rotating file appender.
///
/// # Arguments
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_prefix` - Prefix for log files (e.g., "project-reload")
/// * `debug_mode` - If true, use debug level; otherwise use info level
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    log_dir: &str,
    log_prefix: &str,
    debug_mode: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    setup_logging_with_console(log_dir, log_prefix, debug_mode, false)
}

/// Setup logging with optional console output.
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging
/// active. Fails if a global subscriber is already installed.
pub fn setup_logging_with_console(
    log_dir: &str,
    log_prefix: &str,
    debug_mode: bool,
    console_output: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    prepare_log_dir(log_dir)?;

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI codes in log files
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(debug_mode))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        log_dir,
        log_prefix,
        debug_mode,
        console_output
    );

    Ok(guard)
}

/// Setup logging from the `logging` section of the configuration.
pub fn setup_from_settings(
    settings: &LoggingSettings,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    setup_logging_with_console(
        &settings.directory,
        &settings.prefix,
        settings.debug,
        settings.console,
    )
}
