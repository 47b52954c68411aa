// src/util/log.rs

//! Logger Utility - installs the process-wide tracing subscriber
use std::fs::{File, create_dir_all};
use std::sync::{Mutex, OnceLock};
use chrono::Local;
use tracing_subscriber::{
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Name of the log file written inside `logging.dir`
pub const LOG_FILE_NAME: &str = "frame.log";

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Local wall-clock timestamps, same format on the console and in the file
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Install the subscriber. `RUST_LOG` takes precedence over the configured level.
///
/// Calling this more than once is a no-op.
pub fn init(config: &LoggingConfig) -> std::io::Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match &config.dir {
        Some(dir) => {
            create_dir_all(dir)?;
            // Start fresh each run
            let file = File::create(dir.join(LOG_FILE_NAME))?;
            Some(
                fmt::layer()
                    .with_timer(LocalTimer)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    // A subscriber installed by someone else (tests, embedding) is left alone
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(LocalTimer).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    let _ = INITIALIZED.set(());
    Ok(())
}

/// Convenience macro for error logging with formatting
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        ::tracing::error!($($arg)*);
    }};
}

/// Convenience macro for warning logging with formatting
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        ::tracing::warn!($($arg)*);
    }};
}

/// Convenience macro for info logging with formatting
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        ::tracing::info!($($arg)*);
    }};
}

/// Convenience macro for debug logging with formatting
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        ::tracing::debug!($($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_creation() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            level: "DEBUG".to_string(),
            dir: Some(temp_dir.path().join("logs")),
        };

        init(&config).expect("Failed to init logger");
        crate::log_info!("Test info");
        crate::log_debug!("Test debug");

        assert!(temp_dir.path().join("logs").join(LOG_FILE_NAME).exists());

        // Second call is a no-op
        assert!(init(&config).is_ok());
    }
}
