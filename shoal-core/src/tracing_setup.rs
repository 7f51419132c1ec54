//! Tracing setup for Shoal
//!
//! Provides dual output: console logs at a user-controlled level and full
//! debug logs written to disk for post-run inspection.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Initializes console and file tracing in one subscriber.
///
/// Console output honors `console_level`, or `RUST_LOG` when set. The file
/// layer writes everything at TRACE to `shoal-last-run.log` under `logs_dir`
/// (default `./logs`), overwriting the previous run so a failed run always
/// leaves a full trace behind.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - If the logs directory cannot be created or
///   the log file cannot be opened for writing
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));

    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join("shoal-last-run.log");
    let log_file = File::create(&log_file_path)?;

    // Console layer respects the user's chosen log level
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer().with_filter(console_filter);

    // File layer always captures everything at TRACE level
    let file_layer = fmt::layer()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false) // No color codes in files
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        "Tracing initialized: console={}, debug_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(())
}

/// Console log levels selectable from the CLI
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Errors only
    Error,
    /// Warnings and errors
    Warn,
    /// Normal operational output
    Info,
    /// Verbose output for troubleshooting
    Debug,
    /// Everything, including per-event traces
    Trace,
}

impl CliLogLevel {
    /// Converts the CLI log level to the tracing Level enum.
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::ValueEnum;

    use super::*;

    #[test]
    fn test_cli_names_are_lowercase() {
        for level in CliLogLevel::value_variants() {
            let name = level.to_possible_value().unwrap();
            assert_eq!(name.get_name(), name.get_name().to_lowercase());
        }
    }

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(CliLogLevel::Info.as_tracing_level(), Level::INFO);
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
    }
}
