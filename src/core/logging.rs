//! Logging setup shared by the server and client binaries.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use super::config::LoggingConfig;

/// Initialize the logging subsystem.
///
/// Logs go to stderr so the stdio transport keeps stdout for frames.
/// `RUST_LOG` directives are honoured on top of the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let result = if config.with_timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}
