//! Centralized logging configuration for apex-fit binaries
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the executable, which calls one of the functions below once.

use tracing::Level;

/// Initialize the tracing subscriber with apex-fit's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// Format includes:
/// - Timestamp
/// - Log level
/// - Module/target path
///
/// # Example
/// ```no_run
/// use apex_fit::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Application started");
/// }
/// ```
///
/// # Environment Variables
/// Per-iteration progress of the fitter is logged at DEBUG:
/// ```bash
/// RUST_LOG=apex_fit=debug cargo run --bin fit_gaussian
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();
}
