use std::io::stdout;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::CourierError;

/// Sets up tracing output for applications embedding the engine.
///
/// With a log file path, events go to a daily-rolling file without ANSI
/// colors; without one, they go to stdout. The returned guard must be
/// kept alive for the duration of the program so file logs are flushed.
///
/// Filtering follows `RUST_LOG`, with `http_courier=info` as the baseline
/// directive.
pub fn setup_logging(log_file_path: Option<&str>) -> Result<Option<WorkerGuard>, CourierError> {
    let filter = || {
        EnvFilter::from_default_env().add_directive(
            "http_courier=info"
                .parse()
                .unwrap_or_else(|_| unreachable!("static directive is valid")),
        )
    };

    match log_file_path {
        Some(custom_path) => {
            let path = Path::new(custom_path);
            let parent = path.parent().unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("http_courier.log");

            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CourierError::log_setup(format!("Failed to create log directory: {e}"))
                })?;
            }

            let file_appender = RollingFileAppender::new(Rotation::DAILY, parent, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(
                    fmt::Layer::new()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(filter()),
                )
                .try_init()
                .map_err(|e| CourierError::log_setup(e.to_string()))?;

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    fmt::Layer::new()
                        .with_writer(stdout)
                        .with_ansi(true)
                        .with_filter(filter()),
                )
                .try_init()
                .map_err(|e| CourierError::log_setup(e.to_string()))?;

            Ok(None)
        }
    }
}
