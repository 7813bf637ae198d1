use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn,tungstenite=warn";

/// Logs go to `~/.yuume/logs/yuume.log` so stdout stays clean for the
/// conversation itself. The guard must live as long as the process.
pub fn init_logging() -> anyhow::Result<WorkerGuard> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
    let log_dir = home.join(".yuume").join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let filter = std::env::var("YUUME_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let file_appender = tracing_appender::rolling::never(&log_dir, "yuume.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let format = std::env::var("YUUME_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .init();
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_dir = %log_dir.display(),
        format = %format,
    );

    Ok(guard)
}
