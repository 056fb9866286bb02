use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::config::LoggingSettings;

/// Initialize tracing/logging for the application.
///
/// `RUST_LOG` takes precedence when set; otherwise everything at or above
/// `settings.level` is logged.
pub fn init(settings: &LoggingSettings) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(&settings.level).into())
        .from_env_lossy();

    // try_init: tests and the binary may both call this
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Map a configured level name to a filter. Unknown names mean `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "warning" => LevelFilter::WARN,
        other => other.parse().unwrap_or(LevelFilter::INFO),
    }
}
