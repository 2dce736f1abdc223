//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Output flavour, selected by `LOG_FORMAT`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_env_value(value: &str) -> Self {
        match value {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize tracing/logging for the process from `RUST_LOG`/`LOG_LEVEL`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let format = std::env::var("LOG_FORMAT")
        .map(|v| LogFormat::from_env_value(&v))
        .unwrap_or_default();
    init_with(&level, format);
}

/// Initialize with explicit settings (used by the binary after config load).
pub fn init_with(level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    let _ = result;
}
