//! Tracing subscriber setup for the server binary.
//!
//! Environment variables:
//!   LOG_FORMAT  - "json" or "text" (default: "text")
//!   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
//!   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//!   RUST_LOG    - standard env filter (default: "caseforge_api=debug,caseforge_jobs=info,tower_http=debug")

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "caseforge_api=debug,caseforge_jobs=info,tower_http=debug";

/// Output settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub json: bool,
    pub file: Option<String>,
    pub ansi: Option<bool>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var("LOG_FORMAT").ok().as_deref(),
            std::env::var("LOG_FILE").ok(),
            std::env::var("LOG_ANSI").ok().as_deref(),
        )
    }

    fn from_values(format: Option<&str>, file: Option<String>, ansi: Option<&str>) -> Self {
        Self {
            json: format.map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false),
            file: file.filter(|f| !f.trim().is_empty()),
            ansi: ansi.map(|v| v == "true" || v == "1"),
        }
    }

    pub fn format_name(&self) -> &'static str {
        if self.json {
            "json"
        } else {
            "text"
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer and must live as long as the
/// process logs.
pub fn init(settings: &LogSettings) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = settings.file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("caseforge-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if settings.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless forced
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(settings.ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if settings.json {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = settings.ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}
