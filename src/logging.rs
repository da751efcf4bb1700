//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Initialize logging with tracing.
///
/// `RUST_LOG` wins over the configured level. Returns `false` when a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pcm_transcoder={}", settings.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = match settings.format.as_deref() {
        Some("json") => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.is_ok()
}
