//! Logging setup and span helpers.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the application. [`init_logging`] is provided for binaries and tests that
//! want the conventional setup.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the global subscriber.
///
/// Safe to call multiple times; subsequent calls are no-ops. Levels are
/// controlled by `RUST_LOG` (e.g. `dimutex=debug`), defaulting to `info`.
///
/// # Example
///
/// ```rust
/// use dimutex::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // Another subscriber may already be installed by the host application.
        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .try_init();
            }
        }
    });
}

/// Creates the span wrapping one lock operation.
#[must_use]
pub fn lock_span(operation: &'static str, bucket: &str, key: &str) -> Span {
    tracing::info_span!("lock", op = operation, bucket = bucket, key = key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn lock_span_can_be_entered() {
        let span = lock_span("acquire", "bucket", "locks/a");
        let _guard = span.enter();
        tracing::info!("inside lock span");
    }
}
