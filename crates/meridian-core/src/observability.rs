//! Observability infrastructure for Meridian.
//!
//! Structured logging with consistent spans. This module provides an
//! initialization helper and a span constructor so dataset operations log
//! under uniform fields.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

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

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `meridian_dataset=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for dataset operations with standard fields.
///
/// # Example
///
/// ```rust
/// use meridian_core::observability::dataset_span;
///
/// let span = dataset_span("load", "roads");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn dataset_span(operation: &str, dataset: &str) -> Span {
    tracing::info_span!("dataset", op = operation, dataset = dataset)
}
