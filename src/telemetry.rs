//! Telemetry utilities for relay-link observability.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .flatten_event(true)
            .init(),
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Create a span for one relay connection generation.
    pub fn connection(code: &str, generation: u64) -> Span {
        info_span!("connection", code = %code, generation = generation)
    }

    /// Create a span for serving one screenshot request.
    pub fn capture_request(mode: &str) -> Span {
        info_span!("capture_request", mode = %mode)
    }
}
