//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{CaptureSource, Config};
use snaplink_proto::PairingCode;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("relay.url must start with ws:// or wss://, got '{0}'")]
    InvalidRelayUrl(String),
    #[error("relay.code must be exactly 6 digits, got '{0}'")]
    InvalidCode(String),
    #[error("relay.connect_timeout_secs must be greater than 0")]
    ZeroConnectTimeout,
    #[error("backoff.factor must be at least 1.0, got {0}")]
    InvalidBackoffFactor(f64),
    #[error("backoff.jitter must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),
    #[error("backoff.base_ms must be greater than 0")]
    ZeroBackoffBase,
    #[error("backoff.base_ms ({base}) exceeds backoff.max_ms ({max})")]
    BackoffBaseExceedsMax { base: u64, max: u64 },
    #[error("heartbeat.interval_secs must be greater than 0")]
    ZeroHeartbeatInterval,
    #[error("heartbeat.timeout_secs must be greater than 0")]
    ZeroHeartbeatTimeout,
    #[error("buffer.max_items must be at least 1")]
    ZeroBufferSize,
    #[error("buffer.capture_interval_secs must be greater than 0")]
    ZeroCaptureInterval,
    #[error("watchdog.{0} must be greater than 0")]
    ZeroWatchdogPeriod(&'static str),
    #[error("capture.source = \"file\" requires capture.path")]
    CapturePathMissing,
    #[error("capture.path does not exist: {0}")]
    CapturePathNotFound(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Relay
    let url = &config.relay.url;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        errors.push(ValidationError::InvalidRelayUrl(url.clone()));
    }
    if let Some(ref code) = config.relay.code
        && PairingCode::parse(code).is_err()
    {
        errors.push(ValidationError::InvalidCode(code.clone()));
    }
    if config.relay.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    // Backoff curve
    let backoff = &config.backoff;
    if backoff.factor.is_nan() || backoff.factor < 1.0 {
        errors.push(ValidationError::InvalidBackoffFactor(backoff.factor));
    }
    if !(0.0..=1.0).contains(&backoff.jitter) {
        errors.push(ValidationError::InvalidJitter(backoff.jitter));
    }
    if backoff.base_ms == 0 {
        errors.push(ValidationError::ZeroBackoffBase);
    }
    if backoff.base_ms > backoff.max_ms {
        errors.push(ValidationError::BackoffBaseExceedsMax {
            base: backoff.base_ms,
            max: backoff.max_ms,
        });
    }

    // Heartbeat
    if config.heartbeat.interval_secs == 0 {
        errors.push(ValidationError::ZeroHeartbeatInterval);
    }
    if config.heartbeat.timeout_secs == 0 {
        errors.push(ValidationError::ZeroHeartbeatTimeout);
    }

    // Buffer
    if config.buffer.max_items == 0 {
        errors.push(ValidationError::ZeroBufferSize);
    }
    if config.buffer.enabled && config.buffer.capture_interval_secs == 0 {
        errors.push(ValidationError::ZeroCaptureInterval);
    }

    // Watchdog periods feed tokio intervals
    let watchdog = &config.watchdog;
    for (name, secs) in [
        ("reconnect_check_secs", watchdog.reconnect_check_secs),
        ("liveness_check_secs", watchdog.liveness_check_secs),
        ("idle_probe_secs", watchdog.idle_probe_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::ZeroWatchdogPeriod(name));
        }
    }

    // Capture source
    if config.capture.source == CaptureSource::File {
        match config.capture.path {
            None => errors.push(ValidationError::CapturePathMissing),
            Some(ref path) if !path.exists() => {
                errors.push(ValidationError::CapturePathNotFound(
                    path.display().to_string(),
                ));
            }
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
