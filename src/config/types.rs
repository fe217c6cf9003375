//! Core configuration types and loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Agent configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Relay endpoint and pairing.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Reconnection delay curve.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Keep-alive and unresponsiveness detection.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Capture buffer bounds and background capture cadence.
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Periodic reconnect and liveness checks.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Where captures come from.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Log output format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Relay endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Base relay URL; the pairing code is appended as the last path segment.
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Pairing code. A fresh one is generated at startup when absent.
    #[serde(default)]
    pub code: Option<String>,
    /// Seconds a transport may take to open before it is abandoned.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds after `disconnect()` during which automatic reconnects stay suppressed.
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_secs: u64,
    /// Send `connection_request` on every open (remote client role).
    #[serde(default)]
    pub announce: bool,
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            code: None,
            connect_timeout_secs: default_connect_timeout(),
            disconnect_grace_secs: default_disconnect_grace(),
            announce: false,
        }
    }
}

/// Reconnection backoff configuration.
///
/// `delay(n) = min(base_ms * factor^n, max_ms)` plus up to `jitter * delay`
/// of random offset. The attempt counter stops growing at `attempt_ceiling`
/// but retries never stop.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_jitter")]
    pub jitter: f64,
    #[serde(default = "default_attempt_ceiling")]
    pub attempt_ceiling: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            factor: default_backoff_factor(),
            max_ms: default_backoff_max_ms(),
            jitter: default_backoff_jitter(),
            attempt_ceiling: default_attempt_ceiling(),
        }
    }
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between `ping` frames.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Seconds without any inbound traffic before the link is force-closed.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
        }
    }
}

/// Capture buffer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Run the background capture cycle and keep recent captures.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hard upper bound on buffered captures.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Seconds a capture stays servable.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Seconds between background captures.
    #[serde(default = "default_capture_interval")]
    pub capture_interval_secs: u64,
}

impl BufferConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_secs)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_items: default_max_items(),
            retention_secs: default_retention(),
            capture_interval_secs: default_capture_interval(),
        }
    }
}

/// Watchdog configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds between "closed? reconnect" checks.
    #[serde(default = "default_reconnect_check")]
    pub reconnect_check_secs: u64,
    /// Seconds between idle checks on an open link.
    #[serde(default = "default_liveness_check")]
    pub liveness_check_secs: u64,
    /// Inbound silence, in seconds, after which a `connection_verify` probe is sent.
    #[serde(default = "default_idle_probe")]
    pub idle_probe_secs: u64,
    /// Seconds to wait after a wake/network signal before acting on it.
    #[serde(default = "default_wake_settle")]
    pub wake_settle_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            reconnect_check_secs: default_reconnect_check(),
            liveness_check_secs: default_liveness_check(),
            idle_probe_secs: default_idle_probe(),
            wake_settle_secs: default_wake_settle(),
        }
    }
}

/// Capture source selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    /// No display attached; every capture reports `NoDisplayAvailable`.
    #[default]
    Unavailable,
    /// Serve the image at `capture.path` (kiosk snapshots, testing).
    File,
}

/// Capture provider configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub source: CaptureSource,
    /// Image file read by the `file` source.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}
