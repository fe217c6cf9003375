//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Relay Defaults
// =============================================================================

pub fn default_relay_url() -> String {
    "wss://otakon-relay.onrender.com".to_string()
}

pub fn default_connect_timeout() -> u64 {
    30
}

pub fn default_disconnect_grace() -> u64 {
    5
}

// =============================================================================
// Backoff Defaults
// =============================================================================

pub fn default_backoff_base_ms() -> u64 {
    1_000
}

pub fn default_backoff_factor() -> f64 {
    1.2
}

pub fn default_backoff_max_ms() -> u64 {
    30_000
}

pub fn default_backoff_jitter() -> f64 {
    0.2
}

pub fn default_attempt_ceiling() -> u32 {
    50
}

// =============================================================================
// Heartbeat Defaults
// =============================================================================

pub fn default_heartbeat_interval() -> u64 {
    15
}

pub fn default_heartbeat_timeout() -> u64 {
    30
}

// =============================================================================
// Buffer Defaults
// =============================================================================

pub fn default_max_items() -> usize {
    5
}

pub fn default_retention() -> u64 {
    300
}

pub fn default_capture_interval() -> u64 {
    60
}

// =============================================================================
// Watchdog Defaults
// =============================================================================

pub fn default_reconnect_check() -> u64 {
    15
}

pub fn default_liveness_check() -> u64 {
    30
}

pub fn default_idle_probe() -> u64 {
    120
}

pub fn default_wake_settle() -> u64 {
    5
}
