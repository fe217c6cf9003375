//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Config struct definitions and TOML loading
//! - [`defaults`]: serde default functions (values match the shipped agent)
//! - [`validation`]: startup checks that report every problem at once

mod defaults;
mod types;
mod validation;

pub use types::{
    BackoffConfig, BufferConfig, CaptureConfig, CaptureSource, Config, ConfigError,
    HeartbeatConfig, LogFormat, LoggingConfig, RelayConfig, WatchdogConfig,
};
pub use validation::{ValidationError, validate};
