//! snaplink - desktop capture agent.
//!
//! Keeps one resilient WebSocket link to a hosted relay and serves
//! screenshot requests from a remote client paired by a six-digit code,
//! answering from a bounded, time-windowed capture buffer.
//!
//! - [`connection`]: connection manager, backoff, heartbeat, outbound queue
//! - [`capture`]: capture buffer, providers, request service, capture cycle
//! - [`watchdog`]: periodic reconnect and liveness checks
//! - [`client`]: the remote-client role on the same manager

pub mod capture;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod telemetry;
pub mod watchdog;

pub use snaplink_proto as proto;
