//! # snaplink-proto
//!
//! Wire protocol shared by the snaplink capture agent and its remote client.
//!
//! Both ends talk to a hosted relay over a WebSocket at
//! `wss://<relay-host>/<6-digit-code>`. The relay routes frames between the
//! two sockets that joined with the same pairing code. Every frame is a JSON
//! text message with a `type` discriminator.
//!
//! ## Quick Start
//!
//! ```rust
//! use snaplink_proto::{PairingCode, RelayMessage};
//!
//! let code: PairingCode = "042917".parse().expect("six digits");
//! assert_eq!(code.as_str(), "042917");
//!
//! let msg = RelayMessage::parse(r#"{"type":"screenshot_request","mode":"buffer","count":2}"#)
//!     .expect("valid frame");
//! assert_eq!(msg.kind(), "screenshot_request");
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod close;
pub mod code;
pub mod error;
pub mod message;

pub use close::CloseCode;
pub use code::PairingCode;
pub use error::{ProtoError, Result};
pub use message::{
    CaptureMode, ErrorBody, ImagePayload, ProbeKind, Quality, RelayMessage, SuccessBody,
    now_millis,
};
