//! Capture buffering and screenshot request serving.
//!
//! - [`buffer`]: the bounded, time-windowed capture store
//! - [`provider`]: where captures come from
//! - [`service`]: answers `screenshot_request` frames
//! - [`scheduler`]: background capture cycle that fills the buffer

pub mod buffer;
pub mod provider;
pub mod scheduler;
pub mod service;

pub use buffer::{BufferInfo, CaptureBuffer, CaptureItem, CapturePayload, SharedBuffer};
pub use provider::{CaptureProvider, FileCaptureProvider, UnavailableProvider};
pub use scheduler::CaptureScheduler;
pub use service::{CaptureRequest, CaptureResponder, CaptureService};
