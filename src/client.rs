//! Remote client role.
//!
//! The browser side of a pairing: it joins the same code with `announce`
//! set, asks the agent for screenshots and receives the results.
//! [`RemoteClient`] turns the frames it receives into [`ClientEvent`]s on a
//! channel.

use chrono::{DateTime, Utc};
use snaplink_proto::{CaptureMode, CloseCode, Quality, RelayMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::error::RelayError;
use crate::handler::MessageHandler;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    PartnerConnected,
    PartnerDisconnected,
    /// Images from a `screenshot-single` / `screenshot-multi` frame, oldest first.
    Images {
        multi: bool,
        images: Vec<String>,
    },
    Served {
        mode: String,
        count: usize,
        at: Option<DateTime<Utc>>,
    },
    Failed {
        kind: String,
        details: String,
        at: Option<DateTime<Utc>>,
    },
    Disconnected {
        code: CloseCode,
    },
}

pub struct RemoteClient {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl RemoteClient {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }

    /// Ask the agent for a fresh capture.
    pub fn request_single(manager: &ConnectionManager, quality: Quality) -> Result<(), RelayError> {
        manager.send(&RelayMessage::ScreenshotRequest {
            mode: CaptureMode::Single,
            count: None,
            quality: Some(quality),
        })
    }

    /// Ask the agent for up to `count` buffered captures.
    pub fn request_buffer(
        manager: &ConnectionManager,
        count: Option<usize>,
    ) -> Result<(), RelayError> {
        manager.send(&RelayMessage::ScreenshotRequest {
            mode: CaptureMode::Buffer,
            count,
            quality: None,
        })
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

impl MessageHandler for RemoteClient {
    fn on_open(&self, _manager: &ConnectionManager) {
        self.emit(ClientEvent::Connected);
    }

    fn on_message(&self, _manager: &ConnectionManager, message: RelayMessage) {
        let event = match message {
            RelayMessage::PartnerConnected => ClientEvent::PartnerConnected,
            RelayMessage::PartnerDisconnected => ClientEvent::PartnerDisconnected,
            RelayMessage::ScreenshotSingle { payload } => ClientEvent::Images {
                multi: false,
                images: payload.images,
            },
            RelayMessage::ScreenshotMulti { payload } => ClientEvent::Images {
                multi: true,
                images: payload.images,
            },
            RelayMessage::ScreenshotSuccess { success } => ClientEvent::Served {
                mode: success.mode,
                count: success.count,
                at: timestamp(success.timestamp),
            },
            RelayMessage::ScreenshotError { error } => ClientEvent::Failed {
                kind: error.kind,
                details: error.details,
                at: timestamp(error.timestamp),
            },
            other => {
                debug!(kind = other.kind(), "ignoring frame");
                return;
            }
        };
        self.emit(event);
    }

    fn on_close(&self, _manager: &ConnectionManager, code: CloseCode, _reason: &str) {
        self.emit(ClientEvent::Disconnected { code });
    }
}
