//! Message handler interface.
//!
//! The connection manager reports link lifecycle and every application
//! frame to one [`MessageHandler`]. Callbacks run on the manager's event
//! task with no lock held, so they may call back into the manager, but
//! they must not block: long work belongs on a separate task.

use snaplink_proto::{CloseCode, RelayMessage};

use crate::connection::ConnectionManager;
use crate::error::RelayError;

pub trait MessageHandler: Send + Sync + 'static {
    /// The link opened and the outbound queue was flushed.
    fn on_open(&self, _manager: &ConnectionManager) {}

    /// An application frame arrived. Heartbeat and probe acks never get here.
    fn on_message(&self, manager: &ConnectionManager, message: RelayMessage);

    /// A transport error or heartbeat timeout. Recovery is automatic.
    fn on_error(&self, _manager: &ConnectionManager, _error: &RelayError) {}

    /// The link closed.
    fn on_close(&self, _manager: &ConnectionManager, _code: CloseCode, _reason: &str) {}
}

/// Handler that ignores every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn on_message(&self, _manager: &ConnectionManager, message: RelayMessage) {
        tracing::trace!(kind = message.kind(), "ignoring frame");
    }
}
