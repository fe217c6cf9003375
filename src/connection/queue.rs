//! Outbound queue for frames sent while the link is down.

use std::collections::VecDeque;

use tokio::time::Instant;

/// An encoded frame waiting for the next open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub enqueued_at: Instant,
}

/// FIFO of frames not yet handed to a transport.
///
/// Each message is handed to the transport at most once; there is no
/// acknowledgement tracking.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, text: String) {
        self.items.push_back(OutboundMessage {
            text,
            enqueued_at: Instant::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain in order through `send`.
    ///
    /// Stops at the first failure: the failed message and everything behind
    /// it stay queued in their original order. Returns how many were sent.
    pub fn flush<E, F>(&mut self, mut send: F) -> Result<usize, E>
    where
        F: FnMut(&OutboundMessage) -> Result<(), E>,
    {
        let mut sent = 0;
        while let Some(front) = self.items.front() {
            send(front)?;
            self.items.pop_front();
            sent += 1;
        }
        Ok(sent)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
