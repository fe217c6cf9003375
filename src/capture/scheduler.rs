//! Background capture cycle.
//!
//! Captures once immediately, then every `interval`. Each cycle adds the new
//! capture (when there is one) and evicts expired items.

use std::sync::Arc;
use std::time::Duration;

use snaplink_proto::Quality;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::buffer::{CaptureItem, SharedBuffer};
use super::provider::CaptureProvider;

pub struct CaptureScheduler {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CaptureScheduler {
    pub fn spawn(
        provider: Arc<dyn CaptureProvider>,
        buffer: SharedBuffer,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = period.max(Duration::from_millis(10));

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match provider.capture(Quality::High).await {
                    Ok(payload) => {
                        trace!(bytes = payload.len(), "background capture");
                        buffer.lock().add(CaptureItem::now(payload));
                    }
                    Err(e) => debug!(error = %e, "background capture failed"),
                }
                let evicted = buffer.lock().evict(Instant::now());
                if evicted > 0 {
                    debug!(evicted, "expired captures evicted");
                }
            }
        });

        Self { cancel, task }
    }

    pub fn stop(self) {}
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
