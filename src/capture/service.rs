//! Screenshot request handling.
//!
//! [`CaptureService`] is the agent's message handler. Requests are handed to
//! one worker task so a slow capture never stalls the connection's event
//! task, and responses go out in request order.

use std::sync::Arc;

use serde_json::json;
use snaplink_proto::{CaptureMode, Quality, RelayMessage};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};

use super::buffer::{CaptureItem, SharedBuffer};
use super::provider::CaptureProvider;
use crate::connection::ConnectionManager;
use crate::error::{CaptureError, RelayError};
use crate::handler::MessageHandler;
use crate::telemetry::spans;

/// One screenshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub mode: CaptureMode,
    pub count: Option<usize>,
    pub quality: Quality,
}

/// Turns a request into the frames that answer it.
#[derive(Clone)]
pub struct CaptureResponder {
    provider: Arc<dyn CaptureProvider>,
    buffer: SharedBuffer,
    buffering: bool,
}

impl CaptureResponder {
    pub fn new(provider: Arc<dyn CaptureProvider>, buffer: SharedBuffer, buffering: bool) -> Self {
        Self {
            provider,
            buffer,
            buffering,
        }
    }

    pub async fn respond(&self, request: CaptureRequest) -> Vec<RelayMessage> {
        let result = match request.mode {
            CaptureMode::Single => self.single(request.quality).await,
            CaptureMode::Buffer => self.from_buffer(request.count),
            CaptureMode::Unknown => Err(CaptureError::UnknownMode),
        };
        result.unwrap_or_else(|e| {
            info!(error = %e, kind = e.wire_type(), "screenshot request not served");
            vec![RelayMessage::screenshot_error(e.wire_type(), e.to_string())]
        })
    }

    async fn single(&self, quality: Quality) -> Result<Vec<RelayMessage>, CaptureError> {
        let payload = self.provider.capture(quality).await?;
        let image = if self.buffering {
            let mut buffer = self.buffer.lock();
            buffer.add(CaptureItem::now(payload));
            buffer
                .latest()
                .map(|item| item.payload.as_str().to_string())
                .ok_or(CaptureError::BufferEmpty)?
        } else {
            payload.as_str().to_string()
        };

        Ok(vec![
            RelayMessage::screenshot_single(image),
            RelayMessage::screenshot_success("single", 1, json!({ "fromBuffer": false })),
        ])
    }

    fn from_buffer(&self, count: Option<usize>) -> Result<Vec<RelayMessage>, CaptureError> {
        let (mut items, total) = {
            let buffer = self.buffer.lock();
            (buffer.items(count.filter(|c| *c > 0)), buffer.len())
        };
        if items.is_empty() {
            return Err(CaptureError::BufferEmpty);
        }
        // Oldest first on the wire.
        items.reverse();
        let images: Vec<String> = items
            .iter()
            .map(|item| item.payload.as_str().to_string())
            .collect();
        let sent = images.len();

        Ok(vec![
            RelayMessage::screenshot_multi(images),
            RelayMessage::screenshot_success(
                "buffer",
                sent,
                json!({ "fromBuffer": true, "totalInBuffer": total }),
            ),
        ])
    }
}

struct Job {
    manager: ConnectionManager,
    request: CaptureRequest,
}

/// Agent-side message handler serving `screenshot_request` frames.
pub struct CaptureService {
    jobs: mpsc::UnboundedSender<Job>,
}

impl CaptureService {
    /// Spawn the request worker. Must be called inside a tokio runtime.
    pub fn spawn(responder: CaptureResponder) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(Job { manager, request }) = rx.recv().await {
                let span = spans::capture_request(request.mode.as_str());
                let replies = responder.respond(request).instrument(span).await;
                // Responses are bound to the session that asked; never queue them.
                for reply in replies {
                    match manager.send_if_open(&reply) {
                        Ok(true) => {}
                        Ok(false) => debug!(kind = reply.kind(), "link down, response dropped"),
                        Err(e) => warn!(error = %e, "failed to send screenshot response"),
                    }
                }
            }
        });
        Self { jobs }
    }
}

impl MessageHandler for CaptureService {
    fn on_open(&self, manager: &ConnectionManager) {
        info!(code = ?manager.code().map(|c| c.to_string()), "relay link open");
    }

    fn on_message(&self, manager: &ConnectionManager, message: RelayMessage) {
        match message {
            RelayMessage::ScreenshotRequest {
                mode,
                count,
                quality,
            } => {
                let request = CaptureRequest {
                    mode,
                    count,
                    quality: quality.unwrap_or_default(),
                };
                debug!(?request, "screenshot requested");
                let job = Job {
                    manager: manager.clone(),
                    request,
                };
                if self.jobs.send(job).is_err() {
                    warn!("capture worker stopped, request dropped");
                }
            }
            RelayMessage::PartnerConnected => info!("remote client paired"),
            RelayMessage::PartnerDisconnected => info!("remote client left"),
            other => debug!(kind = other.kind(), "ignoring frame"),
        }
    }

    fn on_error(&self, _manager: &ConnectionManager, error: &RelayError) {
        debug!(error = %error, code = error.error_code(), "relay link error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::buffer::{CaptureBuffer, CapturePayload};
    use crate::capture::provider::UnavailableProvider;
    use crate::connection::transport::testing::{FakeConnector, FakeRemote};
    use crate::connection::{ConnectionState, ManagerOptions};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counter(AtomicUsize);

    #[async_trait]
    impl CaptureProvider for Counter {
        async fn capture(&self, _quality: Quality) -> Result<CapturePayload, CaptureError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CapturePayload::new(format!("data:image/png;base64,{n}")))
        }
    }

    fn responder(provider: Arc<dyn CaptureProvider>) -> (CaptureResponder, SharedBuffer) {
        let buffer = CaptureBuffer::new(5, Duration::from_secs(300)).shared();
        (CaptureResponder::new(provider, buffer.clone(), true), buffer)
    }

    fn request(mode: CaptureMode, count: Option<usize>) -> CaptureRequest {
        CaptureRequest {
            mode,
            count,
            quality: Quality::High,
        }
    }

    fn encode(messages: &[RelayMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| serde_json::from_str(&m.to_json().unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_buffer_mode_on_empty_buffer_reports_buffer_empty() {
        let (responder, _) = responder(Arc::new(Counter(AtomicUsize::new(0))));
        let frames = encode(&responder.respond(request(CaptureMode::Buffer, None)).await);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "screenshot_error");
        assert_eq!(frames[0]["error"]["type"], "BufferEmpty");
    }

    #[tokio::test]
    async fn test_single_captures_buffers_and_serves_newest() {
        let (responder, buffer) = responder(Arc::new(Counter(AtomicUsize::new(0))));
        let frames = encode(&responder.respond(request(CaptureMode::Single, None)).await);

        assert_eq!(frames[0]["type"], "screenshot-single");
        assert_eq!(frames[0]["payload"]["images"][0], "data:image/png;base64,1");
        assert_eq!(frames[1]["type"], "screenshot_success");
        assert_eq!(frames[1]["success"]["mode"], "single");
        assert_eq!(frames[1]["success"]["count"], 1);
        assert_eq!(buffer.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_buffer_mode_sends_latest_in_capture_order() {
        let (responder, buffer) = responder(Arc::new(Counter(AtomicUsize::new(0))));
        for _ in 0..4 {
            responder.respond(request(CaptureMode::Single, None)).await;
        }

        let frames = encode(&responder.respond(request(CaptureMode::Buffer, Some(3))).await);
        assert_eq!(frames[0]["type"], "screenshot-multi");
        let images: Vec<&str> = frames[0]["payload"]["images"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(
            images,
            [
                "data:image/png;base64,2",
                "data:image/png;base64,3",
                "data:image/png;base64,4"
            ]
        );
        assert_eq!(frames[1]["success"]["mode"], "buffer");
        assert_eq!(frames[1]["success"]["count"], 3);
        assert_eq!(frames[1]["success"]["details"]["fromBuffer"], true);
        assert_eq!(frames[1]["success"]["details"]["totalInBuffer"], 4);
        // Serving from the buffer does not consume it.
        assert_eq!(buffer.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_capture_failure_is_reported_per_request() {
        let (responder, buffer) = responder(Arc::new(UnavailableProvider));
        let frames = encode(&responder.respond(request(CaptureMode::Single, None)).await);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"]["type"], "NoDisplayAvailable");
        assert!(buffer.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_mode_is_rejected() {
        let (responder, _) = responder(Arc::new(Counter(AtomicUsize::new(0))));
        let frames = encode(&responder.respond(request(CaptureMode::Unknown, None)).await);
        assert_eq!(frames[0]["error"]["type"], "Unknown screenshot mode");
    }

    #[tokio::test]
    async fn test_single_without_buffering_leaves_buffer_alone() {
        let buffer = CaptureBuffer::new(5, Duration::from_secs(300)).shared();
        let responder = CaptureResponder::new(
            Arc::new(Counter(AtomicUsize::new(0))),
            buffer.clone(),
            false,
        );
        let frames = encode(&responder.respond(request(CaptureMode::Single, None)).await);
        assert_eq!(frames[0]["type"], "screenshot-single");
        assert!(buffer.lock().is_empty());
    }

    async fn serving_agent(responder: CaptureResponder) -> (ConnectionManager, FakeRemote) {
        let (connector, mut remotes) = FakeConnector::new();
        let manager = ConnectionManager::new(
            ManagerOptions {
                relay_url: "ws://relay.test".to_string(),
                ..ManagerOptions::default()
            },
            Arc::new(connector),
            Arc::new(CaptureService::spawn(responder)),
        );
        manager.connect("123456").unwrap();
        let remote = remotes.recv().await.unwrap();
        manager
            .subscribe()
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        (manager, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_requests_still_get_an_error_reply() {
        let (responder, _) = responder(Arc::new(Counter(AtomicUsize::new(0))));
        let (_manager, mut remote) = serving_agent(responder).await;

        remote.send_text(r#"{"type":"screenshot_request"}"#);
        remote.send_text(r#"{"type":"screenshot_request","mode":"buffer","count":-1}"#);
        remote.send_text(r#"{"type":"screenshot_request","mode":"weird"}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let errors: Vec<String> = remote
            .drain_json()
            .iter()
            .filter(|f| f["type"] == "screenshot_error")
            .filter_map(|f| f["error"]["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            errors,
            [
                "Unknown screenshot mode",
                "BufferEmpty",
                "Unknown screenshot mode"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_count_serves_whole_buffer() {
        let (responder, _) = responder(Arc::new(Counter(AtomicUsize::new(0))));
        for _ in 0..3 {
            responder.respond(request(CaptureMode::Single, None)).await;
        }
        let (_manager, mut remote) = serving_agent(responder).await;

        remote.send_text(r#"{"type":"screenshot_request","mode":"buffer","count":-1}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let frames = remote.drain_json();
        assert_eq!(frames[0]["type"], "screenshot-multi");
        assert_eq!(frames[0]["payload"]["images"].as_array().unwrap().len(), 3);
        assert_eq!(frames[1]["success"]["count"], 3);
    }

    struct Gated(Arc<tokio::sync::Notify>);

    #[async_trait]
    impl CaptureProvider for Gated {
        async fn capture(&self, _quality: Quality) -> Result<CapturePayload, CaptureError> {
            self.0.notified().await;
            Ok(CapturePayload::new("data:image/png;base64,late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_responses_are_dropped_while_link_is_down() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let (responder, _) = responder(Arc::new(Gated(Arc::clone(&gate))));
        let (manager, mut remote) = serving_agent(responder).await;

        remote.send_text(r#"{"type":"screenshot_request","mode":"single"}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;
        remote.drop_link();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // The capture finishes only after the link is gone.
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(manager.status().queued, 0);
    }
}
