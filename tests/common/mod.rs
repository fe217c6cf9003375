//! Integration test common infrastructure.
//!
//! Provides a loopback relay and helpers for wiring agents and remote
//! clients to it.

pub mod relay;

#[allow(unused_imports)]
pub use relay::TestRelay;

use std::sync::Arc;
use std::time::Duration;

use snaplink::capture::{
    CaptureBuffer, CaptureProvider, CaptureResponder, CaptureService, SharedBuffer,
};
use snaplink::client::{ClientEvent, RemoteClient};
use snaplink::connection::{
    BackoffPolicy, ConnectionManager, ConnectionState, ManagerOptions, WsConnector,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Manager options tuned for loopback: fast retries, quiet heartbeat.
#[allow(dead_code)]
pub fn fast_options(relay: &TestRelay, announce: bool) -> ManagerOptions {
    ManagerOptions {
        relay_url: relay.url(),
        connect_timeout: Duration::from_secs(2),
        announce,
        backoff: BackoffPolicy {
            base: Duration::from_millis(50),
            factor: 2.0,
            max: Duration::from_millis(200),
            jitter: 0.1,
            attempt_ceiling: 10,
        },
        ..ManagerOptions::default()
    }
}

/// Agent manager serving captures from `provider` into a fresh buffer.
#[allow(dead_code)]
pub fn spawn_agent(
    relay: &TestRelay,
    provider: Arc<dyn CaptureProvider>,
) -> (ConnectionManager, SharedBuffer) {
    let buffer = CaptureBuffer::new(10, Duration::from_secs(300)).shared();
    let service = CaptureService::spawn(CaptureResponder::new(provider, buffer.clone(), true));
    let manager = ConnectionManager::new(
        fast_options(relay, false),
        Arc::new(WsConnector),
        Arc::new(service),
    );
    (manager, buffer)
}

/// Remote client manager and its event stream.
#[allow(dead_code)]
pub fn spawn_client(
    relay: &TestRelay,
) -> (ConnectionManager, mpsc::UnboundedReceiver<ClientEvent>) {
    let (client, events) = RemoteClient::new();
    let manager = ConnectionManager::new(
        fast_options(relay, true),
        Arc::new(WsConnector),
        Arc::new(client),
    );
    (manager, events)
}

/// Wait up to five seconds for `manager` to reach `state`.
#[allow(dead_code)]
pub async fn wait_state(manager: &ConnectionManager, state: ConnectionState) -> anyhow::Result<()> {
    let mut rx = manager.subscribe();
    timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state)).await??;
    Ok(())
}

/// Wait up to five seconds for the next event matching `predicate`.
#[allow(dead_code)]
pub async fn next_event<F>(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
    mut predicate: F,
) -> anyhow::Result<ClientEvent>
where
    F: FnMut(&ClientEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        anyhow::bail!("client event stream ended")
    })
    .await?
}
