//! Relay connection manager.
//!
//! [`ConnectionManager`] keeps one logical link to the relay alive. It owns
//! the connection state, the outbound queue, the heartbeat and the
//! reconnect timer behind a single mutex; everything else (watchdogs,
//! handlers, the capture service) goes through its public methods.
//!
//! Each transport lives in its own link task tagged with a generation
//! number. Link tasks report [`TransportEvent`]s to one driver task, which
//! drops events from superseded generations and feeds the rest through
//! [`machine::apply`]. Handler callbacks run after the lock is released so a
//! handler may call straight back into the manager.

pub mod backoff;
pub mod heartbeat;
pub mod machine;
pub mod queue;
pub mod transport;

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use snaplink_proto::{CloseCode, PairingCode, ProbeKind, RelayMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{Instrument, debug, info, trace, warn};

use crate::config::Config;
use crate::error::RelayError;
use crate::handler::MessageHandler;
use crate::telemetry::spans;

pub use backoff::BackoffPolicy;
pub use heartbeat::{HeartbeatLink, HeartbeatMonitor, HeartbeatSettings};
pub use machine::{ConnectionState, TransportEvent};
pub use queue::{OutboundMessage, OutboundQueue};
pub use transport::{Connector, Frame, Transport, TransportError, WsConnector};

/// How long a link task waits for its close frame to be written.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection manager tuning.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Base relay URL; the pairing code is appended as a path segment.
    pub relay_url: String,
    pub connect_timeout: Duration,
    pub disconnect_grace: Duration,
    /// Send `connection_request` on every open.
    pub announce: bool,
    pub backoff: BackoffPolicy,
    pub heartbeat: HeartbeatSettings,
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            relay_url: config.relay.url.clone(),
            connect_timeout: config.relay.connect_timeout(),
            disconnect_grace: config.relay.disconnect_grace(),
            announce: config.relay.announce,
            backoff: BackoffPolicy::from_config(&config.backoff),
            heartbeat: HeartbeatSettings::from_config(&config.heartbeat),
        }
    }

    /// Full URL for `code`: `<relay_url>/<code>`.
    pub fn url_for(&self, code: &PairingCode) -> String {
        format!("{}/{}", self.relay_url.trim_end_matches('/'), code)
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Retry bookkeeping. `attempt` drives the backoff curve only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub last_attempt_at: Option<Instant>,
}

/// Point-in-time view of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub queued: usize,
    pub code: Option<PairingCode>,
    pub generation: u64,
}

enum LinkCommand {
    Send(String),
    Close { code: CloseCode, reason: String },
}

struct LinkHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

struct Shared {
    state: ConnectionState,
    code: Option<PairingCode>,
    generation: u64,
    retry: RetryState,
    queue: OutboundQueue,
    link: Option<LinkHandle>,
    heartbeat: Option<HeartbeatMonitor>,
    reconnect: Option<JoinHandle<()>>,
    intentional_until: Option<Instant>,
    shutting_down: bool,
    pending_connect: bool,
    last_activity: Instant,
}

impl Shared {
    fn is_intentional(&self, now: Instant) -> bool {
        self.intentional_until.is_some_and(|until| now < until)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(monitor) = self.heartbeat.take() {
            monitor.stop();
        }
    }

    /// Hand a frame to the live link. Gives the text back if there is none.
    fn send_on_link(&self, text: String) -> Result<(), String> {
        match &self.link {
            Some(link) => link
                .commands
                .send(LinkCommand::Send(text))
                .map_err(|mpsc::error::SendError(cmd)| match cmd {
                    LinkCommand::Send(text) => text,
                    LinkCommand::Close { .. } => String::new(),
                }),
            None => Err(text),
        }
    }

    fn close_link(&self, code: CloseCode, reason: &str) {
        if let Some(link) = &self.link {
            let _ = link.commands.send(LinkCommand::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

struct Inner {
    options: ManagerOptions,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn MessageHandler>,
    events: mpsc::UnboundedSender<(u64, TransportEvent)>,
    state_tx: watch::Sender<ConnectionState>,
    shared: Mutex<Shared>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        shared.cancel_reconnect();
        shared.stop_heartbeat();
        if let Some(link) = shared.link.take() {
            link.task.abort();
        }
    }
}

/// Handle to a relay connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create an idle manager. Must be called inside a tokio runtime.
    pub fn new(
        options: ManagerOptions,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(Inner {
            options,
            connector,
            handler,
            events,
            state_tx,
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                code: None,
                generation: 0,
                retry: RetryState::default(),
                queue: OutboundQueue::new(),
                link: None,
                heartbeat: None,
                reconnect: None,
                intentional_until: None,
                shutting_down: false,
                pending_connect: false,
                last_activity: Instant::now(),
            }),
        });
        tokio::spawn(drive(Arc::downgrade(&inner), events_rx));
        Self { inner }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn code(&self) -> Option<PairingCode> {
        self.inner.shared.lock().code.clone()
    }

    pub fn retry_state(&self) -> RetryState {
        self.inner.shared.lock().retry
    }

    pub fn status(&self) -> ConnectionStatus {
        let shared = self.inner.shared.lock();
        ConnectionStatus {
            state: shared.state,
            attempt: shared.retry.attempt,
            queued: shared.queue.len(),
            code: shared.code.clone(),
            generation: shared.generation,
        }
    }

    /// Time since the last inbound frame on any link.
    pub fn idle_for(&self) -> Duration {
        self.inner.shared.lock().last_activity.elapsed()
    }

    /// Connect to the relay under `code`.
    ///
    /// Fails fast on a malformed code. A no-op while a link is connecting or
    /// open. Clears any intentional-disconnect suppression.
    pub fn connect(&self, code: &str) -> Result<(), RelayError> {
        let code =
            PairingCode::parse(code).map_err(|_| RelayError::InvalidCodeFormat(code.to_string()))?;

        let mut shared = self.inner.shared.lock();
        if shared.shutting_down {
            return Err(RelayError::ShutDown);
        }
        shared.intentional_until = None;
        shared.cancel_reconnect();

        match shared.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Paired => {
                if shared.code.as_ref() != Some(&code) {
                    warn!(requested = %code, "already connected under another code, use change_code");
                } else {
                    debug!(state = %shared.state, "connect ignored, link already active");
                }
            }
            ConnectionState::Closing => {
                shared.code = Some(code);
                shared.pending_connect = true;
            }
            ConnectionState::Disconnected => {
                shared.code = Some(code);
                self.start_connect(&mut shared);
            }
        }
        Ok(())
    }

    /// Reconnect under the stored code unless suppressed.
    ///
    /// This is the entry point for timers and watchdogs. Returns whether a
    /// new attempt was started.
    pub fn request_connect(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.shutting_down || shared.code.is_none() {
            return false;
        }
        if shared.is_intentional(Instant::now()) {
            trace!("reconnect suppressed after intentional disconnect");
            return false;
        }
        if shared.state != ConnectionState::Disconnected {
            return false;
        }
        self.start_connect(&mut shared);
        true
    }

    /// Close the link and suppress automatic reconnection for the grace window.
    pub fn disconnect(&self) {
        let mut shared = self.inner.shared.lock();
        shared.intentional_until = Some(Instant::now() + self.inner.options.disconnect_grace);
        shared.pending_connect = false;
        shared.cancel_reconnect();
        if shared.state.is_active() {
            info!("disconnecting from relay");
            shared.close_link(CloseCode::NORMAL, "User disconnected");
            self.set_state(&mut shared, ConnectionState::Closing);
        }
    }

    /// Close for good. Every later connect request is refused.
    pub fn shutdown(&self) {
        let mut shared = self.inner.shared.lock();
        shared.shutting_down = true;
        shared.pending_connect = false;
        shared.cancel_reconnect();
        if shared.state.is_active() {
            info!("shutting down relay link");
            shared.close_link(CloseCode::NORMAL, "Application shutdown");
            self.set_state(&mut shared, ConnectionState::Closing);
        }
    }

    /// Drop the current link, if any, and connect again right away with a
    /// fresh retry counter.
    pub fn force_reconnect(&self) -> Result<(), RelayError> {
        let mut shared = self.inner.shared.lock();
        if shared.shutting_down {
            return Err(RelayError::ShutDown);
        }
        if shared.code.is_none() {
            return Err(RelayError::NoCode);
        }
        info!("forcing reconnect");
        self.restart(&mut shared);
        Ok(())
    }

    /// Switch to a new pairing code and reconnect under it.
    pub fn change_code(&self, code: &str) -> Result<(), RelayError> {
        let code =
            PairingCode::parse(code).map_err(|_| RelayError::InvalidCodeFormat(code.to_string()))?;
        let mut shared = self.inner.shared.lock();
        if shared.shutting_down {
            return Err(RelayError::ShutDown);
        }
        info!(code = %code, "changing pairing code");
        let dropped = shared.queue.len();
        if dropped > 0 {
            debug!(dropped, "discarding frames queued for the previous code");
            shared.queue.clear();
        }
        shared.code = Some(code);
        self.restart(&mut shared);
        Ok(())
    }

    /// Send a frame now if the link is open, otherwise queue it for the next open.
    pub fn send(&self, message: &RelayMessage) -> Result<(), RelayError> {
        let text = message.to_json()?;
        self.send_text(text);
        Ok(())
    }

    /// Send any serializable value as a JSON text frame.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), RelayError> {
        let text = serde_json::to_string(value).map_err(snaplink_proto::ProtoError::from)?;
        self.send_text(text);
        Ok(())
    }

    /// Send a frame only if the link is open right now. Nothing is queued.
    /// Returns whether the frame was handed to the link.
    pub fn send_if_open(&self, message: &RelayMessage) -> Result<bool, RelayError> {
        let text = message.to_json()?;
        let shared = self.inner.shared.lock();
        Ok(shared.state.is_open() && shared.send_on_link(text).is_ok())
    }

    /// Send a liveness probe on the open link. Probes are never queued.
    pub fn probe(&self, kind: ProbeKind) -> bool {
        self.send_if_open(&RelayMessage::probe(kind)).unwrap_or(false)
    }

    fn send_text(&self, text: String) {
        let mut shared = self.inner.shared.lock();
        if shared.state.is_open() {
            match shared.send_on_link(text) {
                Ok(()) => return,
                Err(text) => shared.queue.enqueue(text),
            }
        } else {
            shared.queue.enqueue(text);
        }
        trace!(queued = shared.queue.len(), "frame queued until next open");
    }

    fn restart(&self, shared: &mut Shared) {
        shared.intentional_until = None;
        shared.retry = RetryState::default();
        shared.cancel_reconnect();
        match shared.state {
            ConnectionState::Disconnected => self.start_connect(shared),
            ConnectionState::Closing => shared.pending_connect = true,
            _ => {
                shared.pending_connect = true;
                shared.close_link(CloseCode::FORCE_RECONNECT, "Forced reconnect");
                self.set_state(shared, ConnectionState::Closing);
            }
        }
    }

    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            info!(from = %shared.state, to = %next, "connection state changed");
            shared.state = next;
            self.inner.state_tx.send_replace(next);
        }
    }

    /// Open a new link. Callers guarantee the state is `Disconnected`.
    fn start_connect(&self, shared: &mut Shared) {
        let Some(code) = shared.code.clone() else {
            return;
        };
        shared.cancel_reconnect();
        shared.pending_connect = false;
        shared.generation += 1;
        shared.retry.last_attempt_at = Some(Instant::now());
        if let Some(old) = shared.link.take() {
            old.task.abort();
        }

        let generation = shared.generation;
        let url = self.inner.options.url_for(&code);
        info!(code = %code, generation, attempt = shared.retry.attempt, "connecting to relay");

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            run_link(
                Arc::clone(&self.inner.connector),
                url,
                self.inner.options.connect_timeout,
                generation,
                commands_rx,
                self.inner.events.clone(),
            )
            .instrument(spans::connection(code.as_str(), generation)),
        );
        shared.link = Some(LinkHandle { commands, task });
        self.set_state(shared, ConnectionState::Connecting);
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) {
        let notifications = {
            let mut shared = self.inner.shared.lock();
            if generation != shared.generation {
                trace!(generation, current = shared.generation, "dropping stale transport event");
                return;
            }

            let now = Instant::now();
            let ctx = machine::Context {
                state: shared.state,
                announce: self.inner.options.announce,
                intentional: shared.is_intentional(now),
                shutting_down: shared.shutting_down,
                pending_connect: shared.pending_connect,
                next_attempt: self.inner.options.backoff.next_attempt(shared.retry.attempt),
            };
            let transition = machine::apply(&ctx, event);
            self.set_state(&mut shared, transition.next);

            let mut notifications = Vec::new();
            for action in transition.actions {
                if action.is_notification() {
                    notifications.push(action);
                } else {
                    self.run_action(&mut shared, generation, action);
                }
            }
            notifications
        };

        let handler = &self.inner.handler;
        for action in notifications {
            match action {
                machine::Action::NotifyOpen => handler.on_open(self),
                machine::Action::Dispatch(message) => handler.on_message(self, message),
                machine::Action::NotifyError(error) => {
                    warn!(error = %error, "transport error");
                    handler.on_error(self, &RelayError::Transport(error));
                }
                machine::Action::NotifyClose { code, reason } => {
                    handler.on_close(self, code, &reason)
                }
                _ => {}
            }
        }
    }

    fn run_action(&self, shared: &mut Shared, generation: u64, action: machine::Action) {
        use machine::Action;

        match action {
            Action::ResetRetry => {
                shared.retry.attempt = 0;
                shared.last_activity = Instant::now();
            }
            Action::Announce => {
                if let Some(code) = shared.code.clone() {
                    match RelayMessage::connection_request(code).to_json() {
                        Ok(text) => {
                            let _ = shared.send_on_link(text);
                        }
                        Err(e) => warn!(error = %e, "failed to encode connection_request"),
                    }
                }
            }
            Action::FlushQueue => {
                let Some(link) = &shared.link else {
                    return;
                };
                let commands = link.commands.clone();
                let result = shared.queue.flush(|message| {
                    commands
                        .send(LinkCommand::Send(message.text.clone()))
                        .map_err(|_| TransportError::Closed)
                });
                match result {
                    Ok(0) => {}
                    Ok(sent) => debug!(sent, "flushed queued frames"),
                    Err(e) => warn!(error = %e, remaining = shared.queue.len(), "flush interrupted"),
                }
            }
            Action::StartHeartbeat => {
                shared.stop_heartbeat();
                shared.heartbeat = Some(HeartbeatMonitor::start(
                    self.inner.options.heartbeat,
                    GenerationLink {
                        inner: Arc::downgrade(&self.inner),
                        generation,
                    },
                ));
            }
            Action::StopHeartbeat => shared.stop_heartbeat(),
            Action::RecordActivity => {
                shared.last_activity = Instant::now();
                if let Some(heartbeat) = &shared.heartbeat {
                    heartbeat.record_activity();
                }
            }
            Action::ReplyPong => {
                if let Ok(text) = RelayMessage::pong().to_json() {
                    let _ = shared.send_on_link(text);
                }
            }
            Action::ScheduleReconnect { attempt } => {
                shared.retry.attempt = attempt;
                let delay = self.inner.options.backoff.next_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                shared.cancel_reconnect();
                let weak = Arc::downgrade(&self.inner);
                shared.reconnect = Some(tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        ConnectionManager { inner }.request_connect();
                    }
                }));
            }
            Action::ReconnectNow => self.start_connect(shared),
            Action::NotifyOpen
            | Action::Dispatch(_)
            | Action::NotifyError(_)
            | Action::NotifyClose { .. } => {}
        }
    }

    /// Force-close the link of `generation` if it is still the open one.
    fn force_close(&self, generation: u64, code: CloseCode, reason: &str) -> bool {
        let mut shared = self.inner.shared.lock();
        if generation != shared.generation || !shared.state.is_open() {
            return false;
        }
        shared.stop_heartbeat();
        shared.close_link(code, reason);
        self.set_state(&mut shared, ConnectionState::Closing);
        true
    }

    fn send_for_generation(&self, generation: u64, message: &RelayMessage) {
        let shared = self.inner.shared.lock();
        if generation != shared.generation || !shared.state.is_open() {
            return;
        }
        if let Ok(text) = message.to_json() {
            let _ = shared.send_on_link(text);
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish()
    }
}

/// Heartbeat callbacks bound to one connection generation.
struct GenerationLink {
    inner: Weak<Inner>,
    generation: u64,
}

impl HeartbeatLink for GenerationLink {
    fn send_ping(&self) {
        if let Some(inner) = self.inner.upgrade() {
            ConnectionManager { inner }.send_for_generation(self.generation, &RelayMessage::ping());
        }
    }

    fn unresponsive(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let manager = ConnectionManager { inner };
        if manager.force_close(self.generation, CloseCode::HEARTBEAT_TIMEOUT, "Heartbeat timeout") {
            manager
                .inner
                .handler
                .on_error(&manager, &RelayError::HeartbeatTimeout);
        }
    }
}

async fn drive(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
    while let Some((generation, event)) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        ConnectionManager { inner }.handle_event(generation, event);
    }
}

async fn run_link(
    connector: Arc<dyn Connector>,
    url: String,
    connect_timeout: Duration,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<(u64, TransportEvent)>,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send((generation, event));
    };

    let connecting = timeout(connect_timeout, connector.connect(&url));
    tokio::pin!(connecting);

    let transport = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(Ok(transport)) => break transport,
                Ok(Err(error)) => {
                    let reason = error.to_string();
                    emit(TransportEvent::Errored(error));
                    emit(TransportEvent::Closed { code: CloseCode::ABNORMAL, reason });
                    return;
                }
                Err(_) => {
                    emit(TransportEvent::Errored(TransportError::Timeout(connect_timeout)));
                    emit(TransportEvent::Closed {
                        code: CloseCode::CONNECT_TIMEOUT,
                        reason: "Connection timeout".to_string(),
                    });
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Close { code, reason }) => {
                    debug!("connect abandoned");
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(LinkCommand::Send(_)) => trace!("frame dropped, link not open"),
                None => return,
            },
        }
    };

    let Transport { mut sink, mut stream } = transport;
    debug!(url = %url, "transport open");
    emit(TransportEvent::Opened);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send(text)) => {
                    trace!(len = text.len(), "sending frame");
                    if let Err(error) = sink.send(Frame::Text(text)).await {
                        emit(TransportEvent::Errored(error));
                    }
                }
                Some(LinkCommand::Close { code, reason }) => {
                    let frame = Frame::Close { code, reason: reason.clone() };
                    let _ = timeout(CLOSE_WRITE_TIMEOUT, sink.send(frame)).await;
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                None => {
                    let frame = Frame::Close {
                        code: CloseCode::GOING_AWAY,
                        reason: String::new(),
                    };
                    let _ = timeout(CLOSE_WRITE_TIMEOUT, sink.send(frame)).await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    trace!(len = text.len(), "frame received");
                    emit(TransportEvent::MessageReceived(text));
                }
                Some(Ok(Frame::Close { code, reason })) => {
                    debug!(code = %code, reason = %reason, "relay closed link");
                    emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Err(error)) => emit(TransportEvent::Errored(error)),
                None => {
                    emit(TransportEvent::Closed {
                        code: CloseCode::ABNORMAL,
                        reason: "Connection lost".to_string(),
                    });
                    return;
                }
            },
        }
    }
}
