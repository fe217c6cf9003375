//! Watchdog scheduler.
//!
//! One task runs every periodic check. Checks only ever go through the
//! manager's public API (`request_connect`, `probe`), so overlapping checks
//! are absorbed by the manager's single-flight guard.
//!
//! - reconnect check: link down and not suppressed, ask for a connect
//! - liveness check: link open but silent for `idle_probe`, send `connection_verify`
//! - network/wake signals: after `wake_settle`, reconnect or send `wake_check`

use std::time::Duration;

use snaplink_proto::ProbeKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::WatchdogConfig;
use crate::connection::{ConnectionManager, ConnectionState};

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Host events that suggest the link may be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    /// Network connectivity came back.
    Online,
    /// The host resumed from sleep.
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub reconnect_check: Duration,
    pub liveness_check: Duration,
    pub idle_probe: Duration,
    pub wake_settle: Duration,
}

impl WatchdogSettings {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            reconnect_check: Duration::from_secs(config.reconnect_check_secs),
            liveness_check: Duration::from_secs(config.liveness_check_secs),
            idle_probe: Duration::from_secs(config.idle_probe_secs),
            wake_settle: Duration::from_secs(config.wake_settle_secs),
        }
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self::from_config(&WatchdogConfig::default())
    }
}

/// Sends [`NetworkSignal`]s to a running watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    signals: mpsc::UnboundedSender<NetworkSignal>,
}

impl WatchdogHandle {
    pub fn notify(&self, signal: NetworkSignal) {
        let _ = self.signals.send(signal);
    }
}

pub struct Watchdog {
    cancel: CancellationToken,
    signals: mpsc::UnboundedSender<NetworkSignal>,
    task: JoinHandle<()>,
}

impl Watchdog {
    pub fn spawn(manager: ConnectionManager, settings: WatchdogSettings) -> Self {
        let cancel = CancellationToken::new();
        let (signals, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(manager, settings, cancel.clone(), rx));
        Self {
            cancel,
            signals,
            task,
        }
    }

    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            signals: self.signals.clone(),
        }
    }

    pub fn stop(self) {}
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run(
    manager: ConnectionManager,
    settings: WatchdogSettings,
    cancel: CancellationToken,
    mut signals: mpsc::UnboundedReceiver<NetworkSignal>,
) {
    let start = Instant::now();
    let reconnect_period = settings.reconnect_check.max(MIN_PERIOD);
    let liveness_period = settings.liveness_check.max(MIN_PERIOD);
    let mut reconnect = interval_at(start + reconnect_period, reconnect_period);
    let mut liveness = interval_at(start + liveness_period, liveness_period);
    reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let settle = sleep_until(start);
    tokio::pin!(settle);
    let mut settling = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reconnect.tick() => check_reconnect(&manager),
            _ = liveness.tick() => check_liveness(&manager, settings.idle_probe),
            Some(signal) = signals.recv() => {
                info!(?signal, settle = ?settings.wake_settle, "network signal");
                settle.as_mut().reset(Instant::now() + settings.wake_settle);
                settling = true;
            }
            _ = &mut settle, if settling => {
                settling = false;
                after_wake(&manager);
            }
        }
    }
}

fn check_reconnect(manager: &ConnectionManager) {
    if manager.state() == ConnectionState::Disconnected && manager.request_connect() {
        info!("watchdog: link down, reconnecting");
    }
}

fn check_liveness(manager: &ConnectionManager, idle_probe: Duration) {
    if !manager.state().is_open() {
        return;
    }
    let idle = manager.idle_for();
    if idle >= idle_probe && manager.probe(ProbeKind::ConnectionVerify) {
        debug!(idle = ?idle, "watchdog: idle link, verifying");
    }
}

fn after_wake(manager: &ConnectionManager) {
    match manager.state() {
        ConnectionState::Disconnected => {
            if manager.request_connect() {
                info!("watchdog: reconnecting after wake");
            }
        }
        state if state.is_open() => {
            manager.probe(ProbeKind::WakeCheck);
        }
        _ => {}
    }
}
