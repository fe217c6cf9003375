//! Heartbeat monitor.
//!
//! While a link is open the monitor sends a `ping` every `interval` and
//! watches inbound activity. If nothing at all arrives for `timeout`, it asks
//! the link to force-close, which the manager treats like any abnormal close.
//!
//! One monitor belongs to exactly one connection generation. [`HeartbeatMonitor::stop`]
//! cancels its task before returning, and the link adapter it calls back into
//! is tagged with the generation, so a monitor from an older connection can
//! never act on a newer one.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HeartbeatConfig;

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl HeartbeatSettings {
    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self {
            interval: config.interval(),
            timeout: config.timeout(),
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self::from_config(&HeartbeatConfig::default())
    }
}

/// What a monitor drives. Implemented by the manager per generation.
pub trait HeartbeatLink: Send + Sync + 'static {
    fn send_ping(&self);
    fn unresponsive(&self);
}

/// A running heartbeat for one open link.
pub struct HeartbeatMonitor {
    cancel: CancellationToken,
    activity: watch::Sender<Instant>,
    task: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Start pinging and watching for inbound activity.
    pub fn start<L: HeartbeatLink>(settings: HeartbeatSettings, link: L) -> Self {
        let cancel = CancellationToken::new();
        let (activity, activity_rx) = watch::channel(Instant::now());
        let task = tokio::spawn(run(settings, link, cancel.clone(), activity_rx));
        Self {
            cancel,
            activity,
            task,
        }
    }

    /// Any inbound frame counts as liveness.
    pub fn record_activity(&self) {
        self.activity.send_replace(Instant::now());
    }

    /// Cancel the ping interval and the unresponsiveness deadline.
    pub fn stop(self) {
        // Drop does the work.
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run<L: HeartbeatLink>(
    settings: HeartbeatSettings,
    link: L,
    cancel: CancellationToken,
    mut activity: watch::Receiver<Instant>,
) {
    let period = settings.interval.max(MIN_PERIOD);
    let timeout = settings.timeout.max(MIN_PERIOD);

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_activity = *activity.borrow_and_update();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = activity.changed() => {
                if changed.is_err() {
                    break;
                }
                last_activity = *activity.borrow_and_update();
            }
            _ = sleep_until(last_activity + timeout) => {
                if cancel.is_cancelled() {
                    break;
                }
                warn!(silent_for = ?timeout, "no inbound traffic, closing link");
                link.unresponsive();
                break;
            }
            _ = ticker.tick() => {
                debug!("heartbeat ping");
                link.send_ping();
            }
        }
    }
}
