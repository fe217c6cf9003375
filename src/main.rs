//! snaplink - desktop capture agent daemon.

use std::sync::Arc;
use std::time::Duration;

use snaplink::capture::{self, CaptureBuffer, CaptureResponder, CaptureScheduler, CaptureService};
use snaplink::config::{self, Config};
use snaplink::connection::{ConnectionManager, ConnectionState, ManagerOptions, WsConnector};
use snaplink::proto::PairingCode;
use snaplink::telemetry;
use snaplink::watchdog::{Watchdog, WatchdogSettings};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let loaded = Config::load(&config_path);

    // Initialize tracing; a config that failed to load logs as text
    let format = loaded
        .as_ref()
        .map(|config| config.logging.format)
        .unwrap_or_default();
    telemetry::init(format);

    let config = loaded.map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {}",
            errors.len(),
            config_path
        ));
    }

    let code = match config.relay.code.as_deref() {
        Some(code) => PairingCode::parse(code)?,
        None => {
            let code = PairingCode::generate();
            info!(code = %code, "Generated pairing code");
            code
        }
    };

    info!(
        relay = %config.relay.url,
        code = %code,
        buffer = config.buffer.enabled,
        "Starting snaplink agent"
    );

    // Capture side
    let buffer = CaptureBuffer::from_config(&config.buffer).shared();
    let provider = capture::provider::from_config(&config.capture);
    let service = CaptureService::spawn(CaptureResponder::new(
        Arc::clone(&provider),
        buffer.clone(),
        config.buffer.enabled,
    ));
    let scheduler = config
        .buffer
        .enabled
        .then(|| CaptureScheduler::spawn(provider, buffer, config.buffer.capture_interval()));

    // Relay link
    let manager = ConnectionManager::new(
        ManagerOptions::from_config(&config),
        Arc::new(WsConnector),
        Arc::new(service),
    );
    manager.connect(code.as_str())?;
    let watchdog = Watchdog::spawn(
        manager.clone(),
        WatchdogSettings::from_config(&config.watchdog),
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    watchdog.stop();
    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    manager.shutdown();

    let mut state = manager.subscribe();
    let closed = tokio::time::timeout(
        Duration::from_secs(3),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await;
    if closed.is_err() {
        warn!("Relay link did not close in time");
    }

    info!("snaplink stopped");
    Ok(())
}
