use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vg_alerts::{LogChannel, MemoryChannel};
use vg_engine::{EngineEvent, TelemetryEngine};
use vg_gateway::WsConnector;
use vg_types::EngineConfig;

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
    Ok(())
}

fn load_config() -> anyhow::Result<EngineConfig> {
    let mut config = match std::env::var("VIGIL_CONFIG") {
        Ok(path) => {
            info!(path = %path, "loading configuration");
            EngineConfig::from_json_file(&path)?
        }
        Err(_) => EngineConfig::default(),
    };
    if let Ok(url) = std::env::var("VIGIL_FEED_URL") {
        config.gateway.endpoint = url;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let config = load_config()?;
    info!(endpoint = %config.gateway.endpoint, "Vigil engine service starting");

    let memory = Arc::new(MemoryChannel::new());
    let engine = TelemetryEngine::builder(config)
        .connector(Arc::new(WsConnector::new()))
        .notification_channel(Arc::new(LogChannel))
        .notification_channel(memory.clone())
        .build()?;

    let mut snapshots = engine.subscribe_snapshots();
    let mut events = engine.subscribe_events();
    engine.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => info!(
                    version = snapshot.version,
                    system = snapshot.system.composite.value(),
                    market = snapshot.market.composite.value(),
                    trading = snapshot.trading.composite.value(),
                    "snapshot"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "snapshot log lagging"),
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(EngineEvent::Fault { component, message }) => {
                    warn!(%component, %message, "engine fault")
                }
                Ok(EngineEvent::RiskStateChanged { from, to }) => {
                    info!(?from, %to, "risk state changed")
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    info!(
        notifications = memory.len(),
        alerts = engine.alerts().len(),
        "Vigil engine service stopped"
    );
    Ok(())
}
