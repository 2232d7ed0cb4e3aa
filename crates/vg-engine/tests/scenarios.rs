//! End-to-end scenarios over a loopback feed with a paused clock.

use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use vg_alerts::{ChangeKind, MemoryChannel};
use vg_engine::{Component, EngineEvent, TelemetryEngine};
use vg_export::{parse_snapshots_json, ExportFormat};
use vg_gateway::{ConnectionState, GatewayEvent, LoopbackConnector, LoopbackPeer};
use vg_risk::{ActionKind, ControlState, ExecutionDirection, ExposureState, PaperExecutionClient};
use vg_types::{Alert, ConnectionError, EngineConfig, Severity};

fn config() -> EngineConfig {
    let mut config = EngineConfig {
        update_interval_ms: 100,
        alert_interval_ms: 100,
        risk_interval_ms: 100,
        window_size: 20,
        ..EngineConfig::default()
    };
    config.gateway.endpoint = "loopback://feed".into();
    config.gateway.reconnect_interval_ms = 100;
    config.gateway.max_reconnect_attempts = 3;
    config.gateway.max_reconnect_delay_ms = 1_000;
    config
}

struct Harness {
    engine: TelemetryEngine,
    connector: Arc<LoopbackConnector>,
    peers: UnboundedReceiver<LoopbackPeer>,
    memory: Arc<MemoryChannel>,
    paper: Arc<PaperExecutionClient>,
}

fn harness() -> Harness {
    let (connector, peers) = LoopbackConnector::new();
    let connector = Arc::new(connector);
    let memory = Arc::new(MemoryChannel::new());
    let paper = Arc::new(PaperExecutionClient::new());
    let engine = TelemetryEngine::builder(config())
        .connector(connector.clone())
        .notification_channel(memory.clone())
        .executor(paper.clone())
        .build()
        .unwrap();
    Harness {
        engine,
        connector,
        peers,
        memory,
        paper,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(60), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn connect(peers: &mut UnboundedReceiver<LoopbackPeer>) -> LoopbackPeer {
    let mut peer = peers.recv().await.expect("gateway never connected");
    let subscribe = peer.next_outbound().await.expect("no subscribe command");
    let command: serde_json::Value = serde_json::from_str(&subscribe).unwrap();
    assert_eq!(command["type"], "subscribe");
    assert_eq!(command["channels"], json!(["system", "market", "trading"]));
    peer
}

/// One full update covering every required series of the default scoring.
fn baseline(peer: &LoopbackPeer) {
    assert!(peer.push_json(&json!({
        "type": "update",
        "data": {
            "system": {"cpu_usage": 40, "memory_usage": 50, "latency": 120, "error_rate": 0.01},
            "market": {"volatility": 0.02, "spread": 0.001, "liquidity": 800000},
            "trading": {"win_rate": 0.6, "drawdown": 0.05, "exposure": 0.4}
        }
    })));
}

fn push_latencies(peer: &LoopbackPeer, values: &[f64]) {
    for latency in values {
        assert!(peer.push_json(&json!({"type": "system", "data": {"latency": latency}})));
    }
}

fn latency_alerts(engine: &TelemetryEngine) -> Vec<Alert> {
    engine
        .alerts()
        .into_iter()
        .filter(|a| a.metric == "latency")
        .collect()
}

fn latency_notifications(memory: &MemoryChannel) -> Vec<ChangeKind> {
    memory
        .received()
        .into_iter()
        .filter(|n| n.alert.metric == "latency")
        .map(|n| n.kind)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn latency_spike_raises_single_critical_alert() {
    let mut h = harness();
    h.engine.start();
    let peer = connect(&mut h.peers).await;
    baseline(&peer);
    push_latencies(&peer, &[50.0, 55.0, 60.0, 1200.0]);

    wait_for(|| !latency_alerts(&h.engine).is_empty()).await;
    let first = latency_alerts(&h.engine);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].severity, Severity::Critical);
    assert!(first[0].message.contains("1200"));

    // the breach persists over many ticks without duplicating the alert
    tokio::time::sleep(Duration::from_millis(500)).await;
    let later = latency_alerts(&h.engine);
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].id, first[0].id);
    assert!(later[0].timestamp >= first[0].timestamp);
    assert_eq!(latency_notifications(&h.memory), vec![ChangeKind::Raised]);

    // back under the threshold: resolved, nothing new raised
    push_latencies(&peer, &[90.0]);
    wait_for(|| latency_alerts(&h.engine).iter().all(|a| a.resolved)).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let resolved = latency_alerts(&h.engine);
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].resolved_at.is_some());
    assert_eq!(
        latency_notifications(&h.memory),
        vec![ChangeKind::Raised, ChangeKind::Resolved]
    );

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn moderate_latency_breach_is_a_warning() {
    let mut h = harness();
    h.engine.start();
    let peer = connect(&mut h.peers).await;
    baseline(&peer);
    push_latencies(&peer, &[50.0, 55.0, 60.0, 1100.0]);

    wait_for(|| !latency_alerts(&h.engine).is_empty()).await;
    let alerts = latency_alerts(&h.engine);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Warning);

    h.engine.acknowledge(alerts[0].id).unwrap();
    assert!(latency_alerts(&h.engine)[0].acknowledged);

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn feed_alerts_surface_without_waiting_for_a_tick() {
    let mut h = harness();
    h.engine.start();
    let peer = connect(&mut h.peers).await;

    assert!(peer.push_json(&json!({
        "type": "update",
        "data": {
            "alerts": [{"type": "market", "metric": "liquidity", "severity": "critical",
                        "message": "Liquidity dried up"}]
        }
    })));
    wait_for(|| h.engine.gateway().stats().alerts_forwarded == 1).await;

    let alerts = h.engine.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, "liquidity");
    assert_eq!(alerts[0].severity, Severity::Critical);
    // no snapshot yet: the alert came straight from the gateway
    assert!(h.engine.latest_snapshot().is_none());

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn snapshots_flow_and_export_round_trips() {
    let mut h = harness();
    let mut snapshots = h.engine.subscribe_snapshots();
    h.engine.start();
    let peer = connect(&mut h.peers).await;
    baseline(&peer);

    let first = timeout(Duration::from_secs(10), snapshots.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(first.raw_value("system.latency"), Some(120.0));

    wait_for(|| h.engine.history().len() >= 5).await;
    h.engine.shutdown().await;
    assert!(!h.engine.is_running());

    let history = h.engine.history();
    let versions: Vec<_> = history.iter().map(|s| s.version).collect();
    assert!(versions.windows(2).all(|w| w[1] == w[0] + 1));

    let artifact = h.engine.export(ExportFormat::Json).unwrap();
    assert!(artifact.file_name.starts_with("metrics_export_"));
    assert_eq!(parse_snapshots_json(&artifact.bytes).unwrap(), history);
    let dir = tempfile::tempdir().unwrap();
    let path = artifact.write_to(dir.path()).unwrap();
    assert_eq!(std::fs::read(path).unwrap(), artifact.bytes);

    let csv = h.engine.export(ExportFormat::Csv).unwrap();
    let text = String::from_utf8(csv.bytes).unwrap();
    assert_eq!(text.lines().count(), history.len() + 1);

    // nothing ticks after shutdown
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.engine.history(), history);
}

#[tokio::test(start_paused = true)]
async fn csv_export_survives_a_series_that_starts_late() {
    let mut h = harness();
    h.engine.start();
    let peer = connect(&mut h.peers).await;
    baseline(&peer);
    wait_for(|| h.engine.history().len() >= 2).await;

    assert!(peer.push_json(&json!({"type": "system", "data": {"uptime": 0.99}})));
    wait_for(|| {
        h.engine
            .latest_snapshot()
            .is_some_and(|s| s.raw_value("system.uptime").is_some())
    })
    .await;
    h.engine.shutdown().await;

    let history = h.engine.history();
    assert!(history[0].raw_value("system.uptime").is_none());

    let csv = h.engine.export(ExportFormat::Csv).unwrap();
    let text = String::from_utf8(csv.bytes).unwrap();
    let mut lines = text.lines();
    let header: Vec<_> = lines.next().unwrap().split(',').collect();
    let uptime = header.iter().position(|h| *h == "raw.system.uptime").unwrap();
    let cells: Vec<_> = lines.map(|line| line.split(',').nth(uptime).unwrap().to_string()).collect();
    assert_eq!(cells.len(), history.len());
    assert_eq!(cells[0], "");
    assert_eq!(cells.last().map(String::as_str), Some("0.99"));
    // configured but never reported
    assert!(header.contains(&"raw.market.volume"));
}

#[tokio::test(start_paused = true)]
async fn cold_store_reports_skipped_ticks() {
    let mut h = harness();
    let mut events = h.engine.subscribe_events();
    h.engine.start();
    let _peer = connect(&mut h.peers).await;

    let event = timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        EngineEvent::Fault { component, message } => {
            assert_eq!(component, Component::Processor);
            assert!(message.contains("no samples for required series"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(h.engine.latest_snapshot().is_none());

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn gateway_gives_up_after_three_reconnects() {
    let h = harness();
    h.connector.refuse_connections(true);
    let mut gateway_events = h.engine.gateway_events();
    h.engine.start();

    let attempts = timeout(Duration::from_secs(60), async {
        loop {
            match gateway_events.recv().await {
                Ok(GatewayEvent::Error(ConnectionError::MaxReconnectAttempts { attempts })) => {
                    return attempts
                }
                Ok(_) => continue,
                Err(e) => panic!("gateway events failed: {e}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(attempts, 3);
    assert_eq!(h.engine.gateway().state(), ConnectionState::Halted);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.attempts(), 4);
    // the engine itself keeps running
    assert!(h.engine.is_running());

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_hot_ratio_puts_risk_in_adjusting() {
    let mut h = harness();
    h.engine.start();
    let peer = connect(&mut h.peers).await;
    baseline(&peer);
    h.engine.update_exposure(ExposureState {
        realized_loss: dec!(9000),
        gross_exposure: dec!(500000),
        volatility: Some(0.03),
    });

    wait_for(|| h.engine.risk_assessment().is_some()).await;
    let assessment = h.engine.risk_assessment().unwrap();
    assert!((assessment.risk_score - 0.567).abs() < 1e-3);
    assert_eq!(assessment.state, ControlState::Adjusting);
    assert_eq!(assessment.actions.len(), 1);
    assert!(h.paper.requests().is_empty());

    h.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn emergency_dispatches_immediate_actions() {
    let mut h = harness();
    let mut events = h.engine.subscribe_events();
    h.engine.start();
    let peer = connect(&mut h.peers).await;
    baseline(&peer);
    h.engine.update_exposure(ExposureState {
        realized_loss: dec!(12500),
        gross_exposure: dec!(950000),
        volatility: Some(0.09),
    });

    wait_for(|| h.engine.risk_assessment().is_some()).await;
    let assessment = h.engine.risk_assessment().unwrap();
    assert_eq!(assessment.state, ControlState::Emergency);
    let directions: Vec<_> = h.paper.requests().iter().map(|r| r.direction).collect();
    assert_eq!(
        directions,
        vec![ExecutionDirection::Decrease, ExecutionDirection::Close]
    );

    // later emergency ticks do not resend the same actions
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.paper.requests().len(), 2);
    assert_eq!(h.engine.risk_assessment().unwrap().dispatched.len(), 2);

    let changed = timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(EngineEvent::RiskStateChanged { from, to }) = events.recv().await {
                return (from, to);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(changed, (None, ControlState::Emergency));

    h.engine.shutdown().await;

    // non-immediate actions wait for an explicit call
    let latest = h.engine.risk_assessment().unwrap();
    let before = h.paper.requests().len();
    let hedge = latest
        .actions
        .iter()
        .find(|a| a.kind == ActionKind::IncreaseHedge)
        .unwrap();
    assert!(!latest.dispatched.contains(&hedge.id));
    h.engine.execute_action(hedge.id).await.unwrap();

    let requests = h.paper.requests();
    assert_eq!(requests.len(), before + 1);
    assert_eq!(requests[before].direction, ExecutionDirection::Hedge);
    assert!(h
        .engine
        .risk_assessment()
        .unwrap()
        .dispatched
        .contains(&hedge.id));
}
