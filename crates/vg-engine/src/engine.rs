//! Engine lifecycle: wires the pipeline and drives the periodic loops.

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vg_alerts::{AlertEngine, NotificationChannel};
use vg_export::{ExportArtifact, ExportFormat, Exporter};
use vg_gateway::{Connector, Gateway, GatewayEvent, WsConnector};
use vg_risk::{ControlState, ExecutionClient, ExposureState, RiskAssessment, RiskController};
use vg_store::TelemetryStore;
use vg_types::{
    AggregatedSnapshot, Alert, EngineConfig, FieldSelection, ProcessingError, VgError, VgResult,
};

use crate::aggregator::Aggregator;
use crate::processor::ScoreProcessor;

const EVENT_CAPACITY: usize = 64;

/// Periodic component a fault originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Processor,
    Alerts,
    Risk,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Processor => "processor",
            Component::Alerts => "alerts",
            Component::Risk => "risk",
        })
    }
}

/// Events emitted by the engine for consumers (UI banners, logging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A tick failed or panicked. The last good state stays readable.
    Fault { component: Component, message: String },
    RiskStateChanged {
        from: Option<ControlState>,
        to: ControlState,
    },
}

/// Collects the collaborators of a [`TelemetryEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    connector: Option<Arc<dyn Connector>>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    executor: Option<Arc<dyn ExecutionClient>>,
    export_selection: FieldSelection,
}

impl EngineBuilder {
    /// Transport for the gateway. Defaults to [`WsConnector`].
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn notification_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ExecutionClient>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn export_selection(mut self, selection: FieldSelection) -> Self {
        self.export_selection = selection;
        self
    }

    pub fn build(self) -> VgResult<TelemetryEngine> {
        self.config.validate()?;
        let config = self.config;

        let store = Arc::new(TelemetryStore::new(config.store_capacity));
        let alerts = Arc::new(AlertEngine::with_channels(config.alerts.clone(), self.channels));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new()) as Arc<dyn Connector>);
        let gateway = Gateway::new(config.gateway.clone(), connector, Arc::clone(&store))
            .with_alert_intake(alerts.clone());
        let processor = Arc::new(ScoreProcessor::new(
            config.scoring.clone(),
            config.trend_significance,
            Arc::clone(&store),
        ));
        let aggregator = Arc::new(Aggregator::new(config.window_size));
        let risk = Arc::new(RiskController::new(config.risk.clone(), self.executor));
        let exporter = Exporter::for_scoring(self.export_selection, &config.scoring);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(TelemetryEngine {
            config,
            store,
            gateway,
            processor,
            aggregator,
            alerts,
            risk,
            exporter,
            events,
            running: Mutex::new(None),
        })
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// The telemetry pipeline: gateway, store, processor, aggregator, alerts
/// and risk controller, with an explicit start/shutdown lifecycle.
pub struct TelemetryEngine {
    config: EngineConfig,
    store: Arc<TelemetryStore>,
    gateway: Gateway,
    processor: Arc<ScoreProcessor>,
    aggregator: Arc<Aggregator>,
    alerts: Arc<AlertEngine>,
    risk: Arc<RiskController>,
    exporter: Exporter,
    events: broadcast::Sender<EngineEvent>,
    running: Mutex<Option<Running>>,
}

impl TelemetryEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            connector: None,
            channels: Vec::new(),
            executor: None,
            export_selection: FieldSelection::all(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the gateway and the processor, alert and risk loops. A no-op
    /// while already running. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.gateway.start();

        let processor = {
            let processor = Arc::clone(&self.processor);
            let aggregator = Arc::clone(&self.aggregator);
            let events = self.events.clone();
            tokio::spawn(run_loop(
                self.config.update_interval(),
                shutdown_rx.clone(),
                move || {
                    let processor = Arc::clone(&processor);
                    let aggregator = Arc::clone(&aggregator);
                    let events = events.clone();
                    async move {
                        guard_tick(Component::Processor, &events, async {
                            let output = processor.compute(Utc::now())?;
                            aggregator.publish(output);
                            Ok::<(), VgError>(())
                        })
                        .await
                    }
                },
            ))
        };

        let alerts = {
            let alerts = Arc::clone(&self.alerts);
            let aggregator = Arc::clone(&self.aggregator);
            let events = self.events.clone();
            tokio::spawn(run_loop(
                self.config.alert_interval(),
                shutdown_rx.clone(),
                move || {
                    let alerts = Arc::clone(&alerts);
                    let aggregator = Arc::clone(&aggregator);
                    let events = events.clone();
                    async move {
                        guard_tick(Component::Alerts, &events, async {
                            if let Some(snapshot) = aggregator.latest() {
                                alerts.evaluate(&snapshot, Utc::now());
                            }
                            Ok::<(), VgError>(())
                        })
                        .await
                    }
                },
            ))
        };

        let risk = {
            let risk = Arc::clone(&self.risk);
            let aggregator = Arc::clone(&self.aggregator);
            let events = self.events.clone();
            tokio::spawn(run_loop(
                self.config.risk_interval(),
                shutdown_rx,
                move || {
                    let risk = Arc::clone(&risk);
                    let aggregator = Arc::clone(&aggregator);
                    let events = events.clone();
                    async move {
                        let tick_events = events.clone();
                        guard_tick(Component::Risk, &events, async move {
                            if let Some(snapshot) = aggregator.latest() {
                                let from = risk.latest().map(|a| a.state);
                                let assessment = risk.evaluate(&snapshot, Utc::now()).await;
                                if from != Some(assessment.state) {
                                    let _ = tick_events.send(EngineEvent::RiskStateChanged {
                                        from,
                                        to: assessment.state,
                                    });
                                }
                            }
                            Ok::<(), VgError>(())
                        })
                        .await
                    }
                },
            ))
        };

        info!(
            update_ms = self.config.update_interval_ms,
            alert_ms = self.config.alert_interval_ms,
            risk_ms = self.config.risk_interval_ms,
            "telemetry engine started"
        );
        *running = Some(Running {
            shutdown,
            tasks: vec![processor, alerts, risk],
        });
    }

    /// Stop every loop and close the gateway connection. In-flight ticks
    /// finish; no new tick starts. Returns once every task has exited.
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        let Some(Running { shutdown, tasks }) = running else {
            return;
        };
        let _ = shutdown.send(true);
        self.gateway.stop().await;
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        info!("telemetry engine stopped");
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<AggregatedSnapshot> {
        self.aggregator.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn gateway_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.gateway.subscribe()
    }

    pub fn latest_snapshot(&self) -> Option<AggregatedSnapshot> {
        self.aggregator.latest()
    }

    pub fn history(&self) -> Vec<AggregatedSnapshot> {
        self.aggregator.history()
    }

    pub fn view(&self, selection: &FieldSelection) -> VgResult<Vec<serde_json::Value>> {
        self.aggregator.view(selection)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.alerts()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active()
    }

    pub fn acknowledge(&self, alert_id: Uuid) -> VgResult<()> {
        Ok(self.alerts.acknowledge(alert_id)?)
    }

    /// Export the current snapshot history through the configured selection.
    pub fn export(&self, format: ExportFormat) -> VgResult<ExportArtifact> {
        Ok(self
            .exporter
            .export(format, &self.aggregator.history(), Utc::now())?)
    }

    pub fn export_alerts(&self, format: ExportFormat) -> VgResult<ExportArtifact> {
        Ok(self
            .exporter
            .export_alerts(format, &self.alerts.alerts(), Utc::now())?)
    }

    pub fn risk_assessment(&self) -> Option<RiskAssessment> {
        self.risk.latest()
    }

    pub fn update_exposure(&self, exposure: ExposureState) {
        self.risk.update_exposure(exposure);
    }

    /// Dispatch one control action of the latest assessment.
    pub async fn execute_action(&self, action_id: Uuid) -> VgResult<()> {
        Ok(self.risk.execute(action_id).await?)
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

/// Run `tick` every `period` until `shutdown` flips. Missed ticks are
/// skipped rather than bunched up.
async fn run_loop<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if *shutdown.borrow() {
                    break;
                }
                tick().await;
            }
        }
    }
}

/// Per-tick failure boundary: errors and panics become
/// [`EngineEvent::Fault`] instead of ending the loop.
async fn guard_tick<Fut>(component: Component, events: &broadcast::Sender<EngineEvent>, tick: Fut)
where
    Fut: Future<Output = Result<(), VgError>>,
{
    let message = match AssertUnwindSafe(tick).catch_unwind().await {
        Ok(Ok(())) => return,
        Ok(Err(VgError::Processing(e @ ProcessingError::MissingSeries { .. }))) => {
            debug!(%component, error = %e, "tick skipped");
            e.to_string()
        }
        Ok(Err(e)) => {
            warn!(%component, error = %e, "tick failed");
            e.to_string()
        }
        Err(payload) => {
            let e = ProcessingError::Panicked {
                message: panic_message(payload.as_ref()),
            };
            warn!(%component, error = %e, "tick panicked");
            e.to_string()
        }
    };
    let _ = events.send(EngineEvent::Fault { component, message });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
