//! Reconnecting ingestion gateway.
//!
//! One background task owns the connection. It moves through
//! `Disconnected -> Connecting -> Connected -> Disconnected` and ends in
//! `Halted` once [`ReconnectPolicy`] runs out of attempts. Validated samples
//! go straight into the [`TelemetryStore`]; alert payloads go to the
//! configured [`AlertIntake`] as soon as they arrive.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use vg_store::TelemetryStore;
use vg_types::{AlertIntake, ConnectionError, GatewayConfig, SubscriptionConfig};

use crate::protocol::{InboundMessage, OutboundCommand};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connection, Connector};

const EVENT_CAPACITY: usize = 64;
const COMMAND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnects exhausted. Only [`Gateway::start`] leaves this state.
    Halted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Lifecycle notifications published by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    StateChanged(ConnectionState),
    Error(ConnectionError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub messages_received: u64,
    /// Malformed messages that were discarded.
    pub messages_dropped: u64,
    pub samples_written: u64,
    pub alerts_forwarded: u64,
    /// Transport connections opened since construction.
    pub connections: u64,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

type Command = (String, oneshot::Sender<Result<(), ConnectionError>>);

struct Shared {
    state: RwLock<ConnectionState>,
    commands: RwLock<Option<mpsc::Sender<Command>>>,
    events: broadcast::Sender<GatewayEvent>,
    received: AtomicU64,
    dropped: AtomicU64,
    samples: AtomicU64,
    alerts: AtomicU64,
    connections: AtomicU64,
    reconnect_attempts: AtomicU32,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "gateway state change");
            let _ = self.events.send(GatewayEvent::StateChanged(next));
        }
    }

    fn publish_error(&self, error: ConnectionError) {
        let _ = self.events.send(GatewayEvent::Error(error));
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Stream ingestion gateway.
pub struct Gateway {
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    store: Arc<TelemetryStore>,
    intake: Option<Arc<dyn AlertIntake>>,
    shared: Arc<Shared>,
    task: Mutex<Option<Running>>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        store: Arc<TelemetryStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            connector,
            store,
            intake: None,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                commands: RwLock::new(None),
                events,
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                samples: AtomicU64::new(0),
                alerts: AtomicU64::new(0),
                connections: AtomicU64::new(0),
                reconnect_attempts: AtomicU32::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Forward inbound alert payloads to `intake`.
    pub fn with_alert_intake(mut self, intake: Arc<dyn AlertIntake>) -> Self {
        self.intake = Some(intake);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            messages_received: self.shared.received.load(Ordering::Relaxed),
            messages_dropped: self.shared.dropped.load(Ordering::Relaxed),
            samples_written: self.shared.samples.load(Ordering::Relaxed),
            alerts_forwarded: self.shared.alerts.load(Ordering::Relaxed),
            connections: self.shared.connections.load(Ordering::Relaxed),
            reconnect_attempts: self.shared.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    /// Spawn the connection task. A no-op while it is already running; after
    /// a halt this is the manual restart.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() {
                return;
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            endpoint: self.config.endpoint.clone(),
            subscription: self.config.subscription(),
            connect_timeout: self.config.connect_timeout(),
            send_timeout: self.config.send_timeout(),
            policy: ReconnectPolicy::from_config(&self.config),
            connector: Arc::clone(&self.connector),
            store: Arc::clone(&self.store),
            intake: self.intake.clone(),
            shared: Arc::clone(&self.shared),
        };
        info!(endpoint = %self.config.endpoint, "starting gateway");
        let handle = tokio::spawn(worker.run(shutdown_rx));
        *task = Some(Running { shutdown, handle });
    }

    /// Close the connection and stop retrying. Waits for the connection
    /// task to exit.
    pub async fn stop(&self) {
        let running = self.task.lock().take();
        if let Some(Running { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "gateway task ended abnormally");
            }
            info!("gateway stopped");
        }
    }

    /// Send a command over the live connection.
    ///
    /// Fails with [`ConnectionError::NotConnected`] immediately unless the
    /// gateway is connected. Both queueing and the write are bounded by
    /// `send_timeout_ms`.
    pub async fn send(&self, command: &OutboundCommand) -> Result<(), ConnectionError> {
        let sender = self
            .shared
            .commands
            .read()
            .clone()
            .ok_or(ConnectionError::NotConnected)?;
        let send_timeout = self.config.send_timeout();
        let timeout_ms = self.config.send_timeout_ms;

        let (reply_tx, reply_rx) = oneshot::channel();
        match timeout(send_timeout, sender.send((command.to_text(), reply_tx))).await {
            Err(_) => return Err(ConnectionError::SendTimeout { timeout_ms }),
            Ok(Err(_)) => return Err(ConnectionError::NotConnected),
            Ok(Ok(())) => {}
        }

        match timeout(send_timeout, reply_rx).await {
            Err(_) => Err(ConnectionError::SendTimeout { timeout_ms }),
            Ok(Err(_)) => Err(ConnectionError::NotConnected),
            Ok(Ok(result)) => result,
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

enum Exit {
    Shutdown,
    Lost(ConnectionError),
}

struct Worker {
    endpoint: String,
    subscription: SubscriptionConfig,
    connect_timeout: Duration,
    send_timeout: Duration,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    store: Arc<TelemetryStore>,
    intake: Option<Arc<dyn AlertIntake>>,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.shared.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = shutdown.changed() => break,
                result = timeout(self.connect_timeout, self.connector.connect(&self.endpoint)) => {
                    match result {
                        Ok(r) => r,
                        Err(_) => Err(ConnectionError::ConnectTimeout {
                            timeout_ms: self.connect_timeout.as_millis() as u64,
                        }),
                    }
                }
            };

            match connected {
                Ok(mut conn) => {
                    self.shared.connections.fetch_add(1, Ordering::Relaxed);
                    let subscribe = OutboundCommand::subscribe(&self.subscription).to_text();
                    if let Err(error) = self.write(conn.as_mut(), subscribe).await {
                        warn!(endpoint = %self.endpoint, error = %error, "subscribe failed");
                        conn.close().await;
                        self.shared.set_state(ConnectionState::Disconnected);
                        self.shared.publish_error(error);
                    } else {
                        self.policy.reset();
                        self.shared.reconnect_attempts.store(0, Ordering::Relaxed);

                        match self.serve(conn.as_mut(), &mut shutdown).await {
                            Exit::Shutdown => {
                                conn.close().await;
                                break;
                            }
                            Exit::Lost(error) => {
                                warn!(endpoint = %self.endpoint, error = %error, "connection lost");
                                self.shared.set_state(ConnectionState::Disconnected);
                                self.shared.publish_error(error);
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(endpoint = %self.endpoint, error = %error, "connect failed");
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.shared.publish_error(error);
                }
            }

            let Some(delay) = self.policy.next_delay() else {
                let attempts = self.policy.attempts();
                warn!(endpoint = %self.endpoint, attempts, "reconnect attempts exhausted, halting");
                self.shared.set_state(ConnectionState::Halted);
                self.shared
                    .publish_error(ConnectionError::MaxReconnectAttempts { attempts });
                return;
            };
            let attempt = self.policy.attempts();
            self.shared.reconnect_attempts.store(attempt, Ordering::Relaxed);
            info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Drive one subscribed connection until it fails or shutdown is
    /// requested. Only now is the gateway reported as connected.
    async fn serve(
        &self,
        conn: &mut dyn Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let (command_tx, mut commands) = mpsc::channel::<Command>(COMMAND_CAPACITY);
        *self.shared.commands.write() = Some(command_tx);
        self.shared.set_state(ConnectionState::Connected);
        info!(endpoint = %self.endpoint, channels = ?self.subscription.channel_names(), "connected");

        let exit = self.pump(conn, &mut commands, shutdown).await;

        *self.shared.commands.write() = None;
        exit
    }

    async fn pump(
        &self,
        conn: &mut dyn Connection,
        commands: &mut mpsc::Receiver<Command>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        loop {
            let mut pending = None;
            tokio::select! {
                _ = shutdown.changed() => return Exit::Shutdown,
                command = commands.recv() => pending = command,
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => self.ingest(&text),
                    Some(Err(error)) => return Exit::Lost(error),
                    None => {
                        return Exit::Lost(ConnectionError::Closed {
                            reason: "peer closed the connection".to_string(),
                        })
                    }
                },
            }

            if let Some((text, reply)) = pending {
                let result = self.write(conn, text).await;
                let failure = result.as_ref().err().cloned();
                let _ = reply.send(result);
                if let Some(error) = failure {
                    return Exit::Lost(error);
                }
            }
        }
    }

    async fn write(&self, conn: &mut dyn Connection, text: String) -> Result<(), ConnectionError> {
        match timeout(self.send_timeout, conn.send(text)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::SendTimeout {
                timeout_ms: self.send_timeout.as_millis() as u64,
            }),
        }
    }

    fn ingest(&self, text: &str) {
        self.shared.received.fetch_add(1, Ordering::Relaxed);

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(error) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(error = %error, "dropping malformed message");
                return;
            }
        };

        let translated = message.translate(&self.subscription, Utc::now());
        if translated.skipped_fields > 0 || translated.rejected_alerts > 0 {
            debug!(
                skipped_fields = translated.skipped_fields,
                rejected_alerts = translated.rejected_alerts,
                "ignored parts of message"
            );
        }

        let written = translated.samples.len() as u64;
        for sample in translated.samples {
            self.store.record_sample(sample);
        }
        self.shared.samples.fetch_add(written, Ordering::Relaxed);

        if translated.alerts.is_empty() {
            return;
        }
        match &self.intake {
            Some(intake) => {
                self.shared
                    .alerts
                    .fetch_add(translated.alerts.len() as u64, Ordering::Relaxed);
                intake.ingest_external(translated.alerts);
            }
            None => debug!(count = translated.alerts.len(), "no alert intake, dropping alerts"),
        }
    }
}
