//! Notification fan-out.
//!
//! Raised and resolved alerts are offered to each registered
//! [`NotificationChannel`]. Channels run concurrently, each under its own
//! timeout, so a slow or failing channel never holds up the others. Batches
//! go through one [`NotificationQueue`] and arrive in evaluation order.

use async_trait::async_trait;
use crossbeam_channel::{Sender, TrySendError};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vg_types::{Alert, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Raised,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub kind: ChangeKind,
    pub alert: Alert,
}

impl AlertNotification {
    pub fn new(kind: ChangeKind, alert: Alert) -> Self {
        Self { kind, alert }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel {channel} is closed")]
    Closed { channel: String },

    #[error("channel {channel} is full")]
    Full { channel: String },

    #[error("channel {channel} timed out after {timeout_ms} ms")]
    Timeout { channel: String, timeout_ms: u64 },

    #[error("delivery failed: {message}")]
    Failed { message: String },
}

/// A sink for alert changes.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &AlertNotification) -> Result<(), ChannelError>;
}

/// Keeps every notification in memory, for dashboards and tests.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    received: Mutex<Vec<AlertNotification>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<AlertNotification> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

#[async_trait]
impl NotificationChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn notify(&self, notification: &AlertNotification) -> Result<(), ChannelError> {
        self.received.lock().push(notification.clone());
        Ok(())
    }
}

/// Writes alert changes to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &AlertNotification) -> Result<(), ChannelError> {
        let alert = &notification.alert;
        let key = alert.key();
        match (notification.kind, alert.severity) {
            (ChangeKind::Resolved, _) => info!(%key, %alert.message, "ALERT RESOLVED"),
            (_, Severity::Critical) => warn!(%key, %alert.message, "ALERT CRITICAL"),
            (_, Severity::Warning) => warn!(%key, %alert.message, "ALERT WARNING"),
            (_, Severity::Info) => info!(%key, %alert.message, "ALERT INFO"),
        }
        Ok(())
    }
}

/// Hands notifications to an external notifier over a crossbeam channel.
#[derive(Debug, Clone)]
pub struct ForwardChannel {
    name: String,
    tx: Sender<AlertNotification>,
}

impl ForwardChannel {
    pub fn new(name: impl Into<String>, tx: Sender<AlertNotification>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }
}

#[async_trait]
impl NotificationChannel for ForwardChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, notification: &AlertNotification) -> Result<(), ChannelError> {
        self.tx
            .try_send(notification.clone())
            .map_err(|e| match e {
                TrySendError::Full(_) => ChannelError::Full {
                    channel: self.name.clone(),
                },
                TrySendError::Disconnected(_) => ChannelError::Closed {
                    channel: self.name.clone(),
                },
            })
    }
}

/// Delivers notifications to a fixed set of channels.
#[derive(Clone)]
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Deliver in order; returns the number of failed channel deliveries.
    pub async fn deliver(&self, notifications: &[AlertNotification]) -> usize {
        let mut failures = 0;
        for notification in notifications {
            let results = join_all(
                self.channels
                    .iter()
                    .map(|channel| self.deliver_one(channel.as_ref(), notification)),
            )
            .await;
            for (channel, result) in self.channels.iter().zip(results) {
                if let Err(e) = result {
                    failures += 1;
                    warn!(
                        channel = channel.name(),
                        alert = %notification.alert.id,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        }
        failures
    }

    async fn deliver_one(
        &self,
        channel: &dyn NotificationChannel,
        notification: &AlertNotification,
    ) -> Result<(), ChannelError> {
        match tokio::time::timeout(self.timeout, channel.notify(notification)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout {
                channel: channel.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// Single ordered delivery lane in front of a [`Notifier`].
///
/// The first batch spawns one delivery task on the current runtime; later
/// batches queue behind it. When that runtime is gone the next batch starts
/// a fresh task.
pub struct NotificationQueue {
    notifier: Notifier,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<AlertNotification>>>>,
}

impl NotificationQueue {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            tx: Mutex::new(None),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Queue a batch. Without a tokio runtime the batch is dropped.
    pub fn push(&self, batch: Vec<AlertNotification>) {
        if batch.is_empty() || self.notifier.is_empty() {
            return;
        }
        let mut tx = self.tx.lock();
        let batch = match tx.as_ref() {
            Some(sender) => match sender.send(batch) {
                Ok(()) => return,
                Err(mpsc::error::SendError(batch)) => batch,
            },
            None => batch,
        };

        let Ok(handle) = Handle::try_current() else {
            debug!(notifications = batch.len(), "no runtime, skipping notification delivery");
            *tx = None;
            return;
        };
        let (sender, mut rx) = mpsc::unbounded_channel::<Vec<AlertNotification>>();
        let notifier = self.notifier.clone();
        handle.spawn(async move {
            while let Some(batch) = rx.recv().await {
                notifier.deliver(&batch).await;
            }
        });
        if sender.send(batch).is_err() {
            warn!("notification task exited before its first batch");
        }
        *tx = Some(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use vg_types::{AlertKey, Domain};

    struct SlowChannel;

    #[async_trait]
    impl NotificationChannel for SlowChannel {
        fn name(&self) -> &str {
            "slow"
        }

        async fn notify(&self, _notification: &AlertNotification) -> Result<(), ChannelError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl NotificationChannel for BrokenChannel {
        fn name(&self) -> &str {
            "broken"
        }

        async fn notify(&self, _notification: &AlertNotification) -> Result<(), ChannelError> {
            Err(ChannelError::Failed {
                message: "smtp unreachable".into(),
            })
        }
    }

    fn notification(severity: Severity) -> AlertNotification {
        AlertNotification::new(
            ChangeKind::Raised,
            Alert::new(
                AlertKey::new(Domain::System, "latency"),
                severity,
                "High latency".into(),
                BTreeMap::new(),
                Utc::now(),
            ),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn failing_channels_do_not_block_others() {
        let memory = Arc::new(MemoryChannel::new());
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(SlowChannel),
            Arc::new(BrokenChannel),
            memory.clone(),
            Arc::new(LogChannel),
        ];
        let notifier = Notifier::new(channels, Duration::from_millis(500));

        let batch = vec![notification(Severity::Critical), notification(Severity::Warning)];
        let failures = notifier.deliver(&batch).await;

        assert_eq!(failures, 4);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.received()[0].alert.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn forward_channel_reports_closed_receiver() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let channel = ForwardChannel::new("pager", tx);

        channel.notify(&notification(Severity::Info)).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().alert.severity, Severity::Info);

        channel.notify(&notification(Severity::Info)).await.unwrap();
        assert_eq!(
            channel.notify(&notification(Severity::Info)).await,
            Err(ChannelError::Full {
                channel: "pager".into()
            })
        );

        drop(rx);
        assert!(matches!(
            channel.notify(&notification(Severity::Info)).await,
            Err(ChannelError::Closed { .. })
        ));
    }

    #[test]
    fn notification_serializes_kind_lowercase() {
        let json = serde_json::to_value(notification(Severity::Warning)).unwrap();
        assert_eq!(json["kind"], "raised");
        assert_eq!(json["alert"]["type"], "system");
        assert_eq!(json["alert"]["severity"], "warning");
    }
}
