//! Alert engine: periodic rule evaluation plus external alert intake.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use vg_types::{
    AggregatedSnapshot, Alert, AlertConfig, AlertError, AlertIntake, AlertKey, ExternalAlert,
    ThresholdRule,
};

use crate::book::{AlertBook, BookChange};
use crate::notify::{
    AlertNotification, ChangeKind, NotificationChannel, NotificationQueue, Notifier,
};
use crate::rules::{alert_metrics, describe, evaluate_rule, RuleOutcome};

/// Alerts touched by one evaluation or intake batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertChanges {
    pub raised: Vec<Alert>,
    pub updated: Vec<Alert>,
    pub resolved: Vec<Alert>,
}

impl AlertChanges {
    pub fn is_empty(&self) -> bool {
        self.raised.is_empty() && self.updated.is_empty() && self.resolved.is_empty()
    }

    /// Raised then resolved alerts. Refreshes of an open alert are not
    /// notified again.
    pub fn notifications(&self) -> Vec<AlertNotification> {
        let tagged = |kind: ChangeKind, alerts: &[Alert]| {
            alerts
                .iter()
                .cloned()
                .map(move |alert| AlertNotification::new(kind, alert))
                .collect::<Vec<_>>()
        };
        let mut out = tagged(ChangeKind::Raised, &self.raised);
        out.extend(tagged(ChangeKind::Resolved, &self.resolved));
        out
    }

    fn record(&mut self, change: BookChange) {
        match change {
            BookChange::Raised(alert) => self.raised.push(alert),
            BookChange::Updated(alert) => self.updated.push(alert),
        }
    }
}

/// Owns the alert book. Only [`AlertEngine::acknowledge`] mutates alerts
/// from outside.
pub struct AlertEngine {
    config: AlertConfig,
    book: RwLock<AlertBook>,
    queue: NotificationQueue,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self::with_channels(config, Vec::new())
    }

    pub fn with_channels(config: AlertConfig, channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        let notifier = Notifier::new(channels, config.notify_timeout());
        Self {
            book: RwLock::new(AlertBook::new(config.history_limit)),
            config,
            queue: NotificationQueue::new(notifier),
        }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.config.rules
    }

    /// Check every rule against `snapshot`: raise or refresh breaches and
    /// resolve unresolved alerts whose condition cleared. Rules whose value
    /// is absent leave their alert untouched.
    pub fn evaluate(&self, snapshot: &AggregatedSnapshot, now: DateTime<Utc>) -> AlertChanges {
        let mut changes = AlertChanges::default();
        {
            let mut book = self.book.write();
            for rule in &self.config.rules {
                let key = AlertKey::new(rule.domain, rule.metric.clone());
                match evaluate_rule(rule, snapshot, self.config.multiplier_for(rule)) {
                    RuleOutcome::Absent => {}
                    RuleOutcome::Clear { value } => {
                        if let Some(alert) = book.resolve(&key, now) {
                            info!(%key, value, "alert resolved");
                            changes.resolved.push(alert);
                        }
                    }
                    RuleOutcome::Breach { value, severity } => {
                        let change = book.upsert(
                            key,
                            severity,
                            describe(rule, value),
                            alert_metrics(rule, value),
                            now,
                        );
                        changes.record(change);
                    }
                }
            }
        }

        if !changes.raised.is_empty() || !changes.resolved.is_empty() {
            debug!(
                version = snapshot.version,
                raised = changes.raised.len(),
                updated = changes.updated.len(),
                resolved = changes.resolved.len(),
                "alert evaluation"
            );
        }
        self.dispatch(&changes);
        changes
    }

    /// Apply alert payloads pushed by the feed, with the same per-key
    /// deduplication as rule alerts. `resolved: true` resolves the key.
    pub fn ingest(&self, alerts: Vec<ExternalAlert>, now: DateTime<Utc>) -> AlertChanges {
        let mut changes = AlertChanges::default();
        {
            let mut book = self.book.write();
            for external in alerts {
                let key = external.key();
                if external.resolved {
                    if let Some(alert) = book.resolve(&key, now) {
                        changes.resolved.push(alert);
                    }
                    continue;
                }
                let change = book.upsert(key, external.severity, external.message, external.metrics, now);
                changes.record(change);
            }
        }
        self.dispatch(&changes);
        changes
    }

    pub fn acknowledge(&self, id: Uuid) -> Result<(), AlertError> {
        let alert = self.book.write().acknowledge(id)?;
        info!(alert = %alert.id, key = %alert.key(), "alert acknowledged");
        Ok(())
    }

    /// Full audit trail, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.book.read().alerts().cloned().collect()
    }

    pub fn active(&self) -> Vec<Alert> {
        self.book.read().active().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.book.read().get(id).cloned()
    }

    fn dispatch(&self, changes: &AlertChanges) {
        self.queue.push(changes.notifications());
    }
}

impl AlertIntake for AlertEngine {
    fn ingest_external(&self, alerts: Vec<ExternalAlert>) {
        self.ingest(alerts, Utc::now());
    }
}
