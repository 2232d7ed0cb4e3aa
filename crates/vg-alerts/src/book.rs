//! Bounded, deduplicated alert audit trail.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

use vg_types::{Alert, AlertError, AlertKey, Severity};

/// What an upsert did to the book.
#[derive(Debug, Clone, PartialEq)]
pub enum BookChange {
    Raised(Alert),
    Updated(Alert),
}

/// Alerts in arrival order plus an index of the unresolved alert per key.
///
/// At most one unresolved alert exists per [`AlertKey`]. When full, the
/// oldest resolved alert is evicted first; the oldest unresolved alert goes
/// only when nothing is resolved.
#[derive(Debug, Clone)]
pub struct AlertBook {
    alerts: VecDeque<Alert>,
    active: HashMap<AlertKey, Uuid>,
    limit: usize,
}

impl AlertBook {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            alerts: VecDeque::with_capacity(limit),
            active: HashMap::new(),
            limit,
        }
    }

    /// Raise a new alert for `key`, or refresh the unresolved one in place.
    pub fn upsert(
        &mut self,
        key: AlertKey,
        severity: Severity,
        message: String,
        metrics: BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> BookChange {
        if let Some(alert) = self.active_mut(&key) {
            alert.severity = severity;
            alert.message = message;
            alert.metrics = metrics;
            alert.timestamp = now;
            return BookChange::Updated(alert.clone());
        }

        if self.alerts.len() >= self.limit {
            self.evict();
        }
        let alert = Alert::new(key.clone(), severity, message, metrics, now);
        self.active.insert(key, alert.id);
        self.alerts.push_back(alert.clone());
        BookChange::Raised(alert)
    }

    /// Resolve the unresolved alert for `key`, if any.
    pub fn resolve(&mut self, key: &AlertKey, now: DateTime<Utc>) -> Option<Alert> {
        let id = self.active.remove(key)?;
        let alert = self.alerts.iter_mut().find(|a| a.id == id)?;
        alert.resolved = true;
        alert.resolved_at = Some(now);
        Some(alert.clone())
    }

    pub fn acknowledge(&mut self, id: Uuid) -> Result<Alert, AlertError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AlertError::NotFound { id: id.to_string() })?;
        alert.acknowledged = true;
        Ok(alert.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<&Alert> {
        self.alerts.iter().find(|a| a.id == id)
    }

    pub fn is_active(&self, key: &AlertKey) -> bool {
        self.active.contains_key(key)
    }

    /// Oldest first.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| a.is_active())
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    fn active_mut(&mut self, key: &AlertKey) -> Option<&mut Alert> {
        let id = *self.active.get(key)?;
        self.alerts.iter_mut().find(|a| a.id == id)
    }

    fn evict(&mut self) {
        let index = self.alerts.iter().position(|a| a.resolved).unwrap_or(0);
        if let Some(evicted) = self.alerts.remove(index) {
            if !evicted.resolved {
                self.active.remove(&evicted.key());
            }
            debug!(alert = %evicted.id, key = %evicted.key(), resolved = evicted.resolved, "evicting alert");
        }
    }
}
