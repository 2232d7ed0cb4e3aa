//! Alert records and the intake seam used by the ingestion gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::sample::Domain;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, e.g. a volume spike.
    Info,
    /// Threshold breached.
    Warning,
    /// Threshold breached by at least the critical multiple.
    Critical,
}

/// Logical identity of an alert condition. Repeated breaches of the same key
/// update one alert instead of raising new ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub domain: Domain,
    pub metric: String,
}

impl AlertKey {
    pub fn new(domain: Domain, metric: impl Into<String>) -> Self {
        Self {
            domain,
            metric: metric.into(),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.metric)
    }
}

/// A raised (and possibly resolved) alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: Domain,
    pub metric: String,
    pub severity: Severity,
    pub message: String,
    /// Last time the condition was observed.
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether an operator has acknowledged the alert.
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        key: AlertKey,
        severity: Severity,
        message: String,
        metrics: BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type: key.domain,
            metric: key.metric,
            severity,
            message,
            timestamp,
            metrics,
            resolved: false,
            resolved_at: None,
            acknowledged: false,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.alert_type, self.metric.clone())
    }

    pub fn is_active(&self) -> bool {
        !self.resolved
    }
}

/// Alert payload pushed by the upstream feed alongside metric updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAlert {
    #[serde(rename = "type")]
    pub alert_type: Domain,
    /// Metric the alert is about. Falls back to the message text when absent.
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default = "default_external_severity")]
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub resolved: bool,
}

fn default_external_severity() -> Severity {
    Severity::Warning
}

impl ExternalAlert {
    pub fn key(&self) -> AlertKey {
        let metric = self
            .metric
            .clone()
            .unwrap_or_else(|| format!("external:{}", self.message));
        AlertKey::new(self.alert_type, metric)
    }
}

/// Receiver for alert payloads that bypass periodic evaluation.
pub trait AlertIntake: Send + Sync {
    fn ingest_external(&self, alerts: Vec<ExternalAlert>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn alert_creation() {
        let alert = Alert::new(
            AlertKey::new(Domain::System, "latency"),
            Severity::Warning,
            "Latency 1100ms above 1000ms".into(),
            BTreeMap::from([("latency".to_string(), 1100.0)]),
            Utc::now(),
        );
        assert!(alert.is_active());
        assert!(!alert.acknowledged);
        assert_eq!(alert.key(), AlertKey::new(Domain::System, "latency"));
    }

    #[test]
    fn alert_serializes_type_field() {
        let alert = Alert::new(
            AlertKey::new(Domain::Market, "volatility"),
            Severity::Critical,
            "Volatility spike".into(),
            BTreeMap::new(),
            Utc::now(),
        );
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["type"], "market");
        assert_eq!(value["severity"], "critical");
        let back: Alert = serde_json::from_value(value).unwrap();
        assert_eq!(back, alert);
    }

    #[test]
    fn external_alert_defaults() {
        let payload: ExternalAlert =
            serde_json::from_str(r#"{"type":"trading","message":"Drawdown limit near"}"#).unwrap();
        assert_eq!(payload.severity, Severity::Warning);
        assert!(!payload.resolved);
        assert_eq!(payload.key().metric, "external:Drawdown limit near");
    }
}
