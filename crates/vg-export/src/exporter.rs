use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use vg_types::{AggregatedSnapshot, Alert, Domain, ExportError, FieldSelection, ScoringConfig};

use crate::artifact::{ExportArtifact, ExportFormat};
use crate::flatten::{flatten_record, CsvTable, ARRAY_DELIMITER};

pub const METRICS_PREFIX: &str = "metrics_export";
pub const ALERTS_PREFIX: &str = "alerts_export";

/// Serializes history through a [`FieldSelection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exporter {
    selection: FieldSelection,
    /// CSV columns present in every snapshot export, reported or not.
    columns: BTreeSet<String>,
}

impl Exporter {
    pub fn new(selection: FieldSelection) -> Self {
        Self {
            selection,
            columns: BTreeSet::new(),
        }
    }

    /// An exporter whose CSV schema covers every configured axis, metric and
    /// series, so optional series that start reporting late keep the header
    /// stable.
    pub fn for_scoring(selection: FieldSelection, scoring: &ScoringConfig) -> Self {
        let columns = snapshot_columns(&selection, scoring);
        Self { selection, columns }
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn selection(&self) -> &FieldSelection {
        &self.selection
    }

    /// Export snapshot history. Nothing is produced on error.
    pub fn export(
        &self,
        format: ExportFormat,
        snapshots: &[AggregatedSnapshot],
        at: DateTime<Utc>,
    ) -> Result<ExportArtifact, ExportError> {
        if self.selection.is_empty() {
            return Err(ExportError::EmptySelection);
        }
        let views: Vec<_> = snapshots.iter().map(|s| self.selection.view(s)).collect();
        let bytes = match format {
            ExportFormat::Json => to_json(&views)?,
            ExportFormat::Csv => {
                let records = views
                    .iter()
                    .map(|view| to_value(view).map(|v| flatten_record(&v)))
                    .collect::<Result<Vec<_>, _>>()?;
                CsvTable::with_columns(self.columns.iter().cloned(), records)?.to_bytes()?
            }
        };
        debug!(format = %format, snapshots = snapshots.len(), bytes = bytes.len(), "snapshot export");
        Ok(ExportArtifact::new(METRICS_PREFIX, format, at, bytes))
    }

    /// Export the alert audit trail. In CSV the per-alert metric map is
    /// rendered into a single `metrics` cell (`name=value;...`) so every row
    /// shares one schema.
    pub fn export_alerts(
        &self,
        format: ExportFormat,
        alerts: &[Alert],
        at: DateTime<Utc>,
    ) -> Result<ExportArtifact, ExportError> {
        let bytes = match format {
            ExportFormat::Json => to_json(alerts)?,
            ExportFormat::Csv => {
                let records = alerts
                    .iter()
                    .map(|alert| -> Result<_, ExportError> {
                        let mut value = to_value(alert)?;
                        if let Value::Object(map) = &mut value {
                            map.insert("metrics".into(), Value::String(metrics_cell(&alert.metrics)));
                        }
                        Ok(flatten_record(&value))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                CsvTable::from_records(records)?.to_bytes()?
            }
        };
        debug!(format = %format, alerts = alerts.len(), bytes = bytes.len(), "alert export");
        Ok(ExportArtifact::new(ALERTS_PREFIX, format, at, bytes))
    }
}

/// Flattened column names of a snapshot view under `scoring`.
pub fn snapshot_columns(selection: &FieldSelection, scoring: &ScoringConfig) -> BTreeSet<String> {
    let mut columns = BTreeSet::from(["version".to_string(), "timestamp".to_string()]);
    for domain in Domain::ALL {
        let config = scoring.for_domain(domain);
        if selection.includes(domain) {
            columns.insert(format!("{domain}.composite"));
            columns.insert(format!("{domain}.status"));
            columns.extend(config.axes.keys().map(|axis| format!("{domain}.axes.{axis}")));
            for name in config.metrics.keys() {
                columns.insert(format!("{domain}.metrics.{name}"));
                if selection.include_trends {
                    columns.insert(format!("{domain}.trends.{name}"));
                }
            }
        }
        if selection.include_raw {
            columns.extend(config.metrics.values().map(|spec| format!("raw.{}", spec.series)));
        }
    }
    columns
}

/// Parse a full-selection JSON export back into snapshots.
pub fn parse_snapshots_json(bytes: &[u8]) -> Result<Vec<AggregatedSnapshot>, ExportError> {
    serde_json::from_slice(bytes).map_err(serialization_error)
}

pub fn parse_alerts_json(bytes: &[u8]) -> Result<Vec<Alert>, ExportError> {
    serde_json::from_slice(bytes).map_err(serialization_error)
}

fn metrics_cell(metrics: &BTreeMap<String, f64>) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(ARRAY_DELIMITER)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ExportError> {
    serde_json::to_vec_pretty(value).map_err(serialization_error)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ExportError> {
    serde_json::to_value(value).map_err(serialization_error)
}

fn serialization_error(e: serde_json::Error) -> ExportError {
    ExportError::Serialization {
        message: e.to_string(),
    }
}
