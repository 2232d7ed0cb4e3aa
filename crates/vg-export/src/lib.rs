//! Export of snapshot and alert history for Vigil.
//!
//! Provides:
//! - JSON export that parses back into the exact history it came from
//! - CSV export with dotted column names and a fixed per-export schema
//! - Atomic artifact writing

pub mod artifact;
pub mod exporter;
pub mod flatten;

pub use artifact::{ExportArtifact, ExportFormat};
pub use exporter::{parse_alerts_json, parse_snapshots_json, snapshot_columns, Exporter};
pub use flatten::{flatten_record, CsvTable};
