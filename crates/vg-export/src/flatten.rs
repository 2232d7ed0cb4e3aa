//! Flattening of nested records into CSV rows.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use vg_types::ExportError;

/// Joins array elements within one cell.
pub const ARRAY_DELIMITER: &str = ";";

/// Flatten a JSON record into `dot.separated.key -> cell` pairs.
///
/// Arrays are joined with [`ARRAY_DELIMITER`], nulls become empty cells and
/// a non-object record lands in a single `value` column.
pub fn flatten_record(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Value::Object(_) => flatten_into("", value, &mut out),
        other => {
            out.insert("value".to_string(), render_cell(other));
        }
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&path, child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), render_cell(other));
        }
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(_) | Value::Array(_) => item.to_string(),
                scalar => render_cell(scalar),
            })
            .collect::<Vec<_>>()
            .join(ARRAY_DELIMITER),
        Value::Object(_) => value.to_string(),
    }
}

/// Rows sharing one header.
///
/// The header is the union of the seeded columns and every record's keys, in
/// key order. A record without a value for some column gets an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn from_records(records: Vec<BTreeMap<String, String>>) -> Result<Self, ExportError> {
        Self::with_columns(std::iter::empty::<String>(), records)
    }

    /// Build a table over `columns` plus whatever keys the records carry.
    ///
    /// Fails when one path is a leaf in one place and a nested object in
    /// another (`a` next to `a.b`), since no single header can hold both.
    pub fn with_columns<I, S>(
        columns: I,
        records: Vec<BTreeMap<String, String>>,
    ) -> Result<Self, ExportError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: BTreeSet<String> = columns.into_iter().map(Into::into).collect();
        for (index, record) in records.iter().enumerate() {
            for key in record.keys() {
                if keys.contains(key) {
                    continue;
                }
                if let Some(clash) = conflicting_column(&keys, key) {
                    return Err(ExportError::SchemaMismatch {
                        index,
                        detail: format!("column {key} conflicts with {clash}"),
                    });
                }
                keys.insert(key.clone());
            }
        }
        if records.is_empty() && keys.is_empty() {
            return Ok(Self::default());
        }

        let header: Vec<String> = keys.into_iter().collect();
        let rows = records
            .into_iter()
            .map(|mut record| {
                header
                    .iter()
                    .map(|column| record.remove(column).unwrap_or_default())
                    .collect()
            })
            .collect();
        Ok(Self { header, rows })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if !self.header.is_empty() {
            writer.write_record(&self.header).map_err(csv_error)?;
        }
        for row in &self.rows {
            writer.write_record(row).map_err(csv_error)?;
        }
        writer.into_inner().map_err(|e| ExportError::Serialization {
            message: e.to_string(),
        })
    }
}

/// A column that is an ancestor or descendant path of `key`.
fn conflicting_column(keys: &BTreeSet<String>, key: &str) -> Option<String> {
    let ancestor = key
        .match_indices('.')
        .map(|(at, _)| &key[..at])
        .find(|prefix| keys.contains(*prefix));
    if let Some(prefix) = ancestor {
        return Some(prefix.to_string());
    }
    let nested = format!("{key}.");
    keys.range(nested.clone()..)
        .next()
        .filter(|k| k.starts_with(&nested))
        .cloned()
}

fn csv_error(e: csv::Error) -> ExportError {
    ExportError::Serialization {
        message: e.to_string(),
    }
}
