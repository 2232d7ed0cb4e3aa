use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use vg_types::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

/// A finished export, ready to hand to a download or write to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ExportArtifact {
    /// `<prefix>_<ISO 8601 basic timestamp>.<ext>`, e.g.
    /// `metrics_export_20240301T120000Z.json`.
    pub fn new(prefix: &str, format: ExportFormat, at: DateTime<Utc>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: format!(
                "{prefix}_{}.{}",
                at.format("%Y%m%dT%H%M%SZ"),
                format.extension()
            ),
            content_type: format.content_type(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write into `dir` under [`ExportArtifact::file_name`].
    ///
    /// Content goes to a temporary sibling first and is renamed into place,
    /// so readers never observe a partial file.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ExportError> {
        let dir = dir.as_ref();
        let target = dir.join(&self.file_name);

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
        tmp.write_all(&self.bytes).map_err(io_error)?;
        tmp.as_file().sync_all().map_err(io_error)?;
        tmp.persist(&target).map_err(|e| io_error(e.error))?;

        info!(path = %target.display(), bytes = self.bytes.len(), "export written");
        Ok(target)
    }
}

fn io_error(e: std::io::Error) -> ExportError {
    ExportError::Io {
        message: e.to_string(),
    }
}
