use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ParseError;

/// Telemetry domain. Doubles as the feed channel name and the alert type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    System,
    Market,
    Trading,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::System, Domain::Market, Domain::Trading];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::System => "system",
            Domain::Market => "market",
            Domain::Trading => "trading",
        }
    }

    /// Series name for a field of this domain, e.g. `system.latency`.
    pub fn series(&self, field: &str) -> String {
        format!("{}.{}", self.as_str(), field)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Domain::System),
            "market" => Ok(Domain::Market),
            "trading" => Ok(Domain::Trading),
            other => Err(ParseError::UnknownDomain {
                domain: other.to_string(),
            }),
        }
    }
}

/// A single raw observation for one metric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub series: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(series: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            series: series.into(),
            value,
            timestamp,
        }
    }

    /// Create a sample stamped with the current time.
    pub fn now(series: impl Into<String>, value: f64) -> Self {
        Self::new(series, value, Utc::now())
    }
}
