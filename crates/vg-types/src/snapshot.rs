use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::sample::Domain;
use crate::score::ScoreSet;

/// One recomputation tick worth of processed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSnapshot {
    /// Monotonic per-aggregator version, starting at 1.
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub system: ScoreSet,
    pub market: ScoreSet,
    pub trading: ScoreSet,
    /// Latest raw value of every configured series at compute time.
    pub raw: BTreeMap<String, f64>,
}

impl AggregatedSnapshot {
    pub fn domain(&self, domain: Domain) -> &ScoreSet {
        match domain {
            Domain::System => &self.system,
            Domain::Market => &self.market,
            Domain::Trading => &self.trading,
        }
    }

    pub fn raw_value(&self, series: &str) -> Option<f64> {
        self.raw.get(series).copied()
    }
}

/// Declarative selection of snapshot fields, shared by aggregator views and
/// the exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub domains: BTreeSet<Domain>,
    pub include_raw: bool,
    pub include_trends: bool,
}

impl Default for FieldSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FieldSelection {
    /// Every field; exports made with this selection parse back into
    /// [`AggregatedSnapshot`].
    pub fn all() -> Self {
        Self {
            domains: Domain::ALL.into_iter().collect(),
            include_raw: true,
            include_trends: true,
        }
    }

    pub fn domains(domains: impl IntoIterator<Item = Domain>) -> Self {
        Self {
            domains: domains.into_iter().collect(),
            include_raw: false,
            include_trends: true,
        }
    }

    pub fn with_raw(mut self, include: bool) -> Self {
        self.include_raw = include;
        self
    }

    pub fn with_trends(mut self, include: bool) -> Self {
        self.include_trends = include;
        self
    }

    pub fn includes(&self, domain: Domain) -> bool {
        self.domains.contains(&domain)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && !self.include_raw
    }

    pub fn is_full(&self) -> bool {
        self.domains.len() == Domain::ALL.len() && self.include_raw && self.include_trends
    }

    /// Project a snapshot through this selection.
    pub fn view<'a>(&self, snapshot: &'a AggregatedSnapshot) -> SnapshotView<'a> {
        let pick = |domain: Domain| {
            self.includes(domain).then(|| ScoreSetView {
                inner: snapshot.domain(domain),
                include_trends: self.include_trends,
            })
        };
        SnapshotView {
            version: snapshot.version,
            timestamp: snapshot.timestamp,
            system: pick(Domain::System),
            market: pick(Domain::Market),
            trading: pick(Domain::Trading),
            raw: self.include_raw.then_some(&snapshot.raw),
        }
    }
}

/// Borrowed projection of an [`AggregatedSnapshot`].
///
/// Field order matches the snapshot so that a full view serializes to exactly
/// the same bytes as the snapshot itself.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView<'a> {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<ScoreSetView<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<ScoreSetView<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading: Option<ScoreSetView<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<&'a BTreeMap<String, f64>>,
}

#[derive(Debug, Clone)]
pub struct ScoreSetView<'a> {
    inner: &'a ScoreSet,
    include_trends: bool,
}

impl Serialize for ScoreSetView<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let fields = if self.include_trends { 5 } else { 4 };
        let mut state = serializer.serialize_struct("ScoreSet", fields)?;
        state.serialize_field("composite", &self.inner.composite)?;
        state.serialize_field("status", &self.inner.status)?;
        state.serialize_field("axes", &self.inner.axes)?;
        state.serialize_field("metrics", &self.inner.metrics)?;
        if self.include_trends {
            state.serialize_field("trends", &self.inner.trends)?;
        }
        state.end()
    }
}
