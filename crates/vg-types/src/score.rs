//! Normalized scores, trends and the per-domain score block of a snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A quality score in `[0, 1]` where 1 is best.
///
/// Every constructor (including deserialization) clamps, so a `Score` held in
/// memory always satisfies the bound. NaN collapses to 0.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub const MIN: Score = Score(0.0);
    pub const MAX: Score = Score(1.0);

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Score(0.0);
        }
        Score(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl From<f64> for Score {
    fn from(value: f64) -> Self {
        Score::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.0
    }
}

/// Raw movement of a series between the older and recent half of its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increasing,
    Stable,
    Decreasing,
}

/// Whether a rising series is good or bad news.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

/// Quality trend of a metric, derived from its [`Direction`] and [`Polarity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

impl Trend {
    pub fn from_direction(direction: Direction, polarity: Polarity) -> Self {
        match (direction, polarity) {
            (Direction::Stable, _) => Trend::Stable,
            (Direction::Increasing, Polarity::HigherIsBetter)
            | (Direction::Decreasing, Polarity::LowerIsBetter) => Trend::Improving,
            (Direction::Increasing, Polarity::LowerIsBetter)
            | (Direction::Decreasing, Polarity::HigherIsBetter) => Trend::Degrading,
        }
    }
}

/// Categorical health derived from a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub const HEALTHY_ABOVE: f64 = 0.8;
    pub const DEGRADED_ABOVE: f64 = 0.6;

    /// Two-threshold rule shared by every domain: `> 0.8` healthy,
    /// `> 0.6` degraded, otherwise critical.
    pub fn from_score(score: Score) -> Self {
        let v = score.value();
        if v > Self::HEALTHY_ABOVE {
            HealthStatus::Healthy
        } else if v > Self::DEGRADED_ABOVE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        }
    }
}

/// Scores and trends for one domain within an aggregated snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub composite: Score,
    pub status: HealthStatus,
    /// One score per configured axis (health, performance, resources, ...).
    pub axes: BTreeMap<String, Score>,
    /// Normalized sub-metric values feeding the axes.
    pub metrics: BTreeMap<String, Score>,
    pub trends: BTreeMap<String, Trend>,
}

impl ScoreSet {
    pub fn axis(&self, name: &str) -> Option<Score> {
        self.axes.get(name).copied()
    }

    pub fn metric(&self, name: &str) -> Option<Score> {
        self.metrics.get(name).copied()
    }
}
