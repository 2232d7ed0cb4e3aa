//! Score processor: turns store windows into normalized scores and trends.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use vg_store::TelemetryStore;
use vg_types::{
    Direction, Domain, DomainScoring, ProcessingError, Score, ScoringConfig, Trend,
};

/// Below this magnitude the older half mean is treated as zero and the
/// absolute difference is used instead of the relative one.
const ZERO_BASELINE: f64 = 1e-12;

/// Scores for one domain before health classification.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainScores {
    pub composite: Score,
    pub axes: BTreeMap<String, Score>,
    pub metrics: BTreeMap<String, Score>,
    pub trends: BTreeMap<String, Trend>,
}

/// One processor tick worth of output.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOutput {
    pub timestamp: DateTime<Utc>,
    pub system: DomainScores,
    pub market: DomainScores,
    pub trading: DomainScores,
    pub raw: BTreeMap<String, f64>,
}

/// Direction of a window by the half-window rule.
///
/// The older and recent halves are compared by mean; an odd middle sample
/// belongs to neither. A relative change within `significance` is stable
/// whatever the magnitude of the values.
pub fn direction(values: &[f64], significance: f64) -> Direction {
    if values.len() < 2 {
        return Direction::Stable;
    }
    let half = values.len() / 2;
    let older = mean(&values[..half]);
    let recent = mean(&values[values.len() - half..]);

    let diff = recent - older;
    let change = if older.abs() < ZERO_BASELINE {
        diff
    } else {
        diff / older.abs()
    };

    if change > significance {
        Direction::Increasing
    } else if change < -significance {
        Direction::Decreasing
    } else {
        Direction::Stable
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Weighted average over the metrics that are present, weights renormalized
/// by their sum. `None` when no present metric carries weight.
pub fn weighted_score(
    weights: &BTreeMap<String, f64>,
    metrics: &BTreeMap<String, Score>,
) -> Option<Score> {
    let (total, weight_sum) = weights
        .iter()
        .filter_map(|(name, weight)| metrics.get(name).map(|score| (score.value(), *weight)))
        .fold((0.0, 0.0), |(total, sum), (value, weight)| {
            (total + value * weight, sum + weight)
        });
    (weight_sum > 0.0).then(|| Score::new(total / weight_sum))
}

pub struct ScoreProcessor {
    scoring: ScoringConfig,
    trend_significance: f64,
    store: Arc<TelemetryStore>,
}

impl ScoreProcessor {
    pub fn new(scoring: ScoringConfig, trend_significance: f64, store: Arc<TelemetryStore>) -> Self {
        Self {
            scoring,
            trend_significance,
            store,
        }
    }

    /// Compute every domain from the current store contents.
    ///
    /// Fails without output when a required series has no samples, so a
    /// cold store never produces zero scores.
    pub fn compute(&self, now: DateTime<Utc>) -> Result<ProcessorOutput, ProcessingError> {
        let mut raw = BTreeMap::new();
        let system = self.score_domain(Domain::System, &mut raw)?;
        let market = self.score_domain(Domain::Market, &mut raw)?;
        let trading = self.score_domain(Domain::Trading, &mut raw)?;

        debug!(
            system = system.composite.value(),
            market = market.composite.value(),
            trading = trading.composite.value(),
            "scores computed"
        );
        Ok(ProcessorOutput {
            timestamp: now,
            system,
            market,
            trading,
            raw,
        })
    }

    fn score_domain(
        &self,
        domain: Domain,
        raw: &mut BTreeMap<String, f64>,
    ) -> Result<DomainScores, ProcessingError> {
        let scoring: &DomainScoring = self.scoring.for_domain(domain);
        let mut metrics = BTreeMap::new();
        let mut trends = BTreeMap::new();

        for (name, spec) in &scoring.metrics {
            // newest by arrival, matching what the store reports as latest;
            // the window itself is ordered by sample timestamp for trends
            let Some(latest) = self.store.latest(&spec.series) else {
                if spec.required {
                    return Err(ProcessingError::MissingSeries {
                        domain: domain.to_string(),
                        series: spec.series.clone(),
                    });
                }
                continue;
            };
            let values = self.store.values(&spec.series);
            raw.insert(spec.series.clone(), latest);
            metrics.insert(name.clone(), spec.normalizer.apply(latest));
            trends.insert(
                name.clone(),
                Trend::from_direction(
                    direction(&values, self.trend_significance),
                    spec.normalizer.polarity(),
                ),
            );
        }

        let mut axes = BTreeMap::new();
        for (axis, weights) in &scoring.axes {
            let score = weighted_score(weights, &metrics).ok_or_else(|| {
                ProcessingError::NoWeights {
                    domain: domain.to_string(),
                    axis: axis.clone(),
                }
            })?;
            axes.insert(axis.clone(), score);
        }

        let composite = if axes.is_empty() {
            Score::MIN
        } else {
            Score::new(axes.values().map(Score::value).sum::<f64>() / axes.len() as f64)
        };

        Ok(DomainScores {
            composite,
            axes,
            metrics,
            trends,
        })
    }
}
