//! Engine configuration tree.
//!
//! Every section has a `Default` so partial documents deserialize; call
//! [`EngineConfig::validate`] before handing a config to the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::config_error;
use crate::errors::VgResult;
use crate::sample::Domain;
use crate::score::{Polarity, Score};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Processor + aggregator tick period.
    pub update_interval_ms: u64,
    /// Alert evaluation tick period.
    pub alert_interval_ms: u64,
    /// Risk controller tick period.
    pub risk_interval_ms: u64,
    /// Capacity of the aggregated snapshot history.
    pub window_size: usize,
    /// Capacity of every raw series buffer in the telemetry store.
    pub store_capacity: usize,
    /// Relative half-window difference that breaks a `Stable` trend.
    pub trend_significance: f64,
    pub gateway: GatewayConfig,
    pub scoring: ScoringConfig,
    pub alerts: AlertConfig,
    pub risk: RiskLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1_000,
            alert_interval_ms: 1_000,
            risk_interval_ms: 5_000,
            window_size: 100,
            store_capacity: 100,
            trend_significance: 0.05,
            gateway: GatewayConfig::default(),
            scoring: ScoringConfig::default(),
            alerts: AlertConfig::default(),
            risk: RiskLimits::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> VgResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> VgResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_millis(self.alert_interval_ms)
    }

    pub fn risk_interval(&self) -> Duration {
        Duration::from_millis(self.risk_interval_ms)
    }

    pub fn validate(&self) -> VgResult<()> {
        for (name, value) in [
            ("update_interval_ms", self.update_interval_ms),
            ("alert_interval_ms", self.alert_interval_ms),
            ("risk_interval_ms", self.risk_interval_ms),
        ] {
            if value == 0 {
                return Err(config_error!("{name} must be positive"));
            }
        }
        if self.window_size == 0 {
            return Err(config_error!("window_size must be positive"));
        }
        if self.store_capacity == 0 {
            return Err(config_error!("store_capacity must be positive"));
        }
        if !(self.trend_significance > 0.0 && self.trend_significance < 1.0) {
            return Err(config_error!(
                "trend_significance must be in (0, 1), got {}",
                self.trend_significance
            ));
        }
        self.gateway.validate()?;
        for domain in Domain::ALL {
            self.scoring.for_domain(domain).validate(domain)?;
        }
        self.alerts.validate()?;
        self.risk.validate()
    }
}

/// Immutable channel set for one gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    channels: BTreeSet<Domain>,
}

impl SubscriptionConfig {
    pub fn new(channels: impl IntoIterator<Item = Domain>) -> Self {
        Self {
            channels: channels.into_iter().collect(),
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = Domain> + '_ {
        self.channels.iter().copied()
    }

    pub fn contains(&self, domain: Domain) -> bool {
        self.channels.contains(&domain)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|d| d.as_str().to_string()).collect()
    }
}

/// Stream ingestion gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub channels: Vec<Domain>,
    /// Base reconnect delay; attempt `n` waits `n * reconnect_interval_ms`.
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Upper bound on a single reconnect delay.
    pub max_reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/metrics".to_string(),
            channels: Domain::ALL.to_vec(),
            reconnect_interval_ms: 5_000,
            max_reconnect_attempts: 5,
            max_reconnect_delay_ms: 30_000,
            connect_timeout_ms: 10_000,
            send_timeout_ms: 5_000,
        }
    }
}

impl GatewayConfig {
    pub fn subscription(&self) -> SubscriptionConfig {
        SubscriptionConfig::new(self.channels.iter().copied())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    fn validate(&self) -> VgResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(config_error!("gateway.endpoint must not be empty"));
        }
        if self.channels.is_empty() {
            return Err(config_error!("gateway.channels must name at least one channel"));
        }
        if self.connect_timeout_ms == 0 || self.send_timeout_ms == 0 {
            return Err(config_error!("gateway timeouts must be positive"));
        }
        Ok(())
    }
}

/// Pure mapping from a raw value to a `[0, 1]` quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalizer {
    /// `1 - min(1, value / ceiling)`, e.g. latency, error rate.
    LowerIsBetter { ceiling: f64 },
    /// `min(1, value / target)`, e.g. liquidity, uptime.
    HigherIsBetter { target: f64 },
    /// Value is already a fraction in `[0, 1]`.
    Unit,
}

impl Normalizer {
    pub fn apply(&self, value: f64) -> Score {
        match *self {
            Normalizer::LowerIsBetter { ceiling } => {
                Score::new(1.0 - (value.max(0.0) / ceiling).min(1.0))
            }
            Normalizer::HigherIsBetter { target } => Score::new((value.max(0.0) / target).min(1.0)),
            Normalizer::Unit => Score::new(value),
        }
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Normalizer::LowerIsBetter { .. } => Polarity::LowerIsBetter,
            Normalizer::HigherIsBetter { .. } | Normalizer::Unit => Polarity::HigherIsBetter,
        }
    }

    fn bound(&self) -> Option<f64> {
        match *self {
            Normalizer::LowerIsBetter { ceiling } => Some(ceiling),
            Normalizer::HigherIsBetter { target } => Some(target),
            Normalizer::Unit => None,
        }
    }
}

/// A scored sub-metric: which series feeds it and how it is normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub series: String,
    pub normalizer: Normalizer,
    /// A required metric with no samples skips the whole tick.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl MetricSpec {
    pub fn required(series: impl Into<String>, normalizer: Normalizer) -> Self {
        Self {
            series: series.into(),
            normalizer,
            required: true,
        }
    }

    pub fn optional(series: impl Into<String>, normalizer: Normalizer) -> Self {
        Self {
            series: series.into(),
            normalizer,
            required: false,
        }
    }
}

/// Scoring definition for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScoring {
    /// Sub-metric name to spec.
    pub metrics: BTreeMap<String, MetricSpec>,
    /// Axis name to a weight map over sub-metric names.
    pub axes: BTreeMap<String, BTreeMap<String, f64>>,
}

impl DomainScoring {
    fn validate(&self, domain: Domain) -> VgResult<()> {
        if self.axes.is_empty() {
            return Err(config_error!("scoring.{domain} must define at least one axis"));
        }
        for (name, spec) in &self.metrics {
            if let Some(bound) = spec.normalizer.bound() {
                if !(bound.is_finite() && bound > 0.0) {
                    return Err(config_error!(
                        "scoring.{domain}.metrics.{name}: normalizer bound must be positive"
                    ));
                }
            }
        }
        for (axis, weights) in &self.axes {
            let mut sum = 0.0;
            for (metric, weight) in weights {
                if !self.metrics.contains_key(metric) {
                    return Err(config_error!(
                        "scoring.{domain}.axes.{axis} references unknown metric {metric}"
                    ));
                }
                if !(weight.is_finite() && *weight >= 0.0) {
                    return Err(config_error!(
                        "scoring.{domain}.axes.{axis}.{metric}: weight must be non-negative"
                    ));
                }
                sum += weight;
            }
            if sum <= 0.0 {
                return Err(config_error!(
                    "scoring.{domain}.axes.{axis}: weights must sum to a positive value"
                ));
            }
        }
        Ok(())
    }
}

/// Per-domain scoring definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub system: DomainScoring,
    pub market: DomainScoring,
    pub trading: DomainScoring,
}

impl ScoringConfig {
    pub fn for_domain(&self, domain: Domain) -> &DomainScoring {
        match domain {
            Domain::System => &self.system,
            Domain::Market => &self.market,
            Domain::Trading => &self.trading,
        }
    }
}

fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, w)| (k.to_string(), *w)).collect()
}

impl Default for ScoringConfig {
    fn default() -> Self {
        use Normalizer::*;

        let system = DomainScoring {
            metrics: BTreeMap::from([
                ("cpu".into(), MetricSpec::required("system.cpu_usage", LowerIsBetter { ceiling: 100.0 })),
                ("memory".into(), MetricSpec::required("system.memory_usage", LowerIsBetter { ceiling: 100.0 })),
                ("latency".into(), MetricSpec::required("system.latency", LowerIsBetter { ceiling: 1_000.0 })),
                ("error_rate".into(), MetricSpec::required("system.error_rate", LowerIsBetter { ceiling: 0.1 })),
                ("uptime".into(), MetricSpec::optional("system.uptime", Unit)),
            ]),
            axes: BTreeMap::from([
                ("health".into(), weights(&[("error_rate", 0.4), ("latency", 0.3), ("uptime", 0.3)])),
                ("performance".into(), weights(&[("latency", 0.6), ("cpu", 0.4)])),
                ("resources".into(), weights(&[("cpu", 0.5), ("memory", 0.5)])),
            ]),
        };

        let market = DomainScoring {
            metrics: BTreeMap::from([
                ("volatility".into(), MetricSpec::required("market.volatility", LowerIsBetter { ceiling: 0.1 })),
                ("spread".into(), MetricSpec::required("market.spread", LowerIsBetter { ceiling: 0.005 })),
                ("liquidity".into(), MetricSpec::required("market.liquidity", HigherIsBetter { target: 1_000_000.0 })),
                ("volume".into(), MetricSpec::optional("market.volume", HigherIsBetter { target: 1_000_000.0 })),
            ]),
            axes: BTreeMap::from([
                ("stability".into(), weights(&[("volatility", 0.6), ("spread", 0.4)])),
                ("liquidity".into(), weights(&[("liquidity", 0.6), ("volume", 0.4)])),
            ]),
        };

        let trading = DomainScoring {
            metrics: BTreeMap::from([
                ("win_rate".into(), MetricSpec::required("trading.win_rate", Unit)),
                ("sharpe".into(), MetricSpec::optional("trading.sharpe_ratio", HigherIsBetter { target: 2.0 })),
                ("drawdown".into(), MetricSpec::required("trading.drawdown", LowerIsBetter { ceiling: 0.2 })),
                ("exposure".into(), MetricSpec::required("trading.exposure", LowerIsBetter { ceiling: 1.0 })),
            ]),
            axes: BTreeMap::from([
                ("performance".into(), weights(&[("win_rate", 0.5), ("sharpe", 0.5)])),
                ("risk".into(), weights(&[("drawdown", 0.6), ("exposure", 0.4)])),
            ]),
        };

        Self {
            system,
            market,
            trading,
        }
    }
}

/// Where a threshold rule reads its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSource {
    /// Latest raw value of a series.
    Raw { series: String },
    /// One axis score of the rule's domain.
    Axis { axis: String },
    /// The rule's domain composite score.
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Breach when the value rises above the threshold.
    Above,
    /// Breach when the value falls below the threshold.
    Below,
}

/// A configured threshold on one metric of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub domain: Domain,
    pub metric: String,
    pub source: RuleSource,
    pub comparison: Comparison,
    pub threshold: f64,
    /// Overrides [`AlertConfig::critical_multiplier`] for this rule.
    #[serde(default)]
    pub critical_multiplier: Option<f64>,
    /// Informational rules always raise `info` alerts.
    #[serde(default)]
    pub informational: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl ThresholdRule {
    pub fn above(domain: Domain, metric: &str, series: &str, threshold: f64) -> Self {
        Self {
            domain,
            metric: metric.to_string(),
            source: RuleSource::Raw {
                series: series.to_string(),
            },
            comparison: Comparison::Above,
            threshold,
            critical_multiplier: None,
            informational: false,
            message: None,
        }
    }

    pub fn composite_below(domain: Domain, threshold: f64) -> Self {
        Self {
            domain,
            metric: "composite".to_string(),
            source: RuleSource::Composite,
            comparison: Comparison::Below,
            threshold,
            critical_multiplier: None,
            informational: false,
            message: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.critical_multiplier = Some(multiplier);
        self
    }

    pub fn informational(mut self) -> Self {
        self.informational = true;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Alert engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Breach multiple at which severity escalates to critical.
    pub critical_multiplier: f64,
    /// Size of the alert audit trail.
    pub history_limit: usize,
    /// Bounded wait for a single notification channel.
    pub notify_timeout_ms: u64,
    pub rules: Vec<ThresholdRule>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            critical_multiplier: 2.0,
            history_limit: 100,
            notify_timeout_ms: 2_000,
            rules: vec![
                ThresholdRule::above(Domain::System, "latency", "system.latency", 1_000.0)
                    .with_multiplier(1.2)
                    .with_message("High latency"),
                ThresholdRule::above(Domain::System, "cpu_usage", "system.cpu_usage", 80.0)
                    .with_multiplier(1.2)
                    .with_message("High CPU usage"),
                ThresholdRule::above(Domain::System, "error_rate", "system.error_rate", 0.05)
                    .with_message("Elevated error rate"),
                ThresholdRule::composite_below(Domain::System, 0.6)
                    .with_message("System health degraded"),
                ThresholdRule::above(Domain::Market, "volatility", "market.volatility", 0.05)
                    .with_message("High market volatility"),
                ThresholdRule::above(Domain::Market, "volume", "market.volume", 5_000_000.0)
                    .informational()
                    .with_message("Volume spike"),
                ThresholdRule::above(Domain::Trading, "drawdown", "trading.drawdown", 0.1)
                    .with_message("Drawdown above limit"),
                ThresholdRule::composite_below(Domain::Trading, 0.6)
                    .with_message("Trading performance degraded"),
            ],
        }
    }
}

impl AlertConfig {
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// Critical multiplier effective for `rule`.
    pub fn multiplier_for(&self, rule: &ThresholdRule) -> f64 {
        rule.critical_multiplier.unwrap_or(self.critical_multiplier)
    }

    fn validate(&self) -> VgResult<()> {
        if self.history_limit == 0 {
            return Err(config_error!("alerts.history_limit must be positive"));
        }
        if !(self.critical_multiplier.is_finite() && self.critical_multiplier >= 1.0) {
            return Err(config_error!("alerts.critical_multiplier must be >= 1"));
        }
        for rule in &self.rules {
            if !(rule.threshold.is_finite() && rule.threshold > 0.0) {
                return Err(config_error!(
                    "alerts rule {}.{}: threshold must be positive",
                    rule.domain,
                    rule.metric
                ));
            }
            if let Some(m) = rule.critical_multiplier {
                if !(m.is_finite() && m >= 1.0) {
                    return Err(config_error!(
                        "alerts rule {}.{}: critical_multiplier must be >= 1",
                        rule.domain,
                        rule.metric
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Externally supplied exposure and volatility limits for the risk controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum tolerated realized loss (currency units).
    pub max_loss: Decimal,
    /// Maximum gross exposure (currency units).
    pub max_exposure: Decimal,
    /// Volatility at which the volatility score reaches zero.
    pub max_volatility: f64,
    /// A single ratio above this escalates to at least `adjusting`,
    /// whatever the blended score.
    pub escalation_ratio: f64,
    /// Upper bound on one call into the execution client.
    pub dispatch_timeout_ms: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_loss: Decimal::from(10_000),
            max_exposure: Decimal::from(1_000_000),
            max_volatility: 0.1,
            escalation_ratio: 0.8,
            dispatch_timeout_ms: 5_000,
        }
    }
}

impl RiskLimits {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    fn validate(&self) -> VgResult<()> {
        if self.max_loss <= Decimal::ZERO || self.max_exposure <= Decimal::ZERO {
            return Err(config_error!("risk limits must be positive"));
        }
        if !(self.max_volatility.is_finite() && self.max_volatility > 0.0) {
            return Err(config_error!("risk.max_volatility must be positive"));
        }
        if !(self.escalation_ratio > 0.0 && self.escalation_ratio <= 1.0) {
            return Err(config_error!("risk.escalation_ratio must be in (0, 1]"));
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(config_error!("risk.dispatch_timeout_ms must be positive"));
        }
        Ok(())
    }
}
