//! Threshold rule evaluation.

use std::collections::BTreeMap;

use vg_types::{AggregatedSnapshot, Comparison, RuleSource, Severity, ThresholdRule};

/// Result of checking one rule against one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// The snapshot carries no value for the rule's source.
    Absent,
    /// Value is within the threshold.
    Clear { value: f64 },
    Breach { value: f64, severity: Severity },
}

/// Value a rule reads from the snapshot.
pub fn rule_value(rule: &ThresholdRule, snapshot: &AggregatedSnapshot) -> Option<f64> {
    match &rule.source {
        RuleSource::Raw { series } => snapshot.raw_value(series),
        RuleSource::Axis { axis } => snapshot.domain(rule.domain).axis(axis).map(|s| s.value()),
        RuleSource::Composite => Some(snapshot.domain(rule.domain).composite.value()),
    }
}

/// Severity for `value`, or `None` when the rule is not breached.
///
/// `above` breaches strictly past the threshold and escalates at
/// `threshold * multiplier` inclusive; `below` mirrors that with
/// `threshold / multiplier`.
pub fn classify(rule: &ThresholdRule, value: f64, multiplier: f64) -> Option<Severity> {
    let (breached, critical) = match rule.comparison {
        Comparison::Above => (value > rule.threshold, value >= rule.threshold * multiplier),
        Comparison::Below => (value < rule.threshold, value <= rule.threshold / multiplier),
    };
    if !breached {
        return None;
    }
    Some(if rule.informational {
        Severity::Info
    } else if critical {
        Severity::Critical
    } else {
        Severity::Warning
    })
}

pub fn evaluate_rule(
    rule: &ThresholdRule,
    snapshot: &AggregatedSnapshot,
    multiplier: f64,
) -> RuleOutcome {
    match rule_value(rule, snapshot) {
        None => RuleOutcome::Absent,
        Some(value) => match classify(rule, value, multiplier) {
            Some(severity) => RuleOutcome::Breach { value, severity },
            None => RuleOutcome::Clear { value },
        },
    }
}

/// Human-readable alert message for a breach.
pub fn describe(rule: &ThresholdRule, value: f64) -> String {
    let subject = rule
        .message
        .clone()
        .unwrap_or_else(|| format!("{} {}", rule.domain, rule.metric));
    let relation = match rule.comparison {
        Comparison::Above => "above",
        Comparison::Below => "below",
    };
    format!("{subject}: {value} {relation} threshold {}", rule.threshold)
}

/// Metric values attached to a rule alert.
pub fn alert_metrics(rule: &ThresholdRule, value: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([
        (rule.metric.clone(), value),
        ("threshold".to_string(), rule.threshold),
    ])
}
