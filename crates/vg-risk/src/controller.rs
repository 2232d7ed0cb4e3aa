//! Risk scoring, control state and control actions.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vg_types::{AggregatedSnapshot, ControlActionError, RiskLimits};

use crate::execution::{ExecutionClient, ExecutionDirection, ExecutionRequest, Urgency};

/// Raw series consulted when no volatility is supplied with the exposure.
pub const VOLATILITY_SERIES: &str = "market.volatility";

const MONITORING_CEILING: f64 = 0.6;
const ADJUSTING_CEILING: f64 = 0.8;
const HEDGE_TRIGGER: f64 = 0.5;
/// Rounding slack on band edges; a mean of three ratios at 0.8 lands a few
/// ulps above 0.8.
const BAND_TOLERANCE: f64 = 1e-9;
const WEAK_TRADING_SCORE: f64 = 0.3;

/// Externally supplied book state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureState {
    /// Realized loss as a positive amount; gains count as zero.
    pub realized_loss: Decimal,
    pub gross_exposure: Decimal,
    /// Overrides the snapshot's `market.volatility` when present.
    pub volatility: Option<f64>,
}

impl Default for ExposureState {
    fn default() -> Self {
        Self {
            realized_loss: Decimal::ZERO,
            gross_exposure: Decimal::ZERO,
            volatility: None,
        }
    }
}

/// The three limit ratios, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskRatios {
    pub loss_ratio: f64,
    pub exposure_ratio: f64,
    pub inverse_vol_ratio: f64,
}

impl RiskRatios {
    pub fn new(loss_ratio: f64, exposure_ratio: f64, inverse_vol_ratio: f64) -> Self {
        Self {
            loss_ratio: clamp_unit(loss_ratio),
            exposure_ratio: clamp_unit(exposure_ratio),
            inverse_vol_ratio: clamp_unit(inverse_vol_ratio),
        }
    }

    pub fn compute(limits: &RiskLimits, exposure: &ExposureState, volatility: f64) -> Self {
        let volatility_score = if limits.max_volatility > 0.0 {
            1.0 - (volatility.max(0.0) / limits.max_volatility).min(1.0)
        } else {
            0.0
        };
        Self::new(
            decimal_ratio(exposure.realized_loss, limits.max_loss),
            decimal_ratio(exposure.gross_exposure, limits.max_exposure),
            1.0 - volatility_score,
        )
    }

    /// Equal-weight mean of the three ratios.
    pub fn risk_score(&self) -> f64 {
        (self.loss_ratio + self.exposure_ratio + self.inverse_vol_ratio) / 3.0
    }

    pub fn max(&self) -> f64 {
        self.loss_ratio
            .max(self.exposure_ratio)
            .max(self.inverse_vol_ratio)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn decimal_ratio(amount: Decimal, limit: Decimal) -> f64 {
    if amount <= Decimal::ZERO {
        return 0.0;
    }
    if limit <= Decimal::ZERO {
        return 1.0;
    }
    amount
        .checked_div(limit)
        .and_then(|ratio| ratio.to_f64())
        .unwrap_or(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Monitoring,
    Adjusting,
    Emergency,
}

impl ControlState {
    /// Bands: `<= 0.6` monitoring, `<= 0.8` adjusting, above that emergency.
    pub fn from_score(risk_score: f64) -> Self {
        if risk_score > ADJUSTING_CEILING + BAND_TOLERANCE {
            ControlState::Emergency
        } else if risk_score > MONITORING_CEILING + BAND_TOLERANCE {
            ControlState::Adjusting
        } else {
            ControlState::Monitoring
        }
    }

    /// Score band, raised to at least `adjusting` when any ratio exceeds
    /// `escalation_ratio` and to `emergency` when any limit is fully used.
    pub fn classify(ratios: &RiskRatios, escalation_ratio: f64) -> Self {
        let banded = Self::from_score(ratios.risk_score());
        let worst = ratios.max();
        if worst >= 1.0 {
            ControlState::Emergency
        } else if worst > escalation_ratio {
            banded.max(ControlState::Adjusting)
        } else {
            banded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Monitoring => "monitoring",
            ControlState::Adjusting => "adjusting",
            ControlState::Emergency => "emergency",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ReduceExposure,
    IncreaseHedge,
    ClosePositions,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ReduceExposure => "reduce_exposure",
            ActionKind::IncreaseHedge => "increase_hedge",
            ActionKind::ClosePositions => "close_positions",
        }
    }

    pub fn direction(&self) -> ExecutionDirection {
        match self {
            ActionKind::ReduceExposure => ExecutionDirection::Decrease,
            ActionKind::IncreaseHedge => ExecutionDirection::Hedge,
            ActionKind::ClosePositions => ExecutionDirection::Close,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Immediate,
}

impl Priority {
    pub fn urgency(&self) -> Urgency {
        match self {
            Priority::Immediate | Priority::High => Urgency::High,
            Priority::Medium | Priority::Low => Urgency::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub priority: Priority,
    /// Target fraction of the exposure limit, in `[0, 1]`.
    pub target_allocation: f64,
    pub rationale: String,
}

impl ControlAction {
    fn new(kind: ActionKind, priority: Priority, target_allocation: f64, rationale: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            target_allocation,
            rationale,
        }
    }

    pub fn request(&self) -> ExecutionRequest {
        ExecutionRequest {
            direction: self.kind.direction(),
            urgency: self.priority.urgency(),
            target_allocation: self.target_allocation,
            rationale: self.rationale.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub timestamp: DateTime<Utc>,
    pub ratios: RiskRatios,
    pub risk_score: f64,
    pub state: ControlState,
    /// Trading composite of the snapshot the assessment was made from.
    pub trading_score: f64,
    /// Highest priority first.
    pub actions: Vec<ControlAction>,
    /// Ids of actions handed to the execution client. An immediate action
    /// whose kind was already auto-dispatched earlier in the same emergency
    /// counts as handed over.
    pub dispatched: Vec<Uuid>,
}

impl RiskAssessment {
    pub fn action(&self, id: Uuid) -> Option<&ControlAction> {
        self.actions.iter().find(|a| a.id == id)
    }
}

/// Turns snapshots and exposure into control actions.
///
/// Only `immediate` actions in `emergency` are dispatched on their own, once
/// per action kind for as long as the emergency lasts; everything else waits
/// for [`RiskController::execute`]. A failed dispatch never changes the
/// stored assessment and is retried on the next emergency evaluation.
pub struct RiskController {
    limits: RiskLimits,
    executor: Option<Arc<dyn ExecutionClient>>,
    exposure: RwLock<ExposureState>,
    latest: RwLock<Option<RiskAssessment>>,
    /// Kinds auto-dispatched since the current emergency began.
    handed_over: Mutex<HashSet<ActionKind>>,
}

impl RiskController {
    pub fn new(limits: RiskLimits, executor: Option<Arc<dyn ExecutionClient>>) -> Self {
        Self {
            limits,
            executor,
            exposure: RwLock::new(ExposureState::default()),
            latest: RwLock::new(None),
            handed_over: Mutex::new(HashSet::new()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn update_exposure(&self, exposure: ExposureState) {
        debug!(
            loss = %exposure.realized_loss,
            exposure = %exposure.gross_exposure,
            "exposure updated"
        );
        *self.exposure.write() = exposure;
    }

    pub fn exposure(&self) -> ExposureState {
        self.exposure.read().clone()
    }

    pub fn latest(&self) -> Option<RiskAssessment> {
        self.latest.read().clone()
    }

    pub fn ratios(&self, snapshot: &AggregatedSnapshot) -> RiskRatios {
        let exposure = self.exposure.read();
        let volatility = exposure
            .volatility
            .or_else(|| snapshot.raw_value(VOLATILITY_SERIES))
            .unwrap_or(0.0);
        RiskRatios::compute(&self.limits, &exposure, volatility)
    }

    /// Pure assessment of `snapshot`; nothing is stored or dispatched.
    pub fn assess(&self, snapshot: &AggregatedSnapshot, now: DateTime<Utc>) -> RiskAssessment {
        let ratios = self.ratios(snapshot);
        let risk_score = ratios.risk_score();
        let state = ControlState::classify(&ratios, self.limits.escalation_ratio);
        let trading_score = snapshot.trading.composite.value();
        let actions = plan_actions(&ratios, risk_score, state, trading_score);

        RiskAssessment {
            timestamp: now,
            ratios,
            risk_score,
            state,
            trading_score,
            actions,
            dispatched: Vec::new(),
        }
    }

    /// Assess, auto-dispatch `immediate` actions when in `emergency`, and
    /// store the result as the latest assessment.
    pub async fn evaluate(&self, snapshot: &AggregatedSnapshot, now: DateTime<Utc>) -> RiskAssessment {
        let mut assessment = self.assess(snapshot, now);

        let previous = self.latest.read().as_ref().map(|a| a.state);
        if previous != Some(assessment.state) {
            info!(
                state = %assessment.state,
                risk_score = assessment.risk_score,
                actions = assessment.actions.len(),
                "risk state changed"
            );
        }

        if assessment.state == ControlState::Emergency {
            let immediate: Vec<ControlAction> = assessment
                .actions
                .iter()
                .filter(|a| a.priority == Priority::Immediate)
                .cloned()
                .collect();
            let handed_over = self.handed_over.lock().clone();
            for action in immediate {
                if handed_over.contains(&action.kind) {
                    assessment.dispatched.push(action.id);
                    continue;
                }
                match self.dispatch(&action).await {
                    Ok(()) => {
                        self.handed_over.lock().insert(action.kind);
                        assessment.dispatched.push(action.id);
                    }
                    Err(e) => warn!(action = %action.kind, error = %e, "auto-dispatch failed"),
                }
            }
        } else {
            self.handed_over.lock().clear();
        }

        *self.latest.write() = Some(assessment.clone());
        assessment
    }

    /// Dispatch one action of the latest assessment.
    pub async fn execute(&self, action_id: Uuid) -> Result<(), ControlActionError> {
        let action = self
            .latest
            .read()
            .as_ref()
            .and_then(|a| a.action(action_id).cloned())
            .ok_or_else(|| ControlActionError::UnknownAction {
                action_id: action_id.to_string(),
            })?;

        if let Err(e) = self.dispatch(&action).await {
            warn!(action = %action.kind, error = %e, "dispatch failed");
            return Err(e);
        }

        if let Some(latest) = self.latest.write().as_mut() {
            if latest.action(action_id).is_some() && !latest.dispatched.contains(&action_id) {
                latest.dispatched.push(action_id);
            }
        }
        Ok(())
    }

    async fn dispatch(&self, action: &ControlAction) -> Result<(), ControlActionError> {
        let executor = self.executor.as_ref().ok_or(ControlActionError::NoExecutor)?;
        let timeout = self.limits.dispatch_timeout();
        tokio::time::timeout(timeout, executor.execute(action.request()))
            .await
            .map_err(|_| ControlActionError::DispatchTimeout {
                action: action.kind.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| ControlActionError::DispatchFailed {
                action: action.kind.to_string(),
                message: e.to_string(),
            })?;
        info!(
            action = %action.kind,
            priority = ?action.priority,
            target = action.target_allocation,
            "control action dispatched"
        );
        Ok(())
    }
}

fn plan_actions(
    ratios: &RiskRatios,
    risk_score: f64,
    state: ControlState,
    trading_score: f64,
) -> Vec<ControlAction> {
    let target = clamp_unit(1.0 - risk_score);
    let mut actions = Vec::new();

    if state != ControlState::Monitoring || ratios.exposure_ratio > ADJUSTING_CEILING {
        let priority = if state == ControlState::Emergency {
            Priority::Immediate
        } else if ratios.exposure_ratio > ADJUSTING_CEILING {
            Priority::High
        } else {
            Priority::Medium
        };
        actions.push(ControlAction::new(
            ActionKind::ReduceExposure,
            priority,
            target,
            format!(
                "risk score {risk_score:.2} ({state}); exposure at {:.0}% of limit, loss at {:.0}% of limit",
                ratios.exposure_ratio * 100.0,
                ratios.loss_ratio * 100.0
            ),
        ));
    }

    if ratios.inverse_vol_ratio > HEDGE_TRIGGER {
        let priority = match state {
            ControlState::Emergency => Priority::High,
            ControlState::Adjusting => Priority::Medium,
            ControlState::Monitoring => Priority::Low,
        };
        actions.push(ControlAction::new(
            ActionKind::IncreaseHedge,
            priority,
            target,
            format!(
                "volatility at {:.0}% of limit",
                ratios.inverse_vol_ratio * 100.0
            ),
        ));
    }

    if ratios.loss_ratio >= 1.0 {
        actions.push(ControlAction::new(
            ActionKind::ClosePositions,
            Priority::Immediate,
            0.0,
            "realized loss limit reached".to_string(),
        ));
    } else if state == ControlState::Emergency && trading_score < WEAK_TRADING_SCORE {
        actions.push(ControlAction::new(
            ActionKind::ClosePositions,
            Priority::High,
            0.0,
            format!("emergency with trading score {trading_score:.2}"),
        ));
    }

    actions.sort_by(|a, b| b.priority.cmp(&a.priority));
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionError, PaperExecutionClient};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use vg_types::{HealthStatus, Score, ScoreSet};

    fn score_set(composite: f64) -> ScoreSet {
        let score = Score::new(composite);
        ScoreSet {
            composite: score,
            status: HealthStatus::from_score(score),
            axes: BTreeMap::new(),
            metrics: BTreeMap::new(),
            trends: BTreeMap::new(),
        }
    }

    fn snapshot(trading: f64, volatility: Option<f64>) -> AggregatedSnapshot {
        AggregatedSnapshot {
            version: 1,
            timestamp: Utc::now(),
            system: score_set(0.9),
            market: score_set(0.8),
            trading: score_set(trading),
            raw: volatility
                .map(|v| BTreeMap::from([(VOLATILITY_SERIES.to_string(), v)]))
                .unwrap_or_default(),
        }
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            max_loss: dec!(10000),
            max_exposure: dec!(1000000),
            max_volatility: 0.1,
            escalation_ratio: 0.8,
            dispatch_timeout_ms: 1_000,
        }
    }

    fn exposure(loss: Decimal, gross: Decimal, volatility: Option<f64>) -> ExposureState {
        ExposureState {
            realized_loss: loss,
            gross_exposure: gross,
            volatility,
        }
    }

    fn emergency_controller(executor: Option<Arc<dyn ExecutionClient>>) -> RiskController {
        let controller = RiskController::new(limits(), executor);
        controller.update_exposure(exposure(dec!(12000), dec!(900000), Some(0.09)));
        controller
    }

    #[test]
    fn state_bands_have_inclusive_upper_bounds() {
        assert_eq!(ControlState::from_score(0.0), ControlState::Monitoring);
        assert_eq!(ControlState::from_score(0.6), ControlState::Monitoring);
        assert_eq!(ControlState::from_score(0.600_001), ControlState::Adjusting);
        assert_eq!(ControlState::from_score(0.8), ControlState::Adjusting);
        assert_eq!(ControlState::from_score(0.800_001), ControlState::Emergency);
        assert_eq!(ControlState::from_score(1.0), ControlState::Emergency);
    }

    #[test]
    fn ratios_are_clamped() {
        let ratios = RiskRatios::new(1.7, -0.2, f64::NAN);
        assert_eq!(ratios, RiskRatios::new(1.0, 0.0, 0.0));

        let computed = RiskRatios::compute(&limits(), &exposure(dec!(-50), dec!(2000000), None), 0.5);
        assert_eq!(computed.loss_ratio, 0.0);
        assert_eq!(computed.exposure_ratio, 1.0);
        assert_eq!(computed.inverse_vol_ratio, 1.0);
    }

    #[test]
    fn one_hot_ratio_escalates_to_adjusting() {
        let controller = RiskController::new(limits(), None);
        controller.update_exposure(exposure(dec!(9000), dec!(500000), Some(0.03)));
        let assessment = controller.assess(&snapshot(0.7, None), Utc::now());

        assert!((assessment.ratios.loss_ratio - 0.9).abs() < 1e-9);
        assert!((assessment.ratios.exposure_ratio - 0.5).abs() < 1e-9);
        assert!((assessment.ratios.inverse_vol_ratio - 0.3).abs() < 1e-9);
        assert!((assessment.risk_score - 0.5667).abs() < 1e-3);
        assert_eq!(assessment.state, ControlState::Adjusting);

        let kinds: Vec<_> = assessment.actions.iter().map(|a| (a.kind, a.priority)).collect();
        assert_eq!(kinds, vec![(ActionKind::ReduceExposure, Priority::Medium)]);
        assert!(assessment.actions[0].rationale.contains("exposure at 50%"));
    }

    #[test]
    fn classification_at_band_edges() {
        let edge = |score: f64| ControlState::classify(&RiskRatios::new(score, score, score), 0.8);
        assert_eq!(edge(0.5), ControlState::Monitoring);
        assert_eq!(edge(0.6), ControlState::Monitoring);
        assert_eq!(edge(0.7), ControlState::Adjusting);
        assert_eq!(edge(0.8), ControlState::Adjusting);
        assert_eq!(edge(0.800_000_1), ControlState::Emergency);
        assert_eq!(edge(0.9), ControlState::Emergency);

        let maxed = RiskRatios::new(1.0, 0.0, 0.0);
        assert_eq!(ControlState::classify(&maxed, 0.8), ControlState::Emergency);
    }

    #[test]
    fn volatility_falls_back_to_snapshot() {
        let controller = RiskController::new(limits(), None);
        let ratios = controller.ratios(&snapshot(0.7, Some(0.05)));
        assert!((ratios.inverse_vol_ratio - 0.5).abs() < 1e-9);

        controller.update_exposure(exposure(dec!(0), dec!(0), Some(0.1)));
        let ratios = controller.ratios(&snapshot(0.7, Some(0.05)));
        assert_eq!(ratios.inverse_vol_ratio, 1.0);

        let quiet = RiskController::new(limits(), None);
        assert_eq!(quiet.ratios(&snapshot(0.7, None)).inverse_vol_ratio, 0.0);
    }

    #[test]
    fn calm_book_plans_nothing() {
        let controller = RiskController::new(limits(), None);
        controller.update_exposure(exposure(dec!(100), dec!(10000), Some(0.01)));
        let assessment = controller.assess(&snapshot(0.9, None), Utc::now());
        assert_eq!(assessment.state, ControlState::Monitoring);
        assert!(assessment.actions.is_empty());
    }

    #[tokio::test]
    async fn emergency_auto_dispatches_immediate_actions() {
        let paper = Arc::new(PaperExecutionClient::new());
        let controller = emergency_controller(Some(paper.clone()));

        let assessment = controller.evaluate(&snapshot(0.6, None), Utc::now()).await;
        assert_eq!(assessment.state, ControlState::Emergency);

        let priorities: Vec<_> = assessment.actions.iter().map(|a| a.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::Immediate, Priority::Immediate, Priority::High]
        );
        assert_eq!(assessment.dispatched.len(), 2);

        let requests = paper.requests();
        let directions: Vec<_> = requests.iter().map(|r| r.direction).collect();
        assert_eq!(
            directions,
            vec![ExecutionDirection::Decrease, ExecutionDirection::Close]
        );
        assert!(requests.iter().all(|r| r.urgency == Urgency::High));
        assert_eq!(controller.latest(), Some(assessment));
    }

    #[tokio::test]
    async fn sustained_emergency_dispatches_once() {
        let paper = Arc::new(PaperExecutionClient::new());
        let controller = emergency_controller(Some(paper.clone()));

        let mut assessments = Vec::new();
        for _ in 0..3 {
            assessments.push(controller.evaluate(&snapshot(0.6, None), Utc::now()).await);
        }
        assert!(assessments.iter().all(|a| a.state == ControlState::Emergency));
        assert!(assessments.iter().all(|a| a.dispatched.len() == 2));
        assert_eq!(paper.requests().len(), 2);

        // leaving the emergency re-arms auto-dispatch
        controller.update_exposure(exposure(dec!(100), dec!(10000), Some(0.01)));
        let calm = controller.evaluate(&snapshot(0.9, None), Utc::now()).await;
        assert_eq!(calm.state, ControlState::Monitoring);

        controller.update_exposure(exposure(dec!(12000), dec!(900000), Some(0.09)));
        controller.evaluate(&snapshot(0.6, None), Utc::now()).await;
        assert_eq!(paper.requests().len(), 4);
    }

    struct StuckClient;

    #[async_trait::async_trait]
    impl ExecutionClient for StuckClient {
        async fn execute(&self, _request: ExecutionRequest) -> Result<(), ExecutionError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_executor_is_bounded_by_dispatch_timeout() {
        let controller = emergency_controller(Some(Arc::new(StuckClient)));

        let assessment = controller.evaluate(&snapshot(0.6, None), Utc::now()).await;
        assert_eq!(assessment.state, ControlState::Emergency);
        assert!(assessment.dispatched.is_empty());
        assert_eq!(controller.latest(), Some(assessment.clone()));

        let hedge = assessment
            .actions
            .iter()
            .find(|a| a.kind == ActionKind::IncreaseHedge)
            .unwrap();
        assert_eq!(
            controller.execute(hedge.id).await,
            Err(ControlActionError::DispatchTimeout {
                action: "increase_hedge".into(),
                timeout_ms: 1_000,
            })
        );
    }

    #[tokio::test]
    async fn dispatch_failure_leaves_state_alone() {
        let paper = Arc::new(PaperExecutionClient::new());
        paper.fail_with(Some(ExecutionError::Unavailable {
            message: "venue down".into(),
        }));
        let controller = emergency_controller(Some(paper.clone()));

        let assessment = controller.evaluate(&snapshot(0.6, None), Utc::now()).await;
        assert_eq!(assessment.state, ControlState::Emergency);
        assert!(assessment.dispatched.is_empty());

        let hedge = assessment
            .actions
            .iter()
            .find(|a| a.kind == ActionKind::IncreaseHedge)
            .unwrap();
        let err = controller.execute(hedge.id).await.unwrap_err();
        assert!(matches!(
            err,
            ControlActionError::DispatchFailed { ref action, .. } if action == "increase_hedge"
        ));
        assert_eq!(controller.latest(), Some(assessment.clone()));

        paper.fail_with(None);
        controller.execute(hedge.id).await.unwrap();
        assert_eq!(controller.latest().unwrap().dispatched, vec![hedge.id]);
        assert_eq!(paper.requests()[0].direction, ExecutionDirection::Hedge);
    }

    #[tokio::test]
    async fn execute_reports_missing_pieces() {
        let controller = emergency_controller(None);
        let unknown = Uuid::new_v4();
        assert_eq!(
            controller.execute(unknown).await,
            Err(ControlActionError::UnknownAction {
                action_id: unknown.to_string()
            })
        );

        let assessment = controller.evaluate(&snapshot(0.6, None), Utc::now()).await;
        assert!(assessment.dispatched.is_empty());
        assert_eq!(
            controller.execute(assessment.actions[0].id).await,
            Err(ControlActionError::NoExecutor)
        );
    }
}
