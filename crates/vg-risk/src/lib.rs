//! Risk controller for Vigil.
//!
//! Provides:
//! - Blended risk scoring from loss, exposure and volatility ratios
//! - Control state classification (monitoring / adjusting / emergency)
//! - Prioritized control actions with rationales
//! - Dispatch to an external execution collaborator

pub mod controller;
pub mod execution;

pub use controller::{
    ActionKind, ControlAction, ControlState, ExposureState, Priority, RiskAssessment,
    RiskController, RiskRatios,
};
pub use execution::{
    ExecutionClient, ExecutionDirection, ExecutionError, ExecutionRequest, PaperExecutionClient,
    Urgency,
};
