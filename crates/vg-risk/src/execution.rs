//! Execution collaborator seam.
//!
//! The engine never talks to a broker. Control actions leave through
//! [`ExecutionClient`], implemented by whoever owns order execution.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionDirection {
    Decrease,
    Increase,
    Hedge,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub direction: ExecutionDirection,
    pub urgency: Urgency,
    /// Target fraction of the exposure limit, in `[0, 1]`.
    pub target_allocation: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("execution venue unavailable: {message}")]
    Unavailable { message: String },
    #[error("request rejected: {reason}")]
    Rejected { reason: String },
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<(), ExecutionError>;
}

/// Records requests instead of executing them. Used in sandbox runs and
/// tests; can be told to fail.
#[derive(Debug, Default)]
pub struct PaperExecutionClient {
    requests: Mutex<Vec<ExecutionRequest>>,
    failure: Mutex<Option<ExecutionError>>,
}

impl PaperExecutionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent request with `error` (or succeed again with `None`).
    pub fn fail_with(&self, error: Option<ExecutionError>) {
        *self.failure.lock() = error;
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ExecutionClient for PaperExecutionClient {
    async fn execute(&self, request: ExecutionRequest) -> Result<(), ExecutionError> {
        let failure = self.failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        info!(
            direction = ?request.direction,
            urgency = ?request.urgency,
            target = request.target_allocation,
            "paper execution"
        );
        self.requests.lock().push(request);
        Ok(())
    }
}
