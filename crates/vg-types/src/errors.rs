use thiserror::Error;

/// Main error type for the Vigil engine
#[derive(Error, Debug)]
pub enum VgError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Control action error: {0}")]
    ControlAction(#[from] ControlActionError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-level errors. Retried per the gateway's reconnect policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,

    #[error("connect timed out after {timeout_ms} ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("send timed out after {timeout_ms} ms")]
    SendTimeout { timeout_ms: u64 },

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("connection closed: {reason}")]
    Closed { reason: String },

    #[error("giving up after {attempts} reconnect attempts")]
    MaxReconnectAttempts { attempts: u32 },
}

/// Malformed inbound data. Dropped and counted, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("unknown message type: {message_type}")]
    UnknownMessageType { message_type: String },

    #[error("unknown domain: {domain}")]
    UnknownDomain { domain: String },

    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },
}

/// A recomputation tick that could not produce output. The previous snapshot
/// is retained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("no samples for required series {series} ({domain})")]
    MissingSeries { domain: String, series: String },

    #[error("no usable weights for {domain} axis {axis}")]
    NoWeights { domain: String, axis: String },

    #[error("tick panicked: {message}")]
    Panicked { message: String },
}

/// Artifact generation aborted. No partial file is emitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    #[error("nothing selected for export")]
    EmptySelection,

    #[error("serialization failed: {message}")]
    Serialization { message: String },

    #[error("record {index} does not match the export schema: {detail}")]
    SchemaMismatch { index: usize, detail: String },

    #[error("writing artifact failed: {message}")]
    Io { message: String },
}

/// Dispatching a control action to the execution collaborator failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlActionError {
    #[error("no execution client configured")]
    NoExecutor,

    #[error("unknown control action: {action_id}")]
    UnknownAction { action_id: String },

    #[error("dispatch of {action} failed: {message}")]
    DispatchFailed { action: String, message: String },

    #[error("dispatch of {action} timed out after {timeout_ms} ms")]
    DispatchTimeout { action: String, timeout_ms: u64 },
}

/// Alert engine API misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert not found: {id}")]
    NotFound { id: String },
}

/// Result type alias for Vigil operations
pub type VgResult<T> = Result<T, VgError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::errors::VgError::Config(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::errors::VgError::Internal(format!($($arg)*))
    };
}
