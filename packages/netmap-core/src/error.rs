//! Error taxonomy for the topology pipeline.
//!
//! Per-target failures (`ProbeFailure`, `ProtocolError`) are absorbed at batch
//! boundaries and only ever show up in logs and metrics. `ValidationError` and
//! unexpected failures abort a run and are reported through `GenerationError`.

use crate::pipeline::GenerationMetrics;
use thiserror::Error;

/// A structural defect in an assembled topology. Fatal to the run that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{entity} '{id}' is missing required field '{field}'")]
    MissingField {
        entity: &'static str,
        id: String,
        field: &'static str,
    },

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("node '{node_id}' has malformed IPv4 address '{ip}'")]
    InvalidIp { node_id: String, ip: String },

    #[error("link '{link_id}' references unknown node '{node_id}'")]
    DanglingEndpoint { link_id: String, node_id: String },

    #[error("link '{0}' connects a node to itself")]
    SelfLink(String),

    #[error("duplicate link between '{source_id}' and '{target_id}'")]
    DuplicateLink { source_id: String, target_id: String },

    #[error("stats.{field} is {recorded} but topology holds {actual}")]
    StatsMismatch {
        field: &'static str,
        recorded: usize,
        actual: usize,
    },

    #[error("{subject} confidence {value} is outside [0, 1]")]
    ConfidenceOutOfRange { subject: String, value: f64 },
}

/// A single target's forwarding-table poll failed.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("poll of {target} timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("transport error polling {target}: {message}")]
    Transport { target: String, message: String },

    #[error("malformed response from {target}: {message}")]
    MalformedResponse { target: String, message: String },

    #[error("invalid object identifier '{0}'")]
    InvalidOid(String),
}

/// A single target did not answer its liveness check.
#[derive(Debug, Clone, Error)]
pub enum ProbeFailure {
    #[error("{target} did not respond within {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("{target} is unreachable")]
    Unreachable { target: String },

    #[error("liveness check for {target} could not run: {message}")]
    CheckFailed { target: String, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum InventoryError {
    #[error("device inventory unavailable: {0}")]
    Unavailable(String),

    #[error("device inventory returned malformed data: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("failed to store topology {id}: {message}")]
    Write { id: String, message: String },

    #[error("failed to read topology store: {0}")]
    Read(String),
}

/// Why a generation run failed.
#[derive(Debug, Clone, Error)]
pub enum GenerationFailure {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("assembled topology failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("pipeline exceeded its {0}ms deadline")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A failed generation run with the metrics collected before it stopped.
#[derive(Debug, Clone, Error)]
#[error("topology generation failed: {failure}")]
pub struct GenerationError {
    pub failure: GenerationFailure,
    pub metrics: GenerationMetrics,
}

impl GenerationError {
    pub fn new(failure: impl Into<GenerationFailure>, metrics: GenerationMetrics) -> Self {
        Self {
            failure: failure.into(),
            metrics,
        }
    }
}
