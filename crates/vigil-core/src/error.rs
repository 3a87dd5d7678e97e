use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by engine operations
///
/// `Conflict`, `StaleOperation`, `NotFound` and `Disabled` go back to the
/// caller. `PersistenceDeferred` is only ever logged by the persistence
/// writer while it retries.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// The operation is not valid in the current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// The supplied timestamp is older than recorded state
    #[error("stale operation: {0}")]
    StaleOperation(String),

    /// Unknown session or candidate
    #[error("not found: {0}")]
    NotFound(String),

    /// The feature is not configured
    #[error("disabled: {0}")]
    Disabled(String),

    /// A durable write failed and will be retried
    #[error("persistence deferred: {0}")]
    PersistenceDeferred(String),

    /// The engine task is no longer running
    #[error("engine is not running")]
    Unavailable,
}

impl EngineError {
    /// Short machine-readable name of the error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::StaleOperation(_) => "stale_operation",
            Self::NotFound(_) => "not_found",
            Self::Disabled(_) => "disabled",
            Self::PersistenceDeferred(_) => "persistence_deferred",
            Self::Unavailable => "unavailable",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
