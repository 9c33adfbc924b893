//! Error types for the task lifecycle.

use charter::{CharterError, LedgerError};

use crate::state::TaskState;

/// Errors that can occur during lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Task does not exist
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Caller read a stale version
    #[error("Task {task_id} version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        task_id: String,
        expected: u64,
        actual: u64,
    },

    /// Edge outside the transition table
    #[error("Task {task_id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    /// Attempt to begin work without a recorded acceptance by the caller
    #[error("Task {task_id} has no acceptance recorded for {actor_id}")]
    MissingAcceptance { task_id: String, actor_id: String },

    /// Result submitted by someone other than the accepting executor
    #[error("Result for task {task_id} lacks provenance: {detail}")]
    ResultWithoutProvenance { task_id: String, detail: String },

    /// Containment requested from a state that cannot be contained
    #[error("Task {task_id} cannot be contained from {state}")]
    NotContainable { task_id: String, state: TaskState },

    /// Release or nullification referenced the wrong statement
    #[error("Task {task_id} is held under {held}, not {requested}")]
    QuarantineMismatch {
        task_id: String,
        held: String,
        requested: String,
    },

    /// Malformed request rejected at intake
    #[error("Validation failed ({code}): {detail}")]
    Validation { code: &'static str, detail: String },

    /// Capability check failed
    #[error(transparent)]
    Charter(#[from] CharterError),

    /// Task history could not be durably recorded
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl LifecycleError {
    /// Shorthand for a validation failure.
    pub fn validation(code: &'static str, detail: impl Into<String>) -> Self {
        Self::Validation {
            code,
            detail: detail.into(),
        }
    }

    /// Stable failure code.
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::NotFound(_) => "task_not_found",
            LifecycleError::VersionConflict { .. } => "version_conflict",
            LifecycleError::InvalidTransition { .. } => "invalid_transition",
            LifecycleError::MissingAcceptance { .. } => "missing_acceptance",
            LifecycleError::ResultWithoutProvenance { .. } => "result_without_provenance",
            LifecycleError::NotContainable { .. } => "not_containable",
            LifecycleError::QuarantineMismatch { .. } => "quarantine_mismatch",
            LifecycleError::Validation { code, .. } => *code,
            LifecycleError::Charter(e) => e.code(),
            LifecycleError::Ledger(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
