//! Lifecycle events recorded in the task-history ledger.
//!
//! Every accepted transition and every rejected attempt becomes one
//! [`LifecycleEvent`]. The enforcement detector reads this stream; nothing
//! here is ever edited after it is recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::contract::ResultStatus;
use crate::state::TaskState;

/// How executors were selected for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// A router named the executors
    Explicit,
    /// The engine selected executors without a routing decision
    Automatic,
}

/// Why a transition happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TransitionCause {
    Authorization { title: String },
    Activation {
        activation_id: String,
        reactivation: bool,
    },
    Routing {
        executors: Vec<String>,
        mode: RoutingMode,
    },
    Acceptance { executor_id: String },
    AllDeclined { declines: BTreeMap<String, String> },
    Start { acceptance_seq: u64 },
    Report {
        result_id: String,
        status: ResultStatus,
        undeclared_deliverables: Vec<String>,
    },
    Aggregation { result_count: usize },
    Completion { result_id: String },
    Containment { statement_id: String },
    Release {
        case_id: String,
        statement_id: String,
    },
    Nullification {
        case_id: String,
        statement_id: String,
    },
}

impl TransitionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization { .. } => "authorization",
            Self::Activation { .. } => "activation",
            Self::Routing { .. } => "routing",
            Self::Acceptance { .. } => "acceptance",
            Self::AllDeclined { .. } => "all_declined",
            Self::Start { .. } => "start",
            Self::Report { .. } => "report",
            Self::Aggregation { .. } => "aggregation",
            Self::Completion { .. } => "completion",
            Self::Containment { .. } => "containment",
            Self::Release { .. } => "release",
            Self::Nullification { .. } => "nullification",
        }
    }
}

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// Edge outside the transition table
    InvalidTransition,
    /// Work started without an acceptance by the caller
    MissingAcceptance,
    /// Result submitted by someone other than the accepting executor
    ResultWithoutProvenance,
    /// Caller held a stale version
    VersionConflict,
    /// Malformed contract or unmet exit criteria
    ValidationFailed,
    /// Executor acted on a task it was not routed to
    UnroutedExecutor,
    /// Caller lacks the capability or ownership
    Unauthorized,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTransition => "invalid_transition",
            Self::MissingAcceptance => "missing_acceptance",
            Self::ResultWithoutProvenance => "result_without_provenance",
            Self::VersionConflict => "version_conflict",
            Self::ValidationFailed => "validation_failed",
            Self::UnroutedExecutor => "unrouted_executor",
            Self::Unauthorized => "unauthorized",
        }
    }
}

/// What happened to the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// A state change was committed
    Transitioned {
        from: Option<TaskState>,
        to: TaskState,
        version: u64,
        cause: TransitionCause,
    },
    /// One executor declined; others may still respond
    DeclineRecorded {
        executor_id: String,
        reason: String,
        version: u64,
        awaiting: Vec<String>,
    },
    /// An attempt was refused and left no state change
    Rejected {
        from: TaskState,
        attempted: TaskState,
        rejection: RejectionKind,
        detail: String,
    },
}

/// One entry of the task-history ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Task the event concerns
    pub task_id: String,
    /// Acting party (actor id or engine authority)
    pub actor_id: String,
    /// When the event was produced
    pub at: DateTime<Utc>,
    /// Event body
    pub kind: LifecycleEventKind,
}

impl LifecycleEvent {
    pub fn new(task_id: impl Into<String>, actor_id: impl Into<String>, kind: LifecycleEventKind) -> Self {
        Self {
            task_id: task_id.into(),
            actor_id: actor_id.into(),
            at: Utc::now(),
            kind,
        }
    }

    /// Target state if this event is a committed transition.
    pub fn transitioned_to(&self) -> Option<TaskState> {
        match &self.kind {
            LifecycleEventKind::Transitioned { to, .. } => Some(*to),
            _ => None,
        }
    }

    /// Whether this event records a refused attempt.
    pub fn is_rejection(&self) -> bool {
        matches!(self.kind, LifecycleEventKind::Rejected { .. })
    }
}
