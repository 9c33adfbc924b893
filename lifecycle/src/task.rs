//! The task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::contract::{ActivationRecord, ResultRecord};
use crate::event::{RoutingMode, TransitionCause};
use crate::state::TaskState;

/// One entry of a task's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// Task-history ledger sequence number of the transition
    pub seq: u64,
    /// Previous state (none at authorization)
    pub from: Option<TaskState>,
    /// New state
    pub to: TaskState,
    /// Acting party
    pub actor_id: String,
    /// Cause of the change
    pub cause: TransitionCause,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Current routing of an activated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    /// Executors the task was routed to
    pub executors: Vec<String>,
    /// How they were selected
    pub mode: RoutingMode,
    /// Who routed
    pub routed_by: String,
    /// Declines by executor with reason
    pub declined: BTreeMap<String, String>,
}

impl Routing {
    /// Routed executors that have not declined.
    pub fn awaiting(&self) -> Vec<String> {
        self.executors
            .iter()
            .filter(|e| !self.declined.contains_key(*e))
            .cloned()
            .collect()
    }

    /// Whether the executor was routed and has not declined.
    pub fn is_open_to(&self, executor_id: &str) -> bool {
        self.executors.iter().any(|e| e == executor_id) && !self.declined.contains_key(executor_id)
    }
}

/// A recorded acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acceptance {
    /// Accepting executor
    pub executor_id: String,
    /// When accepted
    pub accepted_at: DateTime<Utc>,
    /// Ledger sequence of the acceptance event
    pub event_seq: u64,
}

/// A containment hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineHold {
    /// Witness statement that triggered containment
    pub statement_id: String,
    /// State to restore on release
    pub previous_state: TaskState,
    /// When the hold was applied
    pub since: DateTime<Utc>,
}

/// One unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: String,
    /// Short title
    pub title: String,
    /// Owning delegator
    pub delegator_id: String,
    /// Current state
    pub state: TaskState,
    /// Optimistic concurrency version, bumped on every change
    pub version: u64,
    /// Ordered state history
    pub history: Vec<StateChange>,
    /// Activation records, oldest first
    pub activations: Vec<ActivationRecord>,
    /// Current routing
    pub routing: Option<Routing>,
    /// Current acceptance
    pub acceptance: Option<Acceptance>,
    /// Executor performing the work
    pub executor_id: Option<String>,
    /// Reported results, oldest first
    pub results: Vec<ResultRecord>,
    /// Active containment hold
    pub quarantine: Option<QuarantineHold>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn new(id: String, title: String, delegator_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            title,
            delegator_id,
            state: TaskState::Authorized,
            version: 0,
            history: vec![],
            activations: vec![],
            routing: None,
            acceptance: None,
            executor_id: None,
            results: vec![],
            quarantine: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a committed transition.
    pub(crate) fn apply(
        &mut self,
        seq: u64,
        to: TaskState,
        actor_id: &str,
        cause: TransitionCause,
        at: DateTime<Utc>,
    ) {
        let from = if self.history.is_empty() {
            None
        } else {
            Some(self.state)
        };
        self.history.push(StateChange {
            seq,
            from,
            to,
            actor_id: actor_id.to_string(),
            cause,
            at,
        });
        self.state = to;
        self.version += 1;
        self.updated_at = at;
    }

    /// Bump the version for a change that leaves the state as is.
    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = at;
    }

    /// Latest activation.
    pub fn current_activation(&self) -> Option<&ActivationRecord> {
        self.activations.last()
    }

    /// Latest result.
    pub fn latest_result(&self) -> Option<&ResultRecord> {
        self.results.last()
    }

    /// Recorded state sequence.
    pub fn state_walk(&self) -> Vec<TaskState> {
        self.history.iter().map(|c| c.to).collect()
    }

    /// Response deadline while awaiting an executor.
    pub fn response_deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            TaskState::Activated | TaskState::Routed => self
                .current_activation()
                .map(|a| a.response_policy.deadline),
            _ => None,
        }
    }
}
