//! Task states and the fixed transition table.

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Work has been authorized by a delegator
    Authorized,
    /// An activation request has been issued
    Activated,
    /// The request has been routed to one or more executors
    Routed,
    /// An executor explicitly accepted
    Accepted,
    /// Every routed executor declined
    Declined,
    /// The accepting executor is working
    InProgress,
    /// A result has been reported
    Reported,
    /// Results have been aggregated by the delegator
    Aggregated,
    /// Terminal: exit criteria satisfied
    Completed,
    /// Contained pending review
    Quarantined,
    /// Terminal: voided by review
    Nullified,
}

/// Every legal edge. Anything else is an invalid transition.
pub const TRANSITIONS: &[(TaskState, TaskState)] = &[
    (TaskState::Authorized, TaskState::Activated),
    (TaskState::Activated, TaskState::Routed),
    (TaskState::Routed, TaskState::Accepted),
    (TaskState::Routed, TaskState::Declined),
    (TaskState::Declined, TaskState::Activated),
    (TaskState::Accepted, TaskState::InProgress),
    (TaskState::InProgress, TaskState::Reported),
    (TaskState::Reported, TaskState::Aggregated),
    (TaskState::Aggregated, TaskState::Completed),
    (TaskState::InProgress, TaskState::Quarantined),
    (TaskState::Reported, TaskState::Quarantined),
    (TaskState::Aggregated, TaskState::Quarantined),
    (TaskState::Quarantined, TaskState::InProgress),
    (TaskState::Quarantined, TaskState::Reported),
    (TaskState::Quarantined, TaskState::Aggregated),
    (TaskState::Quarantined, TaskState::Nullified),
];

impl TaskState {
    /// Whether `self → to` is in the transition table.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        TRANSITIONS.iter().any(|(from, target)| from == self && *target == to)
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Nullified)
    }

    /// States from which containment may be applied.
    pub fn is_containable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Reported | Self::Aggregated)
    }

    /// States that precede an acceptance event.
    pub fn precedes_acceptance(&self) -> bool {
        matches!(
            self,
            Self::Authorized | Self::Activated | Self::Routed | Self::Declined
        )
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Activated => "activated",
            Self::Routed => "routed",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::InProgress => "in_progress",
            Self::Reported => "reported",
            Self::Aggregated => "aggregated",
            Self::Completed => "completed",
            Self::Quarantined => "quarantined",
            Self::Nullified => "nullified",
        }
    }

    /// All states.
    pub fn all() -> Vec<Self> {
        vec![
            Self::Authorized,
            Self::Activated,
            Self::Routed,
            Self::Accepted,
            Self::Declined,
            Self::InProgress,
            Self::Reported,
            Self::Aggregated,
            Self::Completed,
            Self::Quarantined,
            Self::Nullified,
        ]
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that a recorded state sequence is a walk of the transition graph.
///
/// The walk must start at `authorized`. Releases from quarantine must return
/// to the state held immediately before containment.
pub fn is_valid_walk(states: &[TaskState]) -> bool {
    if states.first() != Some(&TaskState::Authorized) {
        return false;
    }

    let mut before_quarantine = None;
    for pair in states.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        if !from.can_transition_to(to) {
            return false;
        }
        if to == TaskState::Quarantined {
            before_quarantine = Some(from);
        }
        if from == TaskState::Quarantined && to != TaskState::Nullified {
            if before_quarantine != Some(to) {
                return false;
            }
        }
    }
    true
}
