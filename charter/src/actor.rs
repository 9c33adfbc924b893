//! Actors and their capability sets.
//!
//! Authority is never inferred from identity. Each actor carries an explicit
//! set of [`Capability`] flags and every engine operation calls
//! [`Actor::require`] before touching state, so a guarantee like "a reviewer
//! may never execute a task" is simply the absence of a flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Errors raised at the actor/capability boundary.
#[derive(Debug, thiserror::Error)]
pub enum CharterError {
    /// Actor lacks the capability required by an operation
    #[error("Actor {actor_id} lacks capability {capability}")]
    Unauthorized {
        actor_id: String,
        capability: Capability,
    },

    /// Actor is not registered
    #[error("Unknown actor: {0}")]
    UnknownActor(String),

    /// Actor already registered
    #[error("Actor already registered: {0}")]
    DuplicateActor(String),
}

impl CharterError {
    /// Stable failure code.
    pub fn code(&self) -> &'static str {
        match self {
            CharterError::Unauthorized { .. } => "unauthorized",
            CharterError::UnknownActor(_) => "unknown_actor",
            CharterError::DuplicateActor(_) => "duplicate_actor",
        }
    }
}

/// A single permission flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    // ========== Task Operations ==========
    /// Authorize a new unit of delegated work
    AuthorizeTask,
    /// Issue or reissue an activation request
    ActivateTask,
    /// Route an activated task to executors
    RouteTask,
    /// Accept, decline, start and report on routed tasks
    ExecuteTask,
    /// Aggregate reported results
    AggregateResults,
    /// Close a task as completed
    CompleteTask,

    // ========== Deliberation ==========
    /// Submit motions for scheduling
    SubmitMotion,
    /// Raise active blockers
    RaiseBlocker,
    /// Acknowledge forced agenda items and band conditions
    Acknowledge,

    // ========== Review ==========
    /// Sit on review panels
    SitOnPanel,
    /// File an appeal against a finding
    FileAppeal,

    // ========== Capacity ==========
    /// Declare execution capacity
    DeclareCapacity,
}

impl Capability {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizeTask => "authorize_task",
            Self::ActivateTask => "activate_task",
            Self::RouteTask => "route_task",
            Self::ExecuteTask => "execute_task",
            Self::AggregateResults => "aggregate_results",
            Self::CompleteTask => "complete_task",
            Self::SubmitMotion => "submit_motion",
            Self::RaiseBlocker => "raise_blocker",
            Self::Acknowledge => "acknowledge",
            Self::SitOnPanel => "sit_on_panel",
            Self::FileAppeal => "file_appeal",
            Self::DeclareCapacity => "declare_capacity",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preset bundles of capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns work: authorizes, activates, aggregates and completes it
    Delegator,
    /// Routes activated work to executors
    Router,
    /// Takes on and performs work
    Executor,
    /// Sits on review and appeal panels
    Reviewer,
    /// Deliberation participant: motions, blockers, acknowledgments, appeals
    Steward,
    /// Declares capacity on behalf of a source
    CapacitySource,
}

impl Role {
    /// Capabilities granted by this role.
    pub fn capabilities(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Delegator => &[AuthorizeTask, ActivateTask, AggregateResults, CompleteTask],
            Role::Router => &[RouteTask],
            Role::Executor => &[ExecuteTask],
            Role::Reviewer => &[SitOnPanel],
            Role::Steward => &[SubmitMotion, RaiseBlocker, Acknowledge, FileAppeal],
            Role::CapacitySource => &[DeclareCapacity],
        }
    }
}

/// An ordered set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set containing every capability of the given roles.
    pub fn from_roles(roles: &[Role]) -> Self {
        let mut set = Self::new();
        for role in roles {
            set.grant_role(*role);
        }
        set
    }

    /// Add one capability.
    pub fn grant(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    /// Add every capability of a role.
    pub fn grant_role(&mut self, role: Role) {
        self.0.extend(role.capabilities().iter().copied());
    }

    /// Check membership.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Iterate in order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A participant in the governance process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// Unique actor ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Granted capabilities
    pub capabilities: CapabilitySet,
    /// Subjects (task ids, realms, actor ids) the actor has declared a bias toward
    pub declared_biases: Vec<String>,
    /// When the actor was registered
    pub registered_at: DateTime<Utc>,
}

impl Actor {
    /// Create an actor with no capabilities.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: CapabilitySet::new(),
            declared_biases: vec![],
            registered_at: Utc::now(),
        }
    }

    /// Grant a role's capabilities.
    pub fn with_role(mut self, role: Role) -> Self {
        self.capabilities.grant_role(role);
        self
    }

    /// Grant a single capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.grant(capability);
        self
    }

    /// Declare a bias toward a subject.
    pub fn with_bias(mut self, subject: impl Into<String>) -> Self {
        self.declared_biases.push(subject.into());
        self
    }

    /// Check a capability.
    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Fail unless the actor holds the capability.
    pub fn require(&self, capability: Capability) -> Result<(), CharterError> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(CharterError::Unauthorized {
                actor_id: self.id.clone(),
                capability,
            })
        }
    }

    /// Whether the actor declared a bias toward any of the subjects.
    pub fn is_biased_toward<'a>(&self, subjects: impl IntoIterator<Item = &'a str>) -> bool {
        subjects
            .into_iter()
            .any(|s| self.declared_biases.iter().any(|b| b == s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        let actor = Actor::new("a-1", "Alice")
            .with_role(Role::Delegator)
            .with_role(Role::Steward);

        assert!(actor.can(Capability::AuthorizeTask));
        assert!(actor.can(Capability::SubmitMotion));
        assert!(!actor.can(Capability::ExecuteTask));
        assert!(!actor.can(Capability::SitOnPanel));
    }

    #[test]
    fn test_require_reports_missing_capability() {
        let reviewer = Actor::new("r-1", "Reviewer").with_role(Role::Reviewer);
        let err = reviewer.require(Capability::ExecuteTask).unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        assert!(err.to_string().contains("execute_task"));
    }

    #[test]
    fn test_declared_bias() {
        let actor = Actor::new("r-2", "Reviewer")
            .with_role(Role::Reviewer)
            .with_bias("realm-water");
        assert!(actor.is_biased_toward(["task-1", "realm-water"]));
        assert!(!actor.is_biased_toward(["task-1"]));
    }

    #[test]
    fn test_capability_set_serialization() {
        let set = CapabilitySet::from_roles(&[Role::Router]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[\"route_task\"]");
    }
}
