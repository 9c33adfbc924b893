//! Activation and result contracts exchanged with executors.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::types::{LifecycleError, Result};

/// Default backoff schedule for activation responses (seconds).
const DEFAULT_BACKOFF_SECS: [u64; 3] = [3_600, 14_400, 43_200];

/// How binding a constraint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSeverity {
    /// Non-negotiable
    Must,
    /// Expected unless justified
    Should,
    /// Optional preference
    May,
}

/// What a constraint governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Boundaries of the work
    Scope,
    /// Deadlines and schedule
    Timing,
    /// Budget, people, equipment
    Resource,
    /// What must be reported or published
    Disclosure,
    /// Acceptance criteria
    Quality,
    /// Anything else
    Other,
}

/// A typed constraint on the work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub severity: ConstraintSeverity,
    pub description: String,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, severity: ConstraintSeverity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
        }
    }

    /// A `must` constraint.
    pub fn must(kind: ConstraintKind, description: impl Into<String>) -> Self {
        Self::new(kind, ConstraintSeverity::Must, description)
    }

    /// A `should` constraint.
    pub fn should(kind: ConstraintKind, description: impl Into<String>) -> Self {
        Self::new(kind, ConstraintSeverity::Should, description)
    }

    /// A `may` constraint.
    pub fn may(kind: ConstraintKind, description: impl Into<String>) -> Self {
        Self::new(kind, ConstraintSeverity::May, description)
    }
}

/// What success looks like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessDefinition {
    /// Narrative description
    pub description: String,
    /// Enumerated deliverables
    pub deliverables: Vec<String>,
}

/// Response deadline and retry schedule for an activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePolicy {
    /// Executors must respond before this instant
    pub deadline: DateTime<Utc>,
    /// Delays between reminder attempts (seconds)
    pub backoff_secs: Vec<u64>,
}

impl ResponsePolicy {
    /// Policy with a deadline `window` from now and the default backoff.
    pub fn within(window: Duration) -> Self {
        Self {
            deadline: Utc::now() + window,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }

    /// When reminder `attempt` (0-based) is due, measured from `issued_at`.
    pub fn reminder_at(&self, issued_at: DateTime<Utc>, attempt: usize) -> Option<DateTime<Utc>> {
        if attempt >= self.backoff_secs.len() {
            return None;
        }
        let offset = self
            .backoff_secs
            .iter()
            .take(attempt + 1)
            .fold(0u64, |total, secs| total.saturating_add(*secs));
        let at = issued_at + charter::window(offset);
        (at < self.deadline).then_some(at)
    }
}

/// Request for an executor to take on a task. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// Unique activation ID
    pub id: String,
    /// Task being activated
    pub task_id: String,
    /// Human-readable summary
    pub summary: String,
    /// Explicit constraints
    pub constraints: Vec<Constraint>,
    /// Success definition with enumerated deliverables
    pub success: SuccessDefinition,
    /// Response deadline and backoff
    pub response_policy: ResponsePolicy,
    /// When it was issued
    pub issued_at: DateTime<Utc>,
}

impl ActivationRecord {
    /// Create an activation with a response window.
    pub fn new(task_id: impl Into<String>, summary: impl Into<String>, window: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            summary: summary.into(),
            constraints: vec![],
            success: SuccessDefinition::default(),
            response_policy: ResponsePolicy::within(window),
            issued_at: Utc::now(),
        }
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Describe success.
    pub fn with_success(mut self, description: impl Into<String>) -> Self {
        self.success.description = description.into();
        self
    }

    /// Enumerate a deliverable.
    pub fn with_deliverable(mut self, name: impl Into<String>) -> Self {
        self.success.deliverables.push(name.into());
        self
    }

    /// Override the response policy.
    pub fn with_response_policy(mut self, policy: ResponsePolicy) -> Self {
        self.response_policy = policy;
        self
    }

    /// Constraints as an order-independent set.
    pub fn constraint_set(&self) -> BTreeSet<&Constraint> {
        self.constraints.iter().collect()
    }

    /// Check required fields.
    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            return Err(LifecycleError::validation("missing_summary", "activation summary is empty"));
        }
        if self.success.deliverables.is_empty() {
            return Err(LifecycleError::validation(
                "missing_deliverables",
                "success definition enumerates no deliverables",
            ));
        }
        if self.response_policy.deadline <= self.issued_at {
            return Err(LifecycleError::validation(
                "deadline_in_past",
                "response deadline precedes issuance",
            ));
        }
        Ok(())
    }
}

/// Outcome reported by an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    CompletedWithIssues,
    Partial,
    Failed,
    Blocked,
    Withdrawn,
}

impl ResultStatus {
    /// Whether the status satisfies normal exit criteria.
    pub fn satisfies_exit(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithIssues)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithIssues => "completed_with_issues",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Withdrawn => "withdrawn",
        }
    }
}

/// A delivered artifact with its integrity checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    /// Name matching the success definition
    pub name: String,
    /// Hex-encoded SHA-256 of the artifact
    pub checksum: String,
}

impl Deliverable {
    /// Checksum the artifact bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            checksum: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Check the artifact against the recorded checksum.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        hex::encode(Sha256::digest(bytes)) == self.checksum
    }

    /// Whether the checksum is well formed.
    pub fn has_valid_checksum(&self) -> bool {
        self.checksum.len() == 64 && self.checksum.chars().all(|c| c.is_ascii_hexdigit())
    }
}

/// Type of reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Blocker,
    Defect,
    ScopeChange,
    Dependency,
    Other,
}

/// An issue or blocker reported with a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub description: String,
}

/// Outcome record submitted by an executor. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Unique result ID
    pub id: String,
    /// Task reported on
    pub task_id: String,
    /// Submitting executor
    pub executor_id: String,
    /// Outcome
    pub status: ResultStatus,
    /// Delivered artifacts
    pub deliverables: Vec<Deliverable>,
    /// Issues and blockers
    pub issues: Vec<Issue>,
    /// Executor attests the record is accurate
    pub attested: bool,
    /// When submitted
    pub submitted_at: DateTime<Utc>,
}

impl ResultRecord {
    /// Create an unattested result.
    pub fn new(task_id: impl Into<String>, executor_id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            executor_id: executor_id.into(),
            status,
            deliverables: vec![],
            issues: vec![],
            attested: false,
            submitted_at: Utc::now(),
        }
    }

    /// Attach a deliverable.
    pub fn with_deliverable(mut self, deliverable: Deliverable) -> Self {
        self.deliverables.push(deliverable);
        self
    }

    /// Attach an issue.
    pub fn with_issue(mut self, kind: IssueKind, description: impl Into<String>) -> Self {
        self.issues.push(Issue {
            kind,
            description: description.into(),
        });
        self
    }

    /// Set the attestation flag.
    pub fn attested(mut self) -> Self {
        self.attested = true;
        self
    }

    /// Validate against the activation's success definition.
    ///
    /// Returns delivered names the success definition never enumerated.
    pub fn validate(&self, success: &SuccessDefinition) -> Result<Vec<String>> {
        if !self.attested {
            return Err(LifecycleError::validation(
                "missing_attestation",
                "result must be attested before acceptance",
            ));
        }

        if let Some(bad) = self.deliverables.iter().find(|d| !d.has_valid_checksum()) {
            return Err(LifecycleError::validation(
                "invalid_checksum",
                format!("deliverable {} carries a malformed checksum", bad.name),
            ));
        }

        let delivered: BTreeSet<&str> = self.deliverables.iter().map(|d| d.name.as_str()).collect();

        if self.status == ResultStatus::Completed {
            if let Some(missing) = success
                .deliverables
                .iter()
                .find(|name| !delivered.contains(name.as_str()))
            {
                return Err(LifecycleError::validation(
                    "missing_deliverable",
                    format!("completed result omits deliverable {}", missing),
                ));
            }
        }

        if matches!(self.status, ResultStatus::Blocked) && self.issues.is_empty() {
            return Err(LifecycleError::validation(
                "missing_blocker",
                "blocked result must name at least one issue",
            ));
        }

        Ok(delivered
            .into_iter()
            .filter(|name| !success.deliverables.iter().any(|d| d == name))
            .map(str::to_string)
            .collect())
    }
}
