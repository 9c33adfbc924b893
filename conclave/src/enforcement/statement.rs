//! Witness statements - the only way the engine names a violation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use charter::{new_id, Severity};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Defined anomaly patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// An edge outside the transition table was attempted
    InvalidTransition,
    /// Work began without the caller's recorded acceptance
    BypassedAcceptance,
    /// Executors were assigned without a routing decision
    AutoRouted,
    /// A result arrived from someone other than the accepting executor
    ResultInjection,
    /// An activation went unanswered past its response window
    SilenceTimeout,
    /// A result carried deliverables the activation never asked for
    ScopeDrift,
    /// Recorded ledger content no longer matches what was sealed
    LedgerTampering,
    /// A contained task went unreviewed past the review SLA
    ReviewOverdue,
}

impl ViolationKind {
    /// Severity assigned when the statement is emitted.
    pub fn severity(&self) -> Severity {
        match self {
            Self::ScopeDrift => Severity::Low,
            Self::InvalidTransition
            | Self::AutoRouted
            | Self::SilenceTimeout
            | Self::ReviewOverdue => Severity::Medium,
            Self::BypassedAcceptance | Self::ResultInjection => Severity::High,
            Self::LedgerTampering => Severity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTransition => "invalid_transition",
            Self::BypassedAcceptance => "bypassed_acceptance",
            Self::AutoRouted => "auto_routed",
            Self::ResultInjection => "result_injection",
            Self::SilenceTimeout => "silence_timeout",
            Self::ScopeDrift => "scope_drift",
            Self::LedgerTampering => "ledger_tampering",
            Self::ReviewOverdue => "review_overdue",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a statement is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Task,
    Ledger,
    Case,
}

/// Pointer to the ledger record a statement relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Ledger name
    pub ledger: String,
    /// Sequence number within that ledger
    pub seq: u64,
}

impl EvidenceRef {
    pub fn new(ledger: impl Into<String>, seq: u64) -> Self {
        Self {
            ledger: ledger.into(),
            seq,
        }
    }
}

/// Immutable record of a detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessStatement {
    /// Statement ID
    pub id: String,
    /// Task, ledger or case the statement is about
    pub subject_id: String,
    /// Kind of subject
    pub subject_kind: SubjectKind,
    /// Violation pattern matched
    pub kind: ViolationKind,
    /// Severity
    pub severity: Severity,
    /// Records the statement relies on
    pub evidence: Vec<EvidenceRef>,
    /// Human-readable description
    pub detail: String,
    /// Whether the statement calls for automatic containment
    pub containment: bool,
    /// Deduplication key for time-based patterns (activation or case id)
    pub reference: Option<String>,
    /// When the anomaly was detected
    pub detected_at: DateTime<Utc>,
}

impl WitnessStatement {
    pub(crate) fn new(
        subject_id: impl Into<String>,
        subject_kind: SubjectKind,
        kind: ViolationKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            subject_id: subject_id.into(),
            subject_kind,
            kind,
            severity: kind.severity(),
            evidence: Vec::new(),
            detail: detail.into(),
            containment: false,
            reference: None,
            detected_at: Utc::now(),
        }
    }

    pub(crate) fn with_evidence(mut self, evidence: EvidenceRef) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub(crate) fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Mark for containment when severe enough and aimed at a task.
    pub(crate) fn contain_at(mut self, threshold: Severity) -> Self {
        self.containment = self.subject_kind == SubjectKind::Task && self.severity.at_least(threshold);
        self
    }
}
