//! Error types for the governance engine.

use accounting::{AccountingError, LegitimacyBand};
use charter::{CharterError, LedgerError};
use lifecycle::LifecycleError;

/// Errors raised by the enforcement pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    /// Statement does not exist
    #[error("Witness statement not found: {0}")]
    StatementNotFound(String),

    /// Case does not exist
    #[error("Review case not found: {0}")]
    CaseNotFound(String),

    /// No hold exists for the statement
    #[error("No containment recorded for statement {0}")]
    NotContained(String),

    /// Not enough unconflicted reviewers for a panel
    #[error("Panel needs {needed} unconflicted reviewers, only {eligible} eligible")]
    InsufficientPanel { needed: usize, eligible: usize },

    /// Reviewer is not on the case's panel
    #[error("Reviewer {reviewer_id} is not on the panel for case {case_id}")]
    NotPanelMember { case_id: String, reviewer_id: String },

    /// Reviewer already gave an opinion
    #[error("Reviewer {reviewer_id} already submitted an opinion on case {case_id}")]
    OpinionAlreadySubmitted { case_id: String, reviewer_id: String },

    /// The case's finding has already been issued
    #[error("Case {0} has already issued its finding")]
    FindingIssued(String),

    /// A case is already open for the statement
    #[error("Statement {0} is already under review")]
    AlreadyUnderReview(String),

    /// Appeal refused
    #[error("Appeal rejected ({code}): {detail}")]
    AppealRejected { code: &'static str, detail: String },

    /// Opinion malformed
    #[error("Validation failed ({code}): {detail}")]
    Validation { code: &'static str, detail: String },

    #[error(transparent)]
    Charter(#[from] CharterError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EnforcementError {
    pub fn appeal(code: &'static str, detail: impl Into<String>) -> Self {
        Self::AppealRejected {
            code,
            detail: detail.into(),
        }
    }

    /// Stable failure code.
    pub fn code(&self) -> &'static str {
        match self {
            EnforcementError::StatementNotFound(_) => "statement_not_found",
            EnforcementError::CaseNotFound(_) => "case_not_found",
            EnforcementError::NotContained(_) => "not_contained",
            EnforcementError::InsufficientPanel { .. } => "insufficient_panel",
            EnforcementError::NotPanelMember { .. } => "not_panel_member",
            EnforcementError::OpinionAlreadySubmitted { .. } => "opinion_already_submitted",
            EnforcementError::FindingIssued(_) => "finding_issued",
            EnforcementError::AlreadyUnderReview(_) => "already_under_review",
            EnforcementError::AppealRejected { code, .. } => *code,
            EnforcementError::Validation { code, .. } => *code,
            EnforcementError::Charter(e) => e.code(),
            EnforcementError::Lifecycle(e) => e.code(),
            EnforcementError::Ledger(e) => e.code(),
        }
    }
}

/// Errors raised by the agenda controller.
#[derive(Debug, thiserror::Error)]
pub enum AgendaError {
    /// Submission refused at the admission gate
    #[error("Submission rejected ({code}): {detail}")]
    Rejected { code: String, detail: String },

    /// Another agenda generation is running
    #[error("Agenda generation already running for cycle {0}")]
    CycleInProgress(u64),

    #[error(transparent)]
    Charter(#[from] CharterError),

    #[error(transparent)]
    Accounting(#[from] AccountingError),
}

impl AgendaError {
    pub fn code(&self) -> &str {
        match self {
            AgendaError::Rejected { code, .. } => code,
            AgendaError::CycleInProgress(_) => "cycle_in_progress",
            AgendaError::Charter(e) => e.code(),
            AgendaError::Accounting(e) => e.code(),
        }
    }
}

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Legitimacy band has paused new task authorization
    #[error("Task authorization paused while legitimacy is {0} and unacknowledged")]
    AuthorizationPaused(LegitimacyBand),

    /// Legitimacy has failed
    #[error("Legitimacy has failed; operation requires cessation")]
    CessationRequired,

    /// A statement against the task has not yet been contained or referred
    #[error("Task {task_id} is awaiting containment for statement {statement_id}")]
    ContainmentPending { task_id: String, statement_id: String },

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Charter(#[from] CharterError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error(transparent)]
    Enforcement(#[from] EnforcementError),

    #[error(transparent)]
    Agenda(#[from] AgendaError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Stable failure code.
    pub fn code(&self) -> &str {
        match self {
            EngineError::AuthorizationPaused(_) => "authorization_paused",
            EngineError::CessationRequired => "cessation_required",
            EngineError::ContainmentPending { .. } => "containment_pending",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::ConfigParse(_) => "config_parse",
            EngineError::Io(_) => "io",
            EngineError::Charter(e) => e.code(),
            EngineError::Lifecycle(e) => e.code(),
            EngineError::Accounting(e) => e.code(),
            EngineError::Enforcement(e) => e.code(),
            EngineError::Agenda(e) => e.code(),
            EngineError::Ledger(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
