//! Error types for legitimacy and capacity accounting.

use charter::{CharterError, LedgerError};

/// Errors that can occur while recording accounting facts.
#[derive(Debug, thiserror::Error)]
pub enum AccountingError {
    /// Malformed declaration, claim or acknowledgment
    #[error("Validation failed ({code}): {detail}")]
    Validation { code: &'static str, detail: String },

    /// Declaration does not exist
    #[error("Declaration not found: {0}")]
    UnknownDeclaration(String),

    /// Remedy does not exist or is already closed
    #[error("Remedy not open: {0}")]
    UnknownRemedy(String),

    /// A ledger entry does not continue the band chain
    #[error("Legitimacy chain broken at seq {seq}: expected {expected}, found {found}")]
    ChainBroken {
        seq: u64,
        expected: String,
        found: String,
    },

    /// Capability check failed
    #[error(transparent)]
    Charter(#[from] CharterError),

    /// Fact could not be durably recorded
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl AccountingError {
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
            AccountingError::Validation { code, .. } => *code,
            AccountingError::UnknownDeclaration(_) => "unknown_declaration",
            AccountingError::UnknownRemedy(_) => "unknown_remedy",
            AccountingError::ChainBroken { .. } => "chain_broken",
            AccountingError::Charter(e) => e.code(),
            AccountingError::Ledger(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AccountingError>;
