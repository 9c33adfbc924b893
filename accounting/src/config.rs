//! Accounting settings.

use serde::{Deserialize, Serialize};

/// Legitimacy ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegitimacyConfig {
    /// Minor decay events within one cycle that force a one-band decay
    pub minor_decay_threshold: u32,
    /// Consecutive clean cycles required to recover one band
    pub recovery_clean_cycles: u32,
    /// Time allowed to complete a remedy before it counts as ignored (seconds)
    pub remedy_deadline_secs: u64,
}

impl Default for LegitimacyConfig {
    fn default() -> Self {
        Self {
            minor_decay_threshold: 3,
            recovery_clean_cycles: 3,
            remedy_deadline_secs: 14 * 24 * 3600, // 14 days
        }
    }
}

/// Capacity ledger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Time until a deferral must be reviewed (seconds)
    pub deferral_review_secs: u64,
    /// Deferral count at which a subject is escalated
    pub escalation_count: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            deferral_review_secs: 7 * 24 * 3600, // 7 days
            escalation_count: 3,
        }
    }
}
