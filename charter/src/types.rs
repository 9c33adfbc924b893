//! Core types shared across the workspace.

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Deliberation cycle number. Cycle 0 is the bootstrap cycle before the
/// first `advance_cycle` call.
pub type CycleNumber = u64;

/// Longest window any setting may name: one hundred years.
pub const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

/// A window in seconds as a duration, clamped to [`MAX_WINDOW_SECS`].
pub fn window(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Generate a fresh record identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Severity of a violation, trigger or constraint breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth noting
    Low = 0,
    /// Requires attention
    Medium = 1,
    /// Immediate containment
    High = 2,
    /// Integrity of the system itself is in question
    Critical = 3,
}

impl Severity {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Whether this severity meets or exceeds a threshold.
    pub fn at_least(&self, threshold: Severity) -> bool {
        *self >= threshold
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High.at_least(Severity::High));
        assert!(!Severity::Medium.at_least(Severity::High));
    }

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(window(90), chrono::Duration::seconds(90));
        assert_eq!(window(u64::MAX), window(MAX_WINDOW_SECS));
    }

    #[test]
    fn test_severity_serialization() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }
}
