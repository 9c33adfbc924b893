//! Configuration for the governance engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use accounting::{CapacityConfig, LegitimacyConfig};
use charter::{RetryPolicy, Severity, MAX_WINDOW_SECS};

use crate::types::{EngineError, Result};

/// Configuration for a governance engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Agenda configuration
    pub agenda: AgendaConfig,
    /// Enforcement configuration
    pub enforcement: EnforcementConfig,
    /// Legitimacy ledger configuration
    pub legitimacy: LegitimacyConfig,
    /// Capacity ledger configuration
    pub capacity: CapacityConfig,
    /// Ledger durability configuration
    pub ledger: LedgerConfig,
    /// General settings
    pub general: GeneralConfig,
}

impl EngineConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Load and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let panel = self.enforcement.panel_size;
        if panel != 3 && panel != 5 {
            return Err(EngineError::InvalidConfig(format!(
                "enforcement.panel_size must be 3 or 5, got {}",
                panel
            )));
        }
        if self.agenda.realm_quota == 0 {
            return Err(EngineError::InvalidConfig(
                "agenda.realm_quota must be at least 1".to_string(),
            ));
        }
        if self.agenda.mandatory_review_interval == 0 {
            return Err(EngineError::InvalidConfig(
                "agenda.mandatory_review_interval must be at least 1".to_string(),
            ));
        }
        if self.legitimacy.minor_decay_threshold == 0 || self.legitimacy.recovery_clean_cycles == 0 {
            return Err(EngineError::InvalidConfig(
                "legitimacy thresholds must be at least 1".to_string(),
            ));
        }
        let windows = [
            ("enforcement.review_sla_secs", self.enforcement.review_sla_secs),
            ("enforcement.appeal_window_secs", self.enforcement.appeal_window_secs),
            (
                "enforcement.default_response_window_secs",
                self.enforcement.default_response_window_secs,
            ),
            ("legitimacy.remedy_deadline_secs", self.legitimacy.remedy_deadline_secs),
            ("capacity.deferral_review_secs", self.capacity.deferral_review_secs),
        ];
        let level = self.general.log_level.to_ascii_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off") {
            return Err(EngineError::InvalidConfig(format!(
                "general.log_level must be a tracing level, got {}",
                self.general.log_level
            )));
        }
        for (name, secs) in windows {
            if secs == 0 || secs > MAX_WINDOW_SECS {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be between 1 and {} seconds, got {}",
                    name, MAX_WINDOW_SECS, secs
                )));
            }
        }
        Ok(())
    }
}

/// Agenda configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgendaConfig {
    /// Items per cycle when no program-slot capacity is declared
    pub cycle_capacity: usize,
    /// New motions scheduled per realm per cycle
    pub realm_quota: usize,
    /// Deferral count that escalates a motion to Band 1
    pub escalation_threshold: u32,
    /// Cycles between periodic mandatory reviews
    pub mandatory_review_interval: u64,
    /// Consecutive cycles of Band 0 overflow before saturation is escalated
    pub band0_saturation_cycles: u32,
    /// Cycles an informational item may be carried over before it is dropped
    pub informational_carry_limit: u32,
}

impl Default for AgendaConfig {
    fn default() -> Self {
        Self {
            cycle_capacity: 12,
            realm_quota: 1,
            escalation_threshold: 3,
            mandatory_review_interval: 4,
            band0_saturation_cycles: 2,
            informational_carry_limit: 3,
        }
    }
}

/// Enforcement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Statements at or above this severity trigger containment
    pub containment_severity: Severity,
    /// Review panel size (3 or 5)
    pub panel_size: usize,
    /// Time allowed for a contained case to be reviewed (seconds)
    pub review_sla_secs: u64,
    /// Time allowed to appeal a finding (seconds)
    pub appeal_window_secs: u64,
    /// Activation response window when none is given (seconds)
    pub default_response_window_secs: u64,
    /// Seed for panel draws (entropy when unset)
    pub panel_seed: Option<u64>,
}

impl EnforcementConfig {
    /// Response window given to activations drafted by the engine.
    pub fn response_window(&self) -> chrono::Duration {
        charter::window(self.default_response_window_secs)
    }
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            containment_severity: Severity::High,
            panel_size: 3,
            review_sla_secs: 72 * 3600, // 72 hours
            appeal_window_secs: 7 * 24 * 3600, // 7 days
            default_response_window_secs: 48 * 3600, // 48 hours
            panel_seed: None,
        }
    }
}

/// Ledger durability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Retries after a failed sink write
    pub sink_retry_attempts: u32,
    /// Delay between retries (ms)
    pub sink_retry_delay_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sink_retry_attempts: 3,
            sink_retry_delay_ms: 50,
        }
    }
}

impl LedgerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.sink_retry_attempts,
            delay: Duration::from_millis(self.sink_retry_delay_ms),
        }
    }
}

/// General configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name of the deliberative body
    pub body_name: String,
    /// Log level
    pub log_level: String,
    /// Lifecycle events buffered for subscribers
    pub event_buffer: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            body_name: "conclave".to_string(),
            log_level: "info".to_string(),
            event_buffer: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.agenda.cycle_capacity, 12);
        assert_eq!(config.agenda.realm_quota, 1);
        assert_eq!(config.enforcement.panel_size, 3);
        assert_eq!(config.enforcement.containment_severity, Severity::High);
        assert_eq!(config.legitimacy.minor_decay_threshold, 3);
        assert_eq!(config.capacity.escalation_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = EngineConfig::default();
        config.enforcement.panel_seed = Some(7);
        let yaml = config.to_yaml().unwrap();
        let parsed = EngineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.enforcement.panel_seed, Some(7));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed = EngineConfig::from_yaml("agenda:\n  cycle_capacity: 4\n  realm_quota: 2\n  escalation_threshold: 3\n  mandatory_review_interval: 4\n  band0_saturation_cycles: 2\n").unwrap();
        assert_eq!(parsed.agenda.cycle_capacity, 4);
        assert_eq!(parsed.enforcement.panel_size, 3);
    }

    #[test]
    fn test_out_of_range_windows_rejected() {
        let mut config = EngineConfig::default();
        config.enforcement.review_sla_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_config");
        assert!(err.to_string().contains("review_sla_secs"));

        let mut config = EngineConfig::default();
        config.capacity.deferral_review_secs = 0;
        assert_eq!(config.validate().unwrap_err().code(), "invalid_config");

        let mut config = EngineConfig::default();
        config.legitimacy.remedy_deadline_secs = MAX_WINDOW_SECS + 1;
        assert_eq!(config.validate().unwrap_err().code(), "invalid_config");
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let mut config = EngineConfig::default();
        config.general.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
        config.general.log_level = "loud".to_string();
        assert_eq!(config.validate().unwrap_err().code(), "invalid_config");
    }

    #[test]
    fn test_response_window_follows_config() {
        let mut config = EngineConfig::default();
        config.enforcement.default_response_window_secs = 3600;
        assert_eq!(config.enforcement.response_window(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_even_panel_rejected() {
        let mut config = EngineConfig::default();
        config.enforcement.panel_size = 4;
        assert_eq!(config.validate().unwrap_err().code(), "invalid_config");
    }
}
