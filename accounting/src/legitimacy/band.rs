//! Legitimacy bands and their mechanical side effects.

use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Operating legitimacy, ordered from healthiest to failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum LegitimacyBand {
    Stable = 0,
    Strained = 1,
    Eroding = 2,
    Compromised = 3,
    Failed = 4,
}

impl Default for LegitimacyBand {
    fn default() -> Self {
        Self::Stable
    }
}

impl LegitimacyBand {
    /// One band worse. `failed` stays `failed`.
    pub fn decayed(&self) -> Self {
        match self {
            Self::Stable => Self::Strained,
            Self::Strained => Self::Eroding,
            Self::Eroding => Self::Compromised,
            Self::Compromised | Self::Failed => Self::Failed,
        }
    }

    /// One band better. `failed` is absorbing.
    pub fn recovered(&self) -> Self {
        match self {
            Self::Stable | Self::Strained => Self::Stable,
            Self::Eroding => Self::Strained,
            Self::Compromised => Self::Eroding,
            Self::Failed => Self::Failed,
        }
    }

    pub fn is_absorbing(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether the band must be acknowledged by the deliberative body.
    pub fn requires_acknowledgment(&self) -> bool {
        *self >= Self::Strained
    }

    /// Side effects of this band, given whether it has been acknowledged.
    pub fn effects(&self, acknowledged: bool) -> BandEffects {
        BandEffects {
            forced_acknowledgment: self.requires_acknowledgment() && !acknowledged,
            mandatory_review_each_cycle: *self >= Self::Eroding,
            authorization_paused: match self {
                Self::Compromised => !acknowledged,
                Self::Failed => true,
                _ => false,
            },
            cessation_required: *self == Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Strained => "strained",
            Self::Eroding => "eroding",
            Self::Compromised => "compromised",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LegitimacyBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mechanical consequences of the current band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandEffects {
    /// An acknowledgment item is forced into the agenda
    pub forced_acknowledgment: bool,
    /// A mandatory review item is forced into Band 0 every cycle
    pub mandatory_review_each_cycle: bool,
    /// New task authorization is refused
    pub authorization_paused: bool,
    /// The system must cease operating
    pub cessation_required: bool,
}
