//! Public and internal legitimacy views.

use serde::{Deserialize, Serialize};

use charter::{CycleNumber, LedgerRecord};

use super::band::{BandEffects, LegitimacyBand};
use super::entry::{LegitimacyEntry, LegitimacyEntryKind, LegitimacyState};

/// A band change and what caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub seq: u64,
    pub cycle: CycleNumber,
    pub band_before: LegitimacyBand,
    pub band_after: LegitimacyBand,
    /// Trigger name or entry kind
    pub cause: String,
}

impl Highlight {
    pub(crate) fn from_entry(seq: u64, entry: &LegitimacyEntry) -> Self {
        let cause = match &entry.kind {
            LegitimacyEntryKind::Trigger { trigger, .. } => trigger.as_str(),
            kind => kind.as_str(),
        };
        Self {
            seq,
            cycle: entry.cycle,
            band_before: entry.band_before,
            band_after: entry.band_after,
            cause: cause.to_string(),
        }
    }
}

/// Redacted public summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegitimacySummary {
    /// Current band
    pub band: LegitimacyBand,
    /// Its mechanical effects
    pub effects: BandEffects,
    /// Number of remedies still open
    pub open_remedies: usize,
    /// Most recent band changes
    pub highlights: Vec<Highlight>,
}

/// Full internal view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegitimacyView {
    /// Folded state
    pub state: LegitimacyState,
    /// Every ledger record in sequence order
    pub records: Vec<LedgerRecord<LegitimacyEntry>>,
}
