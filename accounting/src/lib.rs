//! Legitimacy and capacity accounting.
//!
//! Both ledgers follow the same shape: an [`charter::AppendOnlyLedger`] holds
//! every fact, and the "current" value (band, open deferrals, available
//! units) is a fold over those facts. Writers go through a reducer that
//! computes the next entry from the folded state, appends it, and only then
//! applies it. Nothing writes the folded state directly.
//!
//! - [`legitimacy`]: five ordered bands with decay, recovery and side effects
//! - [`capacity`]: declarations, claims, deferrals, lapses and idle capacity

pub mod capacity;
pub mod config;
pub mod legitimacy;
pub mod types;

// Re-export main types
pub use capacity::{
    CapacityEntry, CapacityLedger, CapacitySource, CapacityState, CapacitySummary, Claim,
    ClaimOutcome, Declaration, Deferral, IdleRecord, Lapse, Shortfall,
};
pub use config::{CapacityConfig, LegitimacyConfig};
pub use legitimacy::{
    BandEffects, LegitimacyBand, LegitimacyEntry, LegitimacyEntryKind, LegitimacyLedger,
    LegitimacyState, LegitimacySummary, OpenRemedy, TriggerKind, TriggerWeight,
};
pub use types::{AccountingError, Result};
