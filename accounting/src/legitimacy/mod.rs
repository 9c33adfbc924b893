//! Legitimacy Ledger.
//!
//! Five ordered bands, `stable → strained → eroding → compromised → failed`.
//! Triggers move at most one band, except the catastrophic set which jumps
//! straight to `failed`. Minor triggers accumulate within a cycle. Recovery
//! is one band at a time after sustained clean cycles.

pub mod band;
pub mod entry;
pub mod ledger;
pub mod summary;

pub use band::{BandEffects, LegitimacyBand};
pub use entry::{
    LegitimacyEntry, LegitimacyEntryKind, LegitimacyState, OpenRemedy, TriggerKind, TriggerWeight,
};
pub use ledger::{LegitimacyLedger, LEGITIMACY_LEDGER};
pub use summary::{Highlight, LegitimacySummary, LegitimacyView};
