//! Capacity Ledger.
//!
//! Records declared capacity from four sources, claims against it, and the
//! deferrals produced when a claim cannot be met. Idle capacity is recorded
//! at every cycle close so false scarcity leaves a trace.

pub mod ledger;
pub mod types;

pub use ledger::{CapacityLedger, CAPACITY_LEDGER, INSUFFICIENT_CAPACITY};
pub use types::{
    CapacityEntry, CapacitySource, CapacityState, CapacitySummary, CapacityView, Claim,
    ClaimOutcome, Declaration, Deferral, IdleRecord, Lapse, Shortfall,
};
