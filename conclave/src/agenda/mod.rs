//! Agenda Controller - bounded, prioritized agendas per governance cycle.
//!
//! Six fixed input queues feed five priority bands:
//!
//! | Band | Queues | Rule |
//! |------|--------|------|
//! | 0 | witness and findings, mandatory reviews | always included, never deferred |
//! | 1 | active blockers, escalated deferrals | outside quota, oldest first |
//! | 2 | deferred motions | outside quota, most-deferred first |
//! | 3 | new motions | per-realm quota |
//! | 4 | informational | spare capacity only |
//!
//! Every deferral is written to the capacity ledger, and every agenda carries
//! a transparency record explaining each inclusion and deferral.

mod controller;
mod gate;
mod item;
mod transparency;

pub use controller::{
    AgendaController, CAPACITY_CRISIS, CYCLE_CAPACITY_EXHAUSTED, INFORMATIONAL_EXPIRED,
    REALM_QUOTA_EXCEEDED,
};
pub use gate::{Admission, AdmissionGate, AdmissionRecord, MotionDraft};
pub use item::{AgendaItem, AgendaQueue, ItemSource, PriorityBand};
pub use transparency::{
    Agenda, CapacityBasis, CarryOver, DeferralNote, Inclusion, InclusionReason, PublicAgendaSummary,
    PublicItem, RealmUsage, SaturationEscalation, TransparencyRecord,
};
