//! Conclave - governance coordination engine.
//!
//! Moves delegated work through an auditable lifecycle, schedules what gets
//! deliberated, detects and contains procedural violations, and accounts for
//! the system's legitimacy and capacity:
//!
//! - **Enforcement**: detector, containment, review panels, one bounded appeal
//! - **Agenda**: six queues, five bands, realm quotas, transparency records
//! - **Engine**: the coordinator with the single `advance_cycle` entry point
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        GovernanceEngine                          │
//! │                                                                  │
//! │  TaskRegistry ──history──▶ Detector ──statements──▶ Containment  │
//! │       ▲                        │                        │        │
//! │       │                        ▼                        ▼        │
//! │       └──── release/nullify ◀── ReviewBoard ◀── referral          │
//! │                                    │                              │
//! │                       findings ────┼──▶ LegitimacyLedger          │
//! │                                    ▼                              │
//! │  CapacityLedger ──deferrals──▶ AgendaController ◀── motions       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod agenda;
pub mod config;
pub mod enforcement;
pub mod engine;
pub mod journal;
pub mod types;

// Re-export main types
pub use config::EngineConfig;
pub use engine::{CycleReport, EngineBuilder, EngineEvent, GovernanceEngine};
pub use journal::JsonlSink;
pub use types::*;
