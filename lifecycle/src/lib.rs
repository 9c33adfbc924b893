//! Task Lifecycle - the canonical state machine for delegated work.
//!
//! ```text
//! authorized → activated → routed → accepted → in_progress → reported → aggregated → completed
//!                  ▲          │                      │            │           │
//!                  └─ declined ◄┘                     └────────────┴───────────┴──► quarantined → nullified
//!                                                          (release restores the previous state)
//! ```
//!
//! - [`TaskRegistry`]: owns every task independently under optimistic
//!   versioning and writes the task-history ledger
//! - [`ActivationRecord`] / [`ResultRecord`]: the executor-facing contracts
//! - [`EligibilityBook`]: executor weighting, moved only by reported outcomes
//! - [`LifecycleEvent`]: the observable transition stream

pub mod contract;
pub mod eligibility;
pub mod event;
pub mod registry;
pub mod state;
pub mod task;
pub mod types;

// Re-export main types
pub use contract::{
    ActivationRecord, Constraint, ConstraintKind, ConstraintSeverity, Deliverable, Issue,
    IssueKind, ResponsePolicy, ResultRecord, ResultStatus, SuccessDefinition,
};
pub use eligibility::EligibilityBook;
pub use event::{LifecycleEvent, LifecycleEventKind, RejectionKind, RoutingMode, TransitionCause};
pub use registry::{OverdueTask, TaskRegistry, CONTAINMENT_AUTHORITY, HISTORY_LEDGER};
pub use state::{is_valid_walk, TaskState, TRANSITIONS};
pub use task::{Acceptance, QuarantineHold, Routing, StateChange, Task};
pub use types::{LifecycleError, Result};
