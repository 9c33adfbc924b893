//! Shared vocabulary for the Conclave governance engine.
//!
//! Every other crate in the workspace builds on three things defined here:
//!
//! - **Actors**: records carrying a typed capability set, checked at every
//!   API boundary instead of role subclassing
//! - **Severity**: the ordered scale used by statements and triggers
//! - **Append-only ledgers**: sequenced, digest-sealed records with a
//!   durability sink and a broadcast feed for observers
//!
//! # Example
//!
//! ```
//! use charter::{Actor, Capability, Role};
//!
//! let executor = Actor::new("exec-1", "Field team").with_role(Role::Executor);
//! assert!(executor.can(Capability::ExecuteTask));
//! assert!(executor.require(Capability::AuthorizeTask).is_err());
//! ```

pub mod actor;
pub mod ledger;
pub mod types;

// Re-export main types
pub use actor::{Actor, Capability, CapabilitySet, CharterError, Role};
pub use ledger::{
    AppendOnlyLedger, LedgerError, LedgerRecord, LedgerSink, RecordBody, RetryPolicy, SinkError,
};
pub use types::*;
