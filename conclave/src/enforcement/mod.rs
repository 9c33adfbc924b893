//! Enforcement Pipeline - detection, containment, review and appeal.
//!
//! The stages are strictly separated:
//!
//! 1. **Detector**: reads the lifecycle stream, appends witness statements
//! 2. **Containment**: places and lifts reversible holds named by statement id
//! 3. **Review**: conflict-free random panels issue findings on three axes
//! 4. **Appeal**: one appeal per finding, fresh panel, final ruling
//!
//! No stage performs another's function; the engine wires them together.

mod appeal;
mod containment;
mod detector;
mod review;
mod statement;

pub use appeal::{AppealGrounds, FinalFinding, GroundsKind};
pub use containment::{ContainmentRecord, ContainmentRegistry, ContainmentStatus};
pub use detector::{Detector, ReportedRef, WITNESS_LEDGER};
pub use review::{
    median_finding, AxisAssessment, AxisTally, CaseKind, CaseStatus, Disposition, Finding,
    IssuedFinding, Opinion, OpinionDraft, OpinionOutcome, Remedy, ReviewBoard, ReviewCase,
};
pub use statement::{EvidenceRef, SubjectKind, ViolationKind, WitnessStatement};
