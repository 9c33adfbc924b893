//! Detection stage - a continuous observer over the task-history ledger.
//!
//! The detector reads lifecycle events past its cursor, matches them
//! against the defined anomaly patterns and appends a [`WitnessStatement`]
//! for each match. It never touches task state; containment is a separate
//! stage acting on the statements it leaves behind.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use charter::{AppendOnlyLedger, LedgerRecord, Severity};
use lifecycle::{
    LifecycleEvent, LifecycleEventKind, OverdueTask, RejectionKind, RoutingMode, TransitionCause,
};

use super::statement::{EvidenceRef, SubjectKind, ViolationKind, WitnessStatement};
use crate::types::EnforcementError;

/// Name of the witness-statement ledger.
pub const WITNESS_LEDGER: &str = "witness";

type Record = Arc<LedgerRecord<WitnessStatement>>;

/// What a time-based report was made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedRef {
    /// An activation of this task went unanswered
    Silence { task_id: String },
    /// The hold named by this statement missed its review SLA
    ReviewOverdue { statement_id: String },
}

/// Pattern matcher over the lifecycle event stream.
pub struct Detector {
    /// Statements emitted so far
    witness: Arc<AppendOnlyLedger<WitnessStatement>>,
    /// Lifecycle events under observation
    history: Arc<AppendOnlyLedger<LifecycleEvent>>,
    /// Last history seq inspected
    cursor: Mutex<u64>,
    /// References already reported by time-based patterns
    reported: DashMap<String, ReportedRef>,
    /// Statements at or above this severity call for containment
    containment_severity: Severity,
}

impl Detector {
    pub fn new(
        witness: Arc<AppendOnlyLedger<WitnessStatement>>,
        history: Arc<AppendOnlyLedger<LifecycleEvent>>,
        containment_severity: Severity,
    ) -> Self {
        let reported = DashMap::new();
        for statement in witness.entries() {
            let Some(reference) = statement.reference else {
                continue;
            };
            let subject = match statement.kind {
                ViolationKind::SilenceTimeout => ReportedRef::Silence {
                    task_id: statement.subject_id,
                },
                _ => ReportedRef::ReviewOverdue {
                    statement_id: reference
                        .strip_prefix("review:")
                        .unwrap_or(&reference)
                        .to_string(),
                },
            };
            reported.insert(reference, subject);
        }
        Self {
            witness,
            history,
            cursor: Mutex::new(0),
            reported,
            containment_severity,
        }
    }

    pub fn witness_ledger(&self) -> Arc<AppendOnlyLedger<WitnessStatement>> {
        Arc::clone(&self.witness)
    }

    /// Look up a statement by id.
    pub fn statement(&self, statement_id: &str) -> Result<WitnessStatement, EnforcementError> {
        self.witness
            .entries()
            .into_iter()
            .find(|s| s.id == statement_id)
            .ok_or_else(|| EnforcementError::StatementNotFound(statement_id.to_string()))
    }

    /// Every statement recorded so far.
    pub fn statements(&self) -> Vec<WitnessStatement> {
        self.witness.entries()
    }

    async fn emit(&self, statement: WitnessStatement) -> Result<Record, EnforcementError> {
        let statement = statement.contain_at(self.containment_severity);
        let record = self.witness.append(statement).await?;
        if let Some(s) = record.entry() {
            warn!(
                statement_id = %s.id,
                subject_id = %s.subject_id,
                kind = s.kind.as_str(),
                severity = s.severity.as_str(),
                containment = s.containment,
                seq = record.seq,
                "Witness statement recorded"
            );
        }
        Ok(record)
    }

    /// Inspect every lifecycle event recorded since the last scan.
    ///
    /// The cursor only advances past an event once all of its statements
    /// are recorded.
    pub async fn scan(&self) -> Result<Vec<WitnessStatement>, EnforcementError> {
        let mut cursor = self.cursor.lock().await;
        let mut emitted = Vec::new();

        for record in self.history.since(*cursor) {
            if let Some(event) = record.entry() {
                for statement in self.inspect(record.seq, event) {
                    let written = self.emit(statement).await?;
                    if let Some(s) = written.entry() {
                        emitted.push(s.clone());
                    }
                }
            }
            *cursor = record.seq;
        }

        if !emitted.is_empty() {
            debug!(cursor = *cursor, statements = emitted.len(), "Detector scan complete");
        }
        Ok(emitted)
    }

    fn inspect(&self, seq: u64, event: &LifecycleEvent) -> Vec<WitnessStatement> {
        let evidence = EvidenceRef::new(self.history.name(), seq);
        let task = |kind: ViolationKind, detail: String| {
            WitnessStatement::new(&event.task_id, SubjectKind::Task, kind, detail)
                .with_evidence(evidence.clone())
        };

        match &event.kind {
            LifecycleEventKind::Rejected {
                from,
                attempted,
                rejection,
                detail,
            } => {
                let kind = match rejection {
                    RejectionKind::InvalidTransition => ViolationKind::InvalidTransition,
                    RejectionKind::MissingAcceptance => ViolationKind::BypassedAcceptance,
                    RejectionKind::ResultWithoutProvenance => ViolationKind::ResultInjection,
                    _ => return Vec::new(),
                };
                vec![task(
                    kind,
                    format!(
                        "{} attempted {} -> {}: {}",
                        event.actor_id, from, attempted, detail
                    ),
                )]
            }
            LifecycleEventKind::Transitioned { cause, .. } => match cause {
                TransitionCause::Routing {
                    executors,
                    mode: RoutingMode::Automatic,
                } => vec![task(
                    ViolationKind::AutoRouted,
                    format!("routed to {} without a routing decision", executors.join(", ")),
                )],
                TransitionCause::Start { acceptance_seq } => {
                    if self.acceptance_matches(*acceptance_seq, event) {
                        Vec::new()
                    } else {
                        vec![task(
                            ViolationKind::BypassedAcceptance,
                            format!(
                                "{} started work citing seq {} which records no acceptance by them",
                                event.actor_id, acceptance_seq
                            ),
                        )
                        .with_evidence(EvidenceRef::new(self.history.name(), *acceptance_seq))]
                    }
                }
                TransitionCause::Report {
                    undeclared_deliverables,
                    ..
                } if !undeclared_deliverables.is_empty() => vec![task(
                    ViolationKind::ScopeDrift,
                    format!(
                        "deliverables outside the success definition: {}",
                        undeclared_deliverables.join(", ")
                    ),
                )],
                _ => Vec::new(),
            },
            LifecycleEventKind::DeclineRecorded { .. } => Vec::new(),
        }
    }

    /// Whether `seq` records an acceptance of the same task by the same actor.
    fn acceptance_matches(&self, seq: u64, start: &LifecycleEvent) -> bool {
        let Some(record) = self.history.get(seq) else {
            return false;
        };
        let Some(event) = record.entry() else {
            return false;
        };
        matches!(
            &event.kind,
            LifecycleEventKind::Transitioned {
                cause: TransitionCause::Acceptance { executor_id },
                ..
            } if executor_id == &start.actor_id && event.task_id == start.task_id
        )
    }

    /// Claim a reference for reporting; false if it was already reported.
    fn mark(&self, reference: &str, subject: ReportedRef) -> bool {
        match self.reported.entry(reference.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(subject);
                true
            }
        }
    }

    /// References reported by time-based patterns, with what they concern.
    pub fn reported(&self) -> Vec<(String, ReportedRef)> {
        self.reported
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Drop references whose pattern can no longer recur.
    pub fn forget(&self, references: &[String]) {
        for reference in references {
            self.reported.remove(reference);
        }
        if !references.is_empty() {
            debug!(forgotten = references.len(), remaining = self.reported.len(), "Reported references pruned");
        }
    }

    /// Report an activation left unanswered past its window. Once per activation.
    pub async fn silence(&self, overdue: &OverdueTask) -> Result<Option<WitnessStatement>, EnforcementError> {
        let subject = ReportedRef::Silence {
            task_id: overdue.task_id.clone(),
        };
        if !self.mark(&overdue.activation_id, subject) {
            return Ok(None);
        }
        let statement = WitnessStatement::new(
            &overdue.task_id,
            SubjectKind::Task,
            ViolationKind::SilenceTimeout,
            format!(
                "no executor response while {} since the deadline {}",
                overdue.state,
                overdue.deadline.to_rfc3339()
            ),
        )
        .with_reference(&overdue.activation_id);
        self.emit_referenced(statement, &overdue.activation_id).await
    }

    /// Report a contained task whose case missed the review SLA. Once per statement.
    pub async fn review_overdue(
        &self,
        statement_id: &str,
        case_id: Option<&str>,
    ) -> Result<Option<WitnessStatement>, EnforcementError> {
        let reference = format!("review:{}", statement_id);
        let subject = ReportedRef::ReviewOverdue {
            statement_id: statement_id.to_string(),
        };
        if !self.mark(&reference, subject) {
            return Ok(None);
        }
        let subject = case_id.unwrap_or(statement_id);
        let detail = match case_id {
            Some(case_id) => format!("case {} has not issued a finding on {}", case_id, statement_id),
            None => format!("no panel has been seated for {}", statement_id),
        };
        let statement = WitnessStatement::new(subject, SubjectKind::Case, ViolationKind::ReviewOverdue, detail)
            .with_reference(&reference);
        self.emit_referenced(statement, &reference).await
    }

    async fn emit_referenced(
        &self,
        statement: WitnessStatement,
        reference: &str,
    ) -> Result<Option<WitnessStatement>, EnforcementError> {
        match self.emit(statement).await {
            Ok(record) => Ok(record.entry().cloned()),
            Err(e) => {
                // Allow the next sweep to try again.
                self.reported.remove(reference);
                Err(e)
            }
        }
    }

    /// Report altered records found by a ledger audit.
    pub async fn tampering(&self, ledger: &str, seqs: &[u64]) -> Result<WitnessStatement, EnforcementError> {
        let mut statement = WitnessStatement::new(
            ledger,
            SubjectKind::Ledger,
            ViolationKind::LedgerTampering,
            format!("{} record(s) no longer match their sealed digest", seqs.len()),
        );
        for seq in seqs {
            statement = statement.with_evidence(EvidenceRef::new(ledger, *seq));
        }
        let record = self.emit(statement).await?;
        record
            .entry()
            .cloned()
            .ok_or_else(|| EnforcementError::StatementNotFound(format!("{}#{}", WITNESS_LEDGER, record.seq)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter::{Actor, Role};
    use chrono::Duration;
    use lifecycle::{ActivationRecord, TaskRegistry, HISTORY_LEDGER};

    fn detector(registry: &TaskRegistry) -> Detector {
        Detector::new(
            Arc::new(AppendOnlyLedger::new(WITNESS_LEDGER)),
            registry.history_ledger(),
            Severity::High,
        )
    }

    #[tokio::test]
    async fn test_auto_routing_is_witnessed() {
        let registry = TaskRegistry::new();
        let detector = detector(&registry);
        let delegator = Actor::new("delegator", "Delegator").with_role(Role::Delegator);
        let router = Actor::new("router", "Router").with_role(Role::Router);

        let task = registry.authorize(&delegator, "Survey").await.unwrap();
        let activation = ActivationRecord::new(&task.id, "Survey", Duration::hours(4)).with_deliverable("report");
        let task = registry.activate(&delegator, &task.id, task.version, activation).await.unwrap();
        registry
            .route(&router, &task.id, task.version, vec!["exec-1".into()], RoutingMode::Automatic)
            .await
            .unwrap();

        let statements = detector.scan().await.unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].kind, ViolationKind::AutoRouted);
        assert!(!statements[0].containment);
        assert_eq!(statements[0].evidence[0].ledger, HISTORY_LEDGER);

        // Nothing new on a second pass.
        assert!(detector.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_start_is_bypassed_acceptance() {
        let registry = TaskRegistry::new();
        let detector = detector(&registry);
        let delegator = Actor::new("delegator", "Delegator").with_role(Role::Delegator);
        let router = Actor::new("router", "Router").with_role(Role::Router);
        let executor = Actor::new("exec-1", "Executor").with_role(Role::Executor);

        let task = registry.authorize(&delegator, "Survey").await.unwrap();
        let activation = ActivationRecord::new(&task.id, "Survey", Duration::hours(4)).with_deliverable("report");
        let task = registry.activate(&delegator, &task.id, task.version, activation).await.unwrap();
        let task = registry
            .route(&router, &task.id, task.version, vec!["exec-1".into()], RoutingMode::Explicit)
            .await
            .unwrap();
        assert!(registry.start(&executor, &task.id, task.version).await.is_err());

        let statements = detector.scan().await.unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].kind, ViolationKind::BypassedAcceptance);
        assert_eq!(statements[0].severity, Severity::High);
        assert!(statements[0].containment);
    }

    #[tokio::test]
    async fn test_silence_reported_once_per_activation() {
        let registry = TaskRegistry::new();
        let detector = detector(&registry);
        let overdue = OverdueTask {
            task_id: "task-1".into(),
            state: lifecycle::TaskState::Routed,
            activation_id: "act-1".into(),
            deadline: chrono::Utc::now(),
        };
        assert!(detector.silence(&overdue).await.unwrap().is_some());
        assert!(detector.silence(&overdue).await.unwrap().is_none());
        assert_eq!(detector.statements().len(), 1);
        assert_eq!(
            detector.reported(),
            vec![(
                "act-1".to_string(),
                ReportedRef::Silence {
                    task_id: "task-1".into()
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_references_restored_and_forgotten() {
        let registry = TaskRegistry::new();
        let detector = detector(&registry);
        let overdue = OverdueTask {
            task_id: "task-1".into(),
            state: lifecycle::TaskState::Routed,
            activation_id: "act-1".into(),
            deadline: chrono::Utc::now(),
        };
        detector.silence(&overdue).await.unwrap();
        detector.review_overdue("stmt-1", None).await.unwrap();

        let restored = Detector::new(detector.witness_ledger(), registry.history_ledger(), Severity::High);
        let mut references = restored.reported();
        references.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(references.len(), 2);
        assert_eq!(
            references[1].1,
            ReportedRef::ReviewOverdue {
                statement_id: "stmt-1".into()
            }
        );

        restored.forget(&["act-1".to_string()]);
        assert_eq!(restored.reported().len(), 1);
        assert!(restored.silence(&overdue).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tampering_is_critical_and_uncontained() {
        let registry = TaskRegistry::new();
        let detector = detector(&registry);
        let statement = detector.tampering(WITNESS_LEDGER, &[3, 4]).await.unwrap();
        assert_eq!(statement.kind, ViolationKind::LedgerTampering);
        assert_eq!(statement.severity, Severity::Critical);
        assert_eq!(statement.evidence.len(), 2);
        assert!(!statement.containment);
        assert_eq!(detector.statement(&statement.id).unwrap().id, statement.id);
    }
}
