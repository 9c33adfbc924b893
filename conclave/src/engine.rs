//! GovernanceEngine - wires the lifecycle, enforcement, agenda and accounting.
//!
//! Every task write is followed by a detector pass, so violations are
//! recorded, contained and referred before the caller sees the result.
//! `advance_cycle` is the single scheduling entry point: it runs the
//! time-based sweeps, generates the agenda once and closes the cycle on
//! both accounting ledgers.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use accounting::{
    BandEffects, CapacityEntry, CapacityLedger, CapacitySource, CapacitySummary, ClaimOutcome,
    Declaration, IdleRecord, Lapse, LegitimacyBand, LegitimacyEntry, LegitimacyLedger,
    LegitimacySummary, Shortfall, TriggerKind, TriggerWeight,
};
use charter::{
    Actor, AppendOnlyLedger, Capability, CharterError, CycleNumber, LedgerRecord, LedgerSink,
    RetryPolicy,
};
use lifecycle::{
    ActivationRecord, LifecycleError, LifecycleEvent, ResultRecord, RoutingMode, Task,
    TaskRegistry, CONTAINMENT_AUTHORITY, HISTORY_LEDGER,
};

use crate::agenda::{
    Agenda, AgendaController, AgendaItem, AgendaQueue, ItemSource, MotionDraft, PublicAgendaSummary,
};
use crate::config::EngineConfig;
use crate::enforcement::{
    AppealGrounds, CaseKind, ContainmentRecord, ContainmentRegistry, Detector, Disposition,
    FinalFinding, Finding, OpinionDraft, OpinionOutcome, ReportedRef, ReviewBoard, ReviewCase,
    SubjectKind, WitnessStatement, WITNESS_LEDGER,
};
use crate::types::{AgendaError, EnforcementError, EngineError, Result};

/// Something observers (renderers, dashboards) may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Statement(WitnessStatement),
    Contained(ContainmentRecord),
    CaseOpened { case_id: String, statement_id: String },
    FindingIssued { case_id: String, finding: Finding },
    FindingFinal(FinalFinding),
    AgendaPublished(PublicAgendaSummary),
    CycleAdvanced { cycle: CycleNumber, band: LegitimacyBand },
}

/// What one call to `advance_cycle` did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: CycleNumber,
    pub agenda: Agenda,
    /// Statements recorded during the cycle's sweeps
    pub statements: Vec<WitnessStatement>,
    /// Findings that became final this cycle
    pub finalized: Vec<FinalFinding>,
    pub lapses: Vec<Lapse>,
    pub idle: Vec<IdleRecord>,
    /// Band after the cycle closed
    pub band: LegitimacyBand,
    pub effects: BandEffects,
    pub cessation_required: bool,
}

/// The governance coordination engine.
pub struct GovernanceEngine {
    config: EngineConfig,
    /// Registered actors by id
    actors: DashMap<String, Actor>,
    registry: TaskRegistry,
    detector: Detector,
    containment: ContainmentRegistry,
    review: ReviewBoard,
    agenda: AgendaController,
    legitimacy: LegitimacyLedger,
    capacity: CapacityLedger,
    /// Currently open cycle
    cycle: AtomicU64,
    /// Statements whose review could not be seated yet
    pending_referrals: DashSet<String>,
    /// Containment statements whose hold or referral failed, by statement id to task id
    unenforced: DashMap<String, String>,
    /// Held while a cycle advances
    advancing: Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
}

impl GovernanceEngine {
    /// Engine with in-memory ledgers and default configuration.
    pub fn new() -> Result<Self> {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cycle(&self) -> CycleNumber {
        self.cycle.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Engine events as a stream. Events missed by a lagging reader are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = EngineEvent> + Send + 'static {
        stream::unfold(self.events.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    // ========== Actors ==========

    pub fn register_actor(&self, actor: Actor) -> Result<()> {
        match self.actors.entry(actor.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CharterError::DuplicateActor(actor.id).into())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(actor_id = %actor.id, capabilities = actor.capabilities.len(), "Actor registered");
                slot.insert(actor);
                Ok(())
            }
        }
    }

    pub fn actor(&self, actor_id: &str) -> Result<Actor> {
        self.actors
            .get(actor_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| CharterError::UnknownActor(actor_id.to_string()).into())
    }

    /// Actors who may sit on panels.
    fn reviewers(&self) -> Vec<Actor> {
        let mut reviewers: Vec<Actor> = self
            .actors
            .iter()
            .filter(|a| a.can(Capability::SitOnPanel))
            .map(|a| a.value().clone())
            .collect();
        reviewers.sort_by(|a, b| a.id.cmp(&b.id));
        reviewers
    }

    // ========== Task lifecycle ==========

    /// Authorize a new task, unless legitimacy forbids it.
    pub async fn authorize_task(&self, actor_id: &str, title: &str) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        let band = self.legitimacy.band().await;
        let effects = self.legitimacy.effects().await;
        if effects.cessation_required {
            return Err(EngineError::CessationRequired);
        }
        if effects.authorization_paused {
            warn!(actor_id = %actor_id, band = band.as_str(), "Authorization refused");
            return Err(EngineError::AuthorizationPaused(band));
        }
        let result = self.registry.authorize(&actor, title).await;
        self.settle(result).await
    }

    pub async fn activate(
        &self,
        actor_id: &str,
        task_id: &str,
        expected_version: u64,
        activation: ActivationRecord,
    ) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self
            .registry
            .activate(&actor, task_id, expected_version, activation)
            .await;
        self.settle(result).await
    }

    pub async fn route(
        &self,
        actor_id: &str,
        task_id: &str,
        expected_version: u64,
        executors: Vec<String>,
    ) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self
            .registry
            .route(&actor, task_id, expected_version, executors, RoutingMode::Explicit)
            .await;
        self.settle(result).await
    }

    /// Route to the highest-weighted candidates without a routing decision.
    ///
    /// Allowed, but always witnessed as `auto_routed`.
    pub async fn auto_route(
        &self,
        actor_id: &str,
        task_id: &str,
        expected_version: u64,
        candidates: &[String],
        count: usize,
    ) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let executors: Vec<String> = self
            .registry
            .eligibility()
            .rank(candidates.iter().map(|c| c.as_str()))
            .into_iter()
            .take(count.max(1))
            .map(|(id, _)| id)
            .collect();
        let result = self
            .registry
            .route(&actor, task_id, expected_version, executors, RoutingMode::Automatic)
            .await;
        self.settle(result).await
    }

    pub async fn accept(&self, actor_id: &str, task_id: &str, expected_version: u64) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self.registry.accept(&actor, task_id, expected_version).await;
        self.settle(result).await
    }

    pub async fn decline(
        &self,
        actor_id: &str,
        task_id: &str,
        expected_version: u64,
        reason: &str,
    ) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self
            .registry
            .decline(&actor, task_id, expected_version, reason)
            .await;
        self.settle(result).await
    }

    pub async fn start(&self, actor_id: &str, task_id: &str, expected_version: u64) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self.registry.start(&actor, task_id, expected_version).await;
        self.settle(result).await
    }

    pub async fn report(
        &self,
        actor_id: &str,
        task_id: &str,
        expected_version: u64,
        result: ResultRecord,
    ) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let outcome = self
            .registry
            .report(&actor, task_id, expected_version, result)
            .await;
        self.settle(outcome).await
    }

    pub async fn aggregate(&self, actor_id: &str, task_id: &str, expected_version: u64) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self.registry.aggregate(&actor, task_id, expected_version).await;
        self.settle(result).await
    }

    pub async fn complete(&self, actor_id: &str, task_id: &str, expected_version: u64) -> Result<Task> {
        let actor = self.actor(actor_id)?;
        self.ensure_enforced(task_id).await?;
        let result = self.registry.complete(&actor, task_id, expected_version).await;
        self.settle(result).await
    }

    pub async fn task(&self, task_id: &str) -> Result<Task> {
        Ok(self.registry.get(task_id).await?)
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// An activation for `task` with the configured default response window.
    pub fn draft_activation(&self, task: &Task) -> ActivationRecord {
        ActivationRecord::new(&task.id, &task.title, self.config.enforcement.response_window())
    }

    /// Run the detector over whatever the write produced, then report it.
    async fn settle(&self, result: std::result::Result<Task, LifecycleError>) -> Result<Task> {
        self.pump(Utc::now()).await;
        self.observe(result.map_err(EngineError::from)).await
    }

    /// A write that could not be durably recorded is itself a legitimacy fact.
    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.code() == "unrecorded" {
                let recorded = self
                    .legitimacy
                    .record_trigger(
                        TriggerKind::UnrecordedWrite,
                        TriggerWeight::Minor,
                        None,
                        vec![],
                        e.to_string(),
                    )
                    .await;
                if let Err(inner) = recorded {
                    error!(error = %e, trigger_error = %inner, "Unrecorded write could not be accounted");
                }
            }
        }
        result
    }

    // ========== Enforcement ==========

    /// Inspect new lifecycle events and handle every statement they produce.
    ///
    /// Statements left unenforced by an earlier pass are retried first.
    async fn pump(&self, now: DateTime<Utc>) -> Vec<WitnessStatement> {
        self.retry_unenforced(now).await;
        let statements = match self.detector.scan().await {
            Ok(statements) => statements,
            Err(e) => {
                // The cursor stays on the failing event; the next pass rescans it.
                if let Err(e) = self.observe::<()>(Err(e.into())).await {
                    error!(error = %e, "Detector scan failed");
                }
                return vec![];
            }
        };
        for statement in &statements {
            self.handle_statement(statement, now).await;
        }
        statements
    }

    /// Put a statement on the agenda, contain its task and refer it.
    async fn handle_statement(&self, statement: &WitnessStatement, now: DateTime<Utc>) {
        self.emit(EngineEvent::Statement(statement.clone()));
        self.agenda
            .push_forced(
                AgendaQueue::WitnessAndFindings,
                &statement.subject_id,
                format!("{} on {}", statement.kind, statement.subject_id),
                ItemSource::Statement {
                    statement_id: statement.id.clone(),
                },
                now,
            )
            .await;

        if statement.containment {
            self.enforce(statement, now).await;
        }
    }

    /// Contain and refer. On failure the statement is parked and its task
    /// refuses writes until a later pass succeeds.
    async fn enforce(&self, statement: &WitnessStatement, now: DateTime<Utc>) {
        let result: Result<()> = async {
            if self.containment.get(&statement.id).is_none() {
                if let Some(record) = self.containment.contain(&self.registry, statement).await? {
                    self.emit(EngineEvent::Contained(record));
                }
            }
            self.refer(statement, now).await.map(|_| ())
        }
        .await;

        match self.observe(result).await {
            Ok(()) => {
                if self.unenforced.remove(&statement.id).is_some() {
                    info!(statement_id = %statement.id, "Parked statement enforced");
                }
            }
            Err(e) => {
                error!(
                    statement_id = %statement.id,
                    task_id = %statement.subject_id,
                    error = %e,
                    "Statement not enforced; parked for retry"
                );
                self.unenforced
                    .insert(statement.id.clone(), statement.subject_id.clone());
            }
        }
    }

    async fn retry_unenforced(&self, now: DateTime<Utc>) {
        let parked: Vec<String> = self.unenforced.iter().map(|e| e.key().clone()).collect();
        for statement_id in parked {
            match self.detector.statement(&statement_id) {
                Ok(statement) => self.enforce(&statement, now).await,
                Err(e) => {
                    error!(statement_id = %statement_id, error = %e, "Parked statement missing");
                }
            }
        }
    }

    /// Refuse writes to a task while a statement against it is unenforced.
    async fn ensure_enforced(&self, task_id: &str) -> Result<()> {
        self.pump(Utc::now()).await;
        let pending = self
            .unenforced
            .iter()
            .find(|e| e.value() == task_id)
            .map(|e| e.key().clone());
        match pending {
            Some(statement_id) => {
                warn!(task_id = %task_id, statement_id = %statement_id, "Write refused; containment pending");
                Err(EngineError::ContainmentPending {
                    task_id: task_id.to_string(),
                    statement_id,
                })
            }
            None => Ok(()),
        }
    }

    /// Statements whose containment or referral has not yet succeeded.
    pub fn unenforced(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.unenforced.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Parties a panel member must not be.
    async fn involved(&self, statement: &WitnessStatement) -> BTreeSet<String> {
        let mut involved = BTreeSet::new();
        if statement.subject_kind != SubjectKind::Task {
            return involved;
        }
        let Ok(task) = self.registry.get(&statement.subject_id).await else {
            return involved;
        };
        involved.insert(task.delegator_id.clone());
        if let Some(routing) = &task.routing {
            involved.insert(routing.routed_by.clone());
            involved.extend(routing.executors.iter().cloned());
        }
        involved.extend(task.executor_id.iter().cloned());
        involved.extend(
            task.history
                .iter()
                .filter(|change| change.actor_id != CONTAINMENT_AUTHORITY)
                .map(|change| change.actor_id.clone()),
        );
        involved
    }

    /// Open a case for a statement, or park it until a panel can be seated.
    async fn refer(&self, statement: &WitnessStatement, now: DateTime<Utc>) -> Result<Option<ReviewCase>> {
        let reviewers = self.reviewers();
        let involved = self.involved(statement).await;
        match self.review.open_case(statement, &reviewers, &involved, now).await {
            Ok(case) => {
                self.pending_referrals.remove(&statement.id);
                self.emit(EngineEvent::CaseOpened {
                    case_id: case.id.clone(),
                    statement_id: statement.id.clone(),
                });
                Ok(Some(case))
            }
            Err(EnforcementError::InsufficientPanel { needed, eligible }) => {
                warn!(
                    statement_id = %statement.id,
                    needed = needed,
                    eligible = eligible,
                    "Review panel cannot be seated; referral retried next cycle"
                );
                self.pending_referrals.insert(statement.id.clone());
                Ok(None)
            }
            Err(EnforcementError::AlreadyUnderReview(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Refer a statement that was not referred automatically.
    pub async fn open_review(&self, actor_id: &str, statement_id: &str) -> Result<ReviewCase> {
        let actor = self.actor(actor_id)?;
        actor.require(Capability::RaiseBlocker)?;
        let statement = self.detector.statement(statement_id)?;
        let mut involved = self.involved(&statement).await;
        involved.insert(actor.id.clone());
        let case = self
            .review
            .open_case(&statement, &self.reviewers(), &involved, Utc::now())
            .await?;
        self.pending_referrals.remove(statement_id);
        self.emit(EngineEvent::CaseOpened {
            case_id: case.id.clone(),
            statement_id: statement_id.to_string(),
        });
        Ok(case)
    }

    pub async fn submit_opinion(
        &self,
        reviewer_id: &str,
        case_id: &str,
        draft: OpinionDraft,
    ) -> Result<OpinionOutcome> {
        let reviewer = self.actor(reviewer_id)?;
        let now = Utc::now();
        let outcome = self
            .review
            .submit_opinion(case_id, &reviewer, draft, now)
            .await?;
        if let OpinionOutcome::Issued(case) = &outcome {
            self.on_issued(case, now).await?;
        }
        Ok(outcome)
    }

    /// Findings go on the agenda; releases apply at once, everything else at finality.
    async fn on_issued(&self, case: &ReviewCase, now: DateTime<Utc>) -> Result<()> {
        let Some(issued) = &case.finding else {
            return Ok(());
        };
        self.emit(EngineEvent::FindingIssued {
            case_id: case.id.clone(),
            finding: issued.finding,
        });
        self.agenda
            .push_forced(
                AgendaQueue::WitnessAndFindings,
                &case.id,
                format!("Finding {} on {}", issued.finding, case.statement.subject_id),
                ItemSource::Finding {
                    case_id: case.id.clone(),
                },
                now,
            )
            .await;

        match &case.kind {
            CaseKind::Original => {
                if issued.disposition == Disposition::Release
                    && self.containment.is_held(&case.statement.id)
                {
                    self.containment
                        .release(&self.registry, &case.statement.id, &case.id)
                        .await?;
                }
            }
            CaseKind::Appeal { .. } => {
                if let Some(final_finding) = self.review.conclude_appeal(case, now).await? {
                    self.apply_final(&final_finding, now).await?;
                }
            }
        }
        self.pump(now).await;
        Ok(())
    }

    /// Apply a final finding: disposition, legitimacy trigger, remedies.
    async fn apply_final(&self, final_finding: &FinalFinding, now: DateTime<Utc>) -> Result<()> {
        let statement_id = &final_finding.statement_id;
        if self.containment.is_held(statement_id) {
            match final_finding.disposition {
                Disposition::Release => {
                    self.containment
                        .release(&self.registry, statement_id, &final_finding.ruling_case_id)
                        .await?;
                }
                Disposition::Nullify => {
                    self.containment
                        .nullify(&self.registry, statement_id, &final_finding.ruling_case_id)
                        .await?;
                }
            }
        } else if final_finding.disposition == Disposition::Nullify {
            info!(
                statement_id = %statement_id,
                case_id = %final_finding.ruling_case_id,
                "Task no longer held; nullification not applied"
            );
        }

        let trigger = match final_finding.finding {
            Finding::Legitimate | Finding::LegitimateWithConcerns => None,
            Finding::ProcedurallyDeficient => Some((TriggerKind::DeficientFinding, TriggerWeight::Minor)),
            Finding::Illegitimate => Some((TriggerKind::IllegitimateFinding, TriggerWeight::Major)),
            Finding::VoidAbInitio => Some((TriggerKind::VoidFinding, TriggerWeight::Major)),
        };
        if let Some((kind, weight)) = trigger {
            self.legitimacy
                .record_trigger(
                    kind,
                    weight,
                    Some(final_finding.subject_id.clone()),
                    final_finding.case_ids.clone(),
                    format!("final finding {} on {}", final_finding.finding, statement_id),
                )
                .await?;
        }
        for remedy in &final_finding.remedies {
            self.legitimacy
                .open_remedy(final_finding.case_ids.clone(), remedy.as_str(), now)
                .await?;
        }

        self.emit(EngineEvent::FindingFinal(final_finding.clone()));
        Ok(())
    }

    /// File the one appeal a finding allows.
    pub async fn file_appeal(
        &self,
        appellant_id: &str,
        case_id: &str,
        grounds: AppealGrounds,
    ) -> Result<ReviewCase> {
        let appellant = self.actor(appellant_id)?;
        let original = self.review.get(case_id).await?;
        let mut involved = self.involved(&original.statement).await;
        involved.insert(appellant.id.clone());
        let case = self
            .review
            .file_appeal(case_id, &appellant, grounds, &self.reviewers(), &involved, Utc::now())
            .await?;
        self.emit(EngineEvent::CaseOpened {
            case_id: case.id.clone(),
            statement_id: case.statement.id.clone(),
        });
        Ok(case)
    }

    pub async fn case(&self, case_id: &str) -> Result<ReviewCase> {
        Ok(self.review.get(case_id).await?)
    }

    pub fn case_for_statement(&self, statement_id: &str) -> Option<String> {
        self.review.case_for_statement(statement_id)
    }

    pub fn statements(&self) -> Vec<WitnessStatement> {
        self.detector.statements()
    }

    pub fn containment(&self, statement_id: &str) -> Option<ContainmentRecord> {
        self.containment.get(statement_id)
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn witness_ledger(&self) -> Arc<AppendOnlyLedger<WitnessStatement>> {
        self.detector.witness_ledger()
    }

    /// Compare a held copy of the witness ledger against the original.
    ///
    /// Altered records are the one catastrophic trigger.
    pub async fn audit_witness_records(
        &self,
        records: &[LedgerRecord<WitnessStatement>],
    ) -> Result<Option<WitnessStatement>> {
        let seqs = self.detector.witness_ledger().audit(records);
        if seqs.is_empty() {
            return Ok(None);
        }
        let statement = self.report_tampering(WITNESS_LEDGER, &seqs).await?;
        self.legitimacy
            .record_trigger(
                TriggerKind::DetectorTampering,
                TriggerWeight::Catastrophic,
                Some(statement.id.clone()),
                vec![],
                format!("witness records {:?} altered", seqs),
            )
            .await?;
        Ok(Some(statement))
    }

    /// Compare a held copy of the task history against the original.
    pub async fn audit_task_history(
        &self,
        records: &[LedgerRecord<LifecycleEvent>],
    ) -> Result<Option<WitnessStatement>> {
        let seqs = self.registry.history_ledger().audit(records);
        if seqs.is_empty() {
            return Ok(None);
        }
        let statement = self.report_tampering(HISTORY_LEDGER, &seqs).await?;
        self.legitimacy
            .record_trigger(
                TriggerKind::RecordTampering,
                TriggerWeight::Major,
                Some(statement.id.clone()),
                vec![],
                format!("task history records {:?} altered", seqs),
            )
            .await?;
        Ok(Some(statement))
    }

    async fn report_tampering(&self, ledger: &str, seqs: &[u64]) -> Result<WitnessStatement> {
        let statement = self
            .observe(self.detector.tampering(ledger, seqs).await.map_err(EngineError::from))
            .await?;
        self.handle_statement(&statement, Utc::now()).await;
        Ok(statement)
    }

    // ========== Agenda ==========

    pub async fn submit_motion(&self, sponsor_id: &str, draft: MotionDraft) -> Result<AgendaItem> {
        let sponsor = self.actor(sponsor_id)?;
        Ok(self.agenda.submit_motion(&sponsor, draft, Utc::now()).await?)
    }

    pub async fn raise_blocker(&self, actor_id: &str, subject_id: &str, title: &str) -> Result<AgendaItem> {
        let actor = self.actor(actor_id)?;
        Ok(self
            .agenda
            .raise_blocker(&actor, subject_id, title, Utc::now())
            .await?)
    }

    pub async fn post_informational(&self, actor_id: &str, title: &str) -> Result<AgendaItem> {
        let actor = self.actor(actor_id)?;
        Ok(self
            .agenda
            .post_informational(&actor, title, Utc::now())
            .await?)
    }

    pub fn agenda(&self) -> &AgendaController {
        &self.agenda
    }

    pub async fn latest_agenda(&self) -> Option<Agenda> {
        self.agenda.latest().await
    }

    // ========== Legitimacy ==========

    pub async fn acknowledge(&self, actor_id: &str) -> Result<()> {
        let actor = self.actor(actor_id)?;
        let result = self.legitimacy.acknowledge(&actor).await.map(|_| ());
        self.observe(result.map_err(EngineError::from)).await
    }

    pub async fn complete_remedy(&self, remedy_id: &str) -> Result<()> {
        let result = self.legitimacy.complete_remedy(remedy_id).await.map(|_| ());
        self.observe(result.map_err(EngineError::from)).await
    }

    pub async fn band(&self) -> LegitimacyBand {
        self.legitimacy.band().await
    }

    pub async fn legitimacy_summary(&self) -> LegitimacySummary {
        self.legitimacy.summary().await
    }

    pub fn legitimacy(&self) -> &LegitimacyLedger {
        &self.legitimacy
    }

    // ========== Capacity ==========

    pub async fn declare_capacity(
        &self,
        actor_id: &str,
        source: CapacitySource,
        units: u32,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<Declaration> {
        let actor = self.actor(actor_id)?;
        let result = self
            .capacity
            .declare(&actor, source, units, valid_from, valid_until)
            .await;
        self.observe(result.map_err(EngineError::from)).await
    }

    pub async fn claim_capacity(
        &self,
        claimant_id: &str,
        source: CapacitySource,
        units: u32,
        subject: &str,
    ) -> Result<ClaimOutcome> {
        let claimant = self.actor(claimant_id)?;
        let result = self
            .capacity
            .claim(&claimant.id, source, units, subject, self.cycle(), Utc::now())
            .await;
        self.observe(result.map_err(EngineError::from)).await
    }

    /// Record delivered capacity; repeated shortfalls by a source weigh more.
    pub async fn report_delivery(&self, declaration_id: &str, delivered: u32) -> Result<Option<Shortfall>> {
        let result = self
            .capacity
            .report_delivery(declaration_id, delivered, self.cycle())
            .await;
        let Some(shortfall) = self.observe(result.map_err(EngineError::from)).await? else {
            return Ok(None);
        };
        let weight = if shortfall.occurrences >= 2 {
            TriggerWeight::Major
        } else {
            TriggerWeight::Minor
        };
        self.legitimacy
            .record_trigger(
                TriggerKind::OverDeclaration,
                weight,
                Some(shortfall.source_id.clone()),
                vec![],
                format!(
                    "declared {} {} units, delivered {}",
                    shortfall.declared,
                    shortfall.source.as_str(),
                    shortfall.delivered
                ),
            )
            .await?;
        Ok(Some(shortfall))
    }

    pub async fn capacity_summary(&self) -> CapacitySummary {
        self.capacity.summary(self.cycle(), Utc::now()).await
    }

    pub fn capacity(&self) -> &CapacityLedger {
        &self.capacity
    }

    // ========== Cycle ==========

    /// Run the cycle's sweeps, generate its agenda and close it.
    pub async fn advance_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let cycle = self.cycle();
        let _advancing = self
            .advancing
            .try_lock()
            .map_err(|_| AgendaError::CycleInProgress(cycle))?;
        info!(cycle = cycle, "Advancing cycle");

        let mut statements = self.sweep_silence(now).await?;
        statements.extend(self.pump(now).await);
        statements.extend(self.sweep_review_sla(now).await?);
        self.retry_referrals(now).await?;

        let finalized = self.review.finalize_due(now).await;
        for final_finding in &finalized {
            self.apply_final(final_finding, now).await?;
        }
        self.legitimacy.sweep_remedies(now).await?;

        let lapses = self.capacity.sweep_lapses(now).await?;
        for lapse in &lapses {
            let weight = if lapse.occurrences >= 2 {
                TriggerWeight::Major
            } else {
                TriggerWeight::Minor
            };
            self.legitimacy
                .record_trigger(
                    TriggerKind::CapacityConcealment,
                    weight,
                    Some(lapse.subject.clone()),
                    vec![],
                    format!("deferral for {} lapsed unresolved", lapse.subject),
                )
                .await?;
        }

        self.queue_mandatory(cycle, now).await;
        let agenda = self.agenda.generate(cycle, &self.capacity, now).await?;
        self.emit(EngineEvent::AgendaPublished(agenda.public_summary()));

        let idle = self.capacity.close_cycle(cycle, now).await?;
        self.legitimacy.close_cycle().await?;
        self.prune_reported().await;

        let band = self.legitimacy.band().await;
        let effects = self.legitimacy.effects().await;
        self.cycle.store(cycle + 1, Ordering::SeqCst);
        self.emit(EngineEvent::CycleAdvanced { cycle, band });

        if effects.cessation_required {
            error!(cycle = cycle, "Legitimacy failed; cessation required");
        }
        info!(
            cycle = cycle,
            items = agenda.items.len(),
            statements = statements.len(),
            finalized = finalized.len(),
            band = band.as_str(),
            "Cycle closed"
        );

        Ok(CycleReport {
            cycle,
            agenda,
            statements,
            finalized,
            lapses,
            idle,
            band,
            effects,
            cessation_required: effects.cessation_required,
        })
    }

    async fn sweep_silence(&self, now: DateTime<Utc>) -> Result<Vec<WitnessStatement>> {
        let mut statements = Vec::new();
        for overdue in self.registry.overdue(now).await {
            if let Some(statement) = self.detector.silence(&overdue).await? {
                self.handle_statement(&statement, now).await;
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    /// Holds whose case has not issued within the SLA.
    async fn sweep_review_sla(&self, now: DateTime<Utc>) -> Result<Vec<WitnessStatement>> {
        let mut statements = Vec::new();
        for held in self.containment.overdue_reviews(now) {
            let case_id = self.review.case_for_statement(&held.statement_id);
            let undecided = match &case_id {
                Some(id) => self
                    .review
                    .get(id)
                    .await
                    .map(|case| case.finding.is_none())
                    .unwrap_or(true),
                None => true,
            };
            if !undecided {
                continue;
            }
            if let Some(statement) = self
                .detector
                .review_overdue(&held.statement_id, case_id.as_deref())
                .await?
            {
                self.handle_statement(&statement, now).await;
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    /// Forget silence reports on settled or superseded activations and
    /// review reports on holds no longer in force.
    async fn prune_reported(&self) {
        let mut settled = Vec::new();
        for (reference, subject) in self.detector.reported() {
            let done = match &subject {
                ReportedRef::Silence { task_id } => match self.registry.get(task_id).await {
                    Ok(task) => {
                        task.state.is_terminal()
                            || task.current_activation().map(|a| a.id != reference).unwrap_or(true)
                    }
                    Err(_) => true,
                },
                ReportedRef::ReviewOverdue { statement_id } => !self.containment.is_held(statement_id),
            };
            if done {
                settled.push(reference);
            }
        }
        self.detector.forget(&settled);
    }

    async fn retry_referrals(&self, now: DateTime<Utc>) -> Result<()> {
        let pending: Vec<String> = self.pending_referrals.iter().map(|s| s.key().clone()).collect();
        for statement_id in pending {
            let statement = self.detector.statement(&statement_id)?;
            self.refer(&statement, now).await?;
        }
        Ok(())
    }

    async fn queue_mandatory(&self, cycle: CycleNumber, now: DateTime<Utc>) {
        let band = self.legitimacy.band().await;
        let effects = self.legitimacy.effects().await;
        if effects.forced_acknowledgment {
            self.agenda
                .push_mandatory(
                    "legitimacy_acknowledgment",
                    format!("Acknowledge legitimacy band {}", band),
                    now,
                )
                .await;
        }
        if effects.mandatory_review_each_cycle {
            self.agenda
                .push_mandatory(
                    "legitimacy_review",
                    format!("Legitimacy review while {}", band),
                    now,
                )
                .await;
        }
        if cycle % self.config.agenda.mandatory_review_interval == 0 {
            self.agenda
                .push_mandatory("periodic_review", format!("Periodic review, cycle {}", cycle), now)
                .await;
        }
    }
}

/// Builder for GovernanceEngine.
pub struct EngineBuilder {
    config: EngineConfig,
    history_sink: Option<Arc<dyn LedgerSink<LifecycleEvent>>>,
    witness_sink: Option<Arc<dyn LedgerSink<WitnessStatement>>>,
    legitimacy_sink: Option<Arc<dyn LedgerSink<LegitimacyEntry>>>,
    capacity_sink: Option<Arc<dyn LedgerSink<CapacityEntry>>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            history_sink: None,
            witness_sink: None,
            legitimacy_sink: None,
            capacity_sink: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set cycle capacity used when no program slots are declared.
    pub fn cycle_capacity(mut self, capacity: usize) -> Self {
        self.config.agenda.cycle_capacity = capacity;
        self
    }

    /// Set the per-realm quota for new motions.
    pub fn realm_quota(mut self, quota: usize) -> Self {
        self.config.agenda.realm_quota = quota;
        self
    }

    /// Set review panel size.
    pub fn panel_size(mut self, size: usize) -> Self {
        self.config.enforcement.panel_size = size;
        self
    }

    /// Seed panel draws.
    pub fn panel_seed(mut self, seed: u64) -> Self {
        self.config.enforcement.panel_seed = Some(seed);
        self
    }

    pub fn with_history_sink(mut self, sink: Arc<dyn LedgerSink<LifecycleEvent>>) -> Self {
        self.history_sink = Some(sink);
        self
    }

    pub fn with_witness_sink(mut self, sink: Arc<dyn LedgerSink<WitnessStatement>>) -> Self {
        self.witness_sink = Some(sink);
        self
    }

    pub fn with_legitimacy_sink(mut self, sink: Arc<dyn LedgerSink<LegitimacyEntry>>) -> Self {
        self.legitimacy_sink = Some(sink);
        self
    }

    pub fn with_capacity_sink(mut self, sink: Arc<dyn LedgerSink<CapacityEntry>>) -> Self {
        self.capacity_sink = Some(sink);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<GovernanceEngine> {
        self.config.validate()?;
        let retry = self.config.ledger.retry_policy();

        let history = ledger(HISTORY_LEDGER, self.history_sink, retry);
        let witness = ledger(WITNESS_LEDGER, self.witness_sink, retry);
        let legitimacy = ledger(accounting::legitimacy::LEGITIMACY_LEDGER, self.legitimacy_sink, retry);
        let capacity = ledger(accounting::capacity::CAPACITY_LEDGER, self.capacity_sink, retry);

        let config = self.config;
        let enforcement = &config.enforcement;
        let detector = Detector::new(witness, Arc::clone(&history), enforcement.containment_severity);
        let containment = ContainmentRegistry::new(enforcement.review_sla_secs);
        let review = ReviewBoard::new(
            enforcement.panel_size,
            enforcement.appeal_window_secs,
            enforcement.panel_seed,
        );
        let (events, _) = broadcast::channel(config.general.event_buffer.max(1));

        info!(
            body = %config.general.body_name,
            panel_size = enforcement.panel_size,
            cycle_capacity = config.agenda.cycle_capacity,
            "Governance engine built"
        );

        Ok(GovernanceEngine {
            registry: TaskRegistry::with_ledger(history),
            detector,
            containment,
            review,
            agenda: AgendaController::new(config.agenda.clone()),
            legitimacy: LegitimacyLedger::with_ledger(legitimacy, config.legitimacy.clone()),
            capacity: CapacityLedger::with_ledger(capacity, config.capacity.clone()),
            actors: DashMap::new(),
            cycle: AtomicU64::new(1),
            pending_referrals: DashSet::new(),
            unenforced: DashMap::new(),
            advancing: Mutex::new(()),
            events,
            config,
        })
    }
}

fn ledger<T>(name: &str, sink: Option<Arc<dyn LedgerSink<T>>>, retry: RetryPolicy) -> Arc<AppendOnlyLedger<T>>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    let ledger = AppendOnlyLedger::new(name);
    Arc::new(match sink {
        Some(sink) => ledger.with_sink(sink, retry),
        None => ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter::Role;

    fn engine() -> GovernanceEngine {
        let engine = EngineBuilder::new().panel_seed(11).build().unwrap();
        engine
            .register_actor(Actor::new("delegator", "Delegator").with_role(Role::Delegator))
            .unwrap();
        engine
            .register_actor(Actor::new("steward", "Steward").with_role(Role::Steward))
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_duplicate_actor_rejected() {
        let engine = engine();
        let err = engine
            .register_actor(Actor::new("steward", "Again"))
            .unwrap_err();
        assert_eq!(err.code(), "duplicate_actor");
        assert_eq!(engine.actor("nobody").unwrap_err().code(), "unknown_actor");
    }

    #[tokio::test]
    async fn test_builder_rejects_even_panel() {
        let err = EngineBuilder::new().panel_size(4).build().err().unwrap();
        assert_eq!(err.code(), "invalid_config");
    }

    #[tokio::test]
    async fn test_drafted_activation_uses_configured_window() {
        let mut config = EngineConfig::default();
        config.enforcement.default_response_window_secs = 2 * 3600;
        let engine = EngineBuilder::new().config(config).build().unwrap();
        engine
            .register_actor(Actor::new("delegator", "Delegator").with_role(Role::Delegator))
            .unwrap();

        let task = engine.authorize_task("delegator", "Survey").await.unwrap();
        let activation = engine.draft_activation(&task);
        assert_eq!(activation.task_id, task.id);
        assert_eq!(activation.summary, "Survey");
        let window = activation.response_policy.deadline - activation.issued_at;
        assert!(window > chrono::Duration::minutes(119));
        assert!(window <= chrono::Duration::hours(2));
    }

    #[tokio::test]
    async fn test_advance_cycle_increments() {
        let engine = engine();
        assert_eq!(engine.cycle(), 1);
        let report = engine.advance_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.band, LegitimacyBand::Stable);
        assert_eq!(engine.cycle(), 2);
    }

    #[tokio::test]
    async fn test_periodic_review_forced_into_band_zero() {
        let engine = engine();
        let mut forced = 0;
        for _ in 0..4 {
            let report = engine.advance_cycle(Utc::now()).await.unwrap();
            forced += report
                .agenda
                .items
                .iter()
                .filter(|i| i.queue == AgendaQueue::MandatoryReviews)
                .count();
        }
        assert_eq!(forced, 1);
    }

    #[tokio::test]
    async fn test_cessation_blocks_authorization() {
        let engine = engine();
        engine
            .legitimacy()
            .record_trigger(
                TriggerKind::DetectorTampering,
                TriggerWeight::Catastrophic,
                None,
                vec![],
                "test",
            )
            .await
            .unwrap();
        let err = engine.authorize_task("delegator", "Survey").await.unwrap_err();
        assert_eq!(err.code(), "cessation_required");
    }

    #[tokio::test]
    async fn test_events_published() {
        let engine = engine();
        let mut events = engine.subscribe();
        engine.advance_cycle(Utc::now()).await.unwrap();
        let mut saw_agenda = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::AgendaPublished(_)) {
                saw_agenda = true;
            }
        }
        assert!(saw_agenda);
    }
}
