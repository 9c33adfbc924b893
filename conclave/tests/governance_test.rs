//! End-to-end tests for the governance engine.
//!
//! Each test builds an engine with a fixed panel seed, seeds a small body of
//! actors and drives it through the public API only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use accounting::{
    CapacitySource, LegitimacyBand, LegitimacyEntryKind, TriggerKind, TriggerWeight,
};
use charter::{Actor, LedgerRecord, LedgerSink, Role, SinkError};
use conclave::agenda::{MotionDraft, PriorityBand, REALM_QUOTA_EXCEEDED};
use conclave::enforcement::{
    AppealGrounds, AxisAssessment, CaseStatus, ContainmentStatus, Finding, GroundsKind,
    OpinionDraft, OpinionOutcome, ViolationKind, WitnessStatement,
};
use conclave::{EngineBuilder, EngineConfig, GovernanceEngine};
use lifecycle::{
    is_valid_walk, ActivationRecord, Constraint, ConstraintKind, Deliverable, LifecycleEvent,
    LifecycleEventKind, ResultRecord, ResultStatus, Task, TaskState,
};

// ============================================================================
// Helpers
// ============================================================================

fn seed_actors(engine: &GovernanceEngine) {
    let actors = [
        Actor::new("delegator", "Works office").with_role(Role::Delegator),
        Actor::new("router", "Dispatch").with_role(Role::Router),
        Actor::new("exec-a", "Field team A").with_role(Role::Executor),
        Actor::new("exec-b", "Field team B").with_role(Role::Executor),
        Actor::new("exec-c", "Field team C").with_role(Role::Executor),
        Actor::new("steward", "Steward").with_role(Role::Steward),
        Actor::new("programs", "Program office").with_role(Role::CapacitySource),
    ];
    for actor in actors {
        engine.register_actor(actor).unwrap();
    }
    for i in 1..=7 {
        engine
            .register_actor(
                Actor::new(format!("reviewer-{}", i), format!("Reviewer {}", i))
                    .with_role(Role::Reviewer),
            )
            .unwrap();
    }
}

fn engine() -> GovernanceEngine {
    let engine = EngineBuilder::new().panel_seed(7).build().unwrap();
    seed_actors(&engine);
    engine
}

fn activation(task: &Task) -> ActivationRecord {
    ActivationRecord::new(&task.id, &task.title, Duration::hours(48)).with_deliverable("report.pdf")
}

fn finished(task: &Task, executor: &str) -> ResultRecord {
    ResultRecord::new(&task.id, executor, ResultStatus::Completed)
        .with_deliverable(Deliverable::from_bytes("report.pdf", b"findings"))
        .attested()
}

fn draft(finding: Finding) -> OpinionDraft {
    OpinionDraft {
        axes: AxisAssessment {
            intent_respected: true,
            plan_followed: true,
            procedure_followed: finding <= Finding::LegitimateWithConcerns,
        },
        finding,
        statement: format!("Panel member finds the action {}", finding),
    }
}

/// Authorize, activate and route a task to `executors`.
async fn routed(engine: &GovernanceEngine, title: &str, executors: &[&str]) -> Task {
    let task = engine.authorize_task("delegator", title).await.unwrap();
    let task = engine
        .activate("delegator", &task.id, task.version, activation(&task))
        .await
        .unwrap();
    engine
        .route(
            "router",
            &task.id,
            task.version,
            executors.iter().map(|e| e.to_string()).collect(),
        )
        .await
        .unwrap()
}

/// A task in progress with exec-a, then a result injected by exec-b.
async fn injected(engine: &GovernanceEngine) -> (Task, WitnessStatement) {
    let task = routed(engine, "Inspect the sluice", &["exec-a"]).await;
    let task = engine.accept("exec-a", &task.id, task.version).await.unwrap();
    let task = engine.start("exec-a", &task.id, task.version).await.unwrap();

    let err = engine
        .report("exec-b", &task.id, task.version, finished(&task, "exec-b"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "result_without_provenance");

    let statement = engine
        .statements()
        .into_iter()
        .find(|s| s.kind == ViolationKind::ResultInjection && s.subject_id == task.id)
        .expect("result injection witnessed");
    (task, statement)
}

/// Every panel member submits the same finding. Returns the issued case.
async fn decide(engine: &GovernanceEngine, case_id: &str, finding: Finding) -> conclave::enforcement::ReviewCase {
    let case = engine.case(case_id).await.unwrap();
    let mut issued = None;
    for reviewer in &case.panel {
        if let OpinionOutcome::Issued(case) = engine
            .submit_opinion(reviewer, case_id, draft(finding))
            .await
            .unwrap()
        {
            issued = Some(case);
        }
    }
    issued.expect("last opinion issues the finding")
}

/// Always fails; every write through it ends up unrecorded.
struct FailingSink;

#[async_trait]
impl<T: Send + Sync> LedgerSink<T> for FailingSink {
    async fn persist(&self, _record: &LedgerRecord<T>) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("disk detached".to_string()))
    }
}

/// Refuses quarantine transitions while `failing` is set.
struct QuarantineRefusingSink {
    failing: AtomicBool,
}

#[async_trait]
impl LedgerSink<LifecycleEvent> for QuarantineRefusingSink {
    async fn persist(&self, record: &LedgerRecord<LifecycleEvent>) -> Result<(), SinkError> {
        let quarantine = matches!(
            record.entry().map(|e| &e.kind),
            Some(LifecycleEventKind::Transitioned {
                to: TaskState::Quarantined,
                ..
            })
        );
        if quarantine && self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("quarantine volume offline".to_string()));
        }
        Ok(())
    }
}

fn unrecorded_triggers(engine: &GovernanceEngine) -> usize {
    engine
        .legitimacy()
        .ledger()
        .entries()
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                LegitimacyEntryKind::Trigger {
                    trigger: TriggerKind::UnrecordedWrite,
                    ..
                }
            )
        })
        .count()
}

// ============================================================================
// Task Lifecycle
// ============================================================================

#[tokio::test]
async fn test_clean_task_walks_the_transition_table() {
    let engine = engine();
    let task = routed(&engine, "Survey the weir", &["exec-a"]).await;
    let task = engine.accept("exec-a", &task.id, task.version).await.unwrap();
    let task = engine.start("exec-a", &task.id, task.version).await.unwrap();
    let task = engine
        .report("exec-a", &task.id, task.version, finished(&task, "exec-a"))
        .await
        .unwrap();
    let task = engine.aggregate("delegator", &task.id, task.version).await.unwrap();
    let task = engine.complete("delegator", &task.id, task.version).await.unwrap();

    assert_eq!(task.state, TaskState::Completed);
    assert!(is_valid_walk(&task.state_walk()));
    assert!(engine.statements().is_empty());
}

#[tokio::test]
async fn test_start_without_acceptance_is_refused_and_witnessed() {
    let engine = engine();
    let task = routed(&engine, "Clear the culvert", &["exec-a"]).await;

    let err = engine.start("exec-a", &task.id, task.version).await.unwrap_err();
    assert_eq!(err.code(), "missing_acceptance");

    let task = engine.task(&task.id).await.unwrap();
    assert_eq!(task.state, TaskState::Routed);
    assert!(task.history.iter().all(|c| c.to != TaskState::InProgress));
    assert!(engine
        .statements()
        .iter()
        .any(|s| s.kind == ViolationKind::BypassedAcceptance && s.subject_id == task.id));
}

#[tokio::test]
async fn test_stale_version_is_rejected() {
    let engine = engine();
    let task = routed(&engine, "Paint the footbridge", &["exec-a"]).await;
    let stale = task.version - 1;

    let err = engine.accept("exec-a", &task.id, stale).await.unwrap_err();
    assert_eq!(err.code(), "version_conflict");
    assert_eq!(engine.task(&task.id).await.unwrap().state, TaskState::Routed);
}

#[tokio::test]
async fn test_decline_leaves_eligibility_untouched() {
    let engine = engine();
    let book = engine.registry().eligibility();
    let before = (book.weight("exec-a"), book.weight("exec-b"));

    for title in ["Patch the levee", "Mow the verge", "Sweep the square"] {
        let task = routed(&engine, title, &["exec-a", "exec-b"]).await;
        let task = engine
            .decline("exec-a", &task.id, task.version, "crew unavailable")
            .await
            .unwrap();
        engine
            .decline("exec-b", &task.id, task.version, "outside our district")
            .await
            .unwrap();
    }

    assert_eq!((book.weight("exec-a"), book.weight("exec-b")), before);
}

#[tokio::test]
async fn test_all_declined_then_relaxed_reactivation() {
    let engine = engine();
    let task = routed(&engine, "Rebuild the retaining wall", &["exec-a", "exec-b"]).await;

    let task = engine
        .decline("exec-a", &task.id, task.version, "no masonry crew")
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Routed);
    let task = engine
        .decline("exec-b", &task.id, task.version, "window too short")
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Declined);

    // Same constraints again: refused.
    let err = engine
        .activate("delegator", &task.id, task.version, activation(&task))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "constraints_unchanged");

    let relaxed = activation(&task).with_constraint(Constraint::should(
        ConstraintKind::Timing,
        "finish within three weeks",
    ));
    let task = engine
        .activate("delegator", &task.id, task.version, relaxed)
        .await
        .unwrap();
    assert_eq!(task.state, TaskState::Activated);
    assert_eq!(task.activations.len(), 2);
    assert!(is_valid_walk(&task.state_walk()));
}

#[tokio::test]
async fn test_auto_route_is_allowed_but_witnessed() {
    let engine = engine();
    let task = engine.authorize_task("delegator", "Grade the track").await.unwrap();
    let task = engine
        .activate("delegator", &task.id, task.version, activation(&task))
        .await
        .unwrap();
    let candidates = vec!["exec-a".to_string(), "exec-b".to_string(), "exec-c".to_string()];
    let task = engine
        .auto_route("router", &task.id, task.version, &candidates, 2)
        .await
        .unwrap();

    assert_eq!(task.state, TaskState::Routed);
    let statements = engine.statements();
    let auto: Vec<_> = statements
        .iter()
        .filter(|s| s.kind == ViolationKind::AutoRouted)
        .collect();
    assert_eq!(auto.len(), 1);
    // Medium severity: witnessed, not contained.
    assert!(engine.containment(&auto[0].id).is_none());
}

// ============================================================================
// Enforcement Pipeline
// ============================================================================

#[tokio::test]
async fn test_quarantined_task_cannot_complete_until_released() {
    let engine = engine();
    let (task, statement) = injected(&engine).await;

    let held = engine.task(&task.id).await.unwrap();
    assert_eq!(held.state, TaskState::Quarantined);
    let record = engine.containment(&statement.id).unwrap();
    assert_eq!(record.status, ContainmentStatus::Held);
    assert_eq!(record.previous_state, TaskState::InProgress);

    let err = engine
        .complete("delegator", &held.id, held.version)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");

    let case_id = engine.case_for_statement(&statement.id).expect("referred");
    let case = engine.case(&case_id).await.unwrap();
    assert_eq!(case.panel.len(), 3);
    assert!(case.panel.iter().all(|m| m.starts_with("reviewer-")));

    decide(&engine, &case_id, Finding::Legitimate).await;

    let released = engine.task(&task.id).await.unwrap();
    assert_eq!(released.state, TaskState::InProgress);
    assert_eq!(
        engine.containment(&statement.id).unwrap().status,
        ContainmentStatus::Released
    );

    let task = engine
        .report("exec-a", &released.id, released.version, finished(&released, "exec-a"))
        .await
        .unwrap();
    let task = engine.aggregate("delegator", &task.id, task.version).await.unwrap();
    let task = engine.complete("delegator", &task.id, task.version).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert!(is_valid_walk(&task.state_walk()));
}

#[tokio::test]
async fn test_illegitimate_finding_nullifies_at_finality() {
    let engine = engine();
    let (task, statement) = injected(&engine).await;
    let case_id = engine.case_for_statement(&statement.id).unwrap();

    decide(&engine, &case_id, Finding::Illegitimate).await;

    // Still held while the appeal window is open.
    assert_eq!(engine.task(&task.id).await.unwrap().state, TaskState::Quarantined);
    assert_eq!(engine.band().await, LegitimacyBand::Stable);

    let report = engine
        .advance_cycle(Utc::now() + Duration::days(8))
        .await
        .unwrap();

    assert_eq!(report.finalized.len(), 1);
    assert_eq!(report.finalized[0].finding, Finding::Illegitimate);
    assert_eq!(engine.task(&task.id).await.unwrap().state, TaskState::Nullified);
    assert_eq!(report.band, LegitimacyBand::Strained);
    assert!(report.effects.forced_acknowledgment);
    assert_eq!(engine.legitimacy_summary().await.open_remedies, 1);
}

#[tokio::test]
async fn test_single_appeal_goes_to_a_fresh_panel() {
    let engine = engine();
    let (task, statement) = injected(&engine).await;
    let case_id = engine.case_for_statement(&statement.id).unwrap();
    let original = decide(&engine, &case_id, Finding::Illegitimate).await;

    let empty = AppealGrounds::new(GroundsKind::NewFacts, "  ");
    let err = engine
        .file_appeal("steward", &case_id, empty)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "appeal_without_grounds");

    let grounds = AppealGrounds::new(
        GroundsKind::NewFacts,
        "exec-b was subcontracted by exec-a in writing",
    );
    let appeal = engine
        .file_appeal("steward", &case_id, grounds.clone())
        .await
        .unwrap();
    assert!(appeal.panel.iter().all(|m| !original.panel.contains(m)));
    assert_eq!(engine.case(&case_id).await.unwrap().status, CaseStatus::Appealed);

    let again = engine.file_appeal("steward", &case_id, grounds).await.unwrap_err();
    assert_eq!(again.code(), "appeal_already_filed");

    decide(&engine, &appeal.id, Finding::LegitimateWithConcerns).await;

    assert_eq!(engine.case(&case_id).await.unwrap().status, CaseStatus::Final);
    assert_eq!(engine.task(&task.id).await.unwrap().state, TaskState::InProgress);
    assert_eq!(engine.band().await, LegitimacyBand::Stable);
    // Disclosure remedy from the ruling.
    assert_eq!(engine.legitimacy_summary().await.open_remedies, 1);
}

#[tokio::test]
async fn test_silence_reference_dropped_once_task_settles() {
    let engine = engine();
    let task = routed(&engine, "Inspect the lock gates", &["exec-a"]).await;

    let report = engine
        .advance_cycle(Utc::now() + Duration::hours(49))
        .await
        .unwrap();
    assert!(report
        .statements
        .iter()
        .any(|s| s.kind == ViolationKind::SilenceTimeout && s.subject_id == task.id));
    assert_eq!(engine.detector().reported().len(), 1);

    let task = engine.accept("exec-a", &task.id, task.version).await.unwrap();
    let task = engine.start("exec-a", &task.id, task.version).await.unwrap();
    let task = engine
        .report("exec-a", &task.id, task.version, finished(&task, "exec-a"))
        .await
        .unwrap();
    let task = engine.aggregate("delegator", &task.id, task.version).await.unwrap();
    engine.complete("delegator", &task.id, task.version).await.unwrap();

    engine
        .advance_cycle(Utc::now() + Duration::hours(50))
        .await
        .unwrap();
    assert!(engine.detector().reported().is_empty());
}

#[tokio::test]
async fn test_tampered_witness_record_fails_the_system() {
    let engine = engine();
    injected(&engine).await;

    let mut records: Vec<LedgerRecord<WitnessStatement>> = engine
        .witness_ledger()
        .snapshot()
        .iter()
        .map(|r| (**r).clone())
        .collect();
    if let charter::RecordBody::Entry(statement) = &mut records[0].body {
        statement.detail = "nothing happened".to_string();
    }

    engine.audit_witness_records(&records).await.unwrap();
    assert_eq!(engine.band().await, LegitimacyBand::Failed);

    let err = engine.authorize_task("delegator", "Anything").await.unwrap_err();
    assert_eq!(err.code(), "cessation_required");
}

// ============================================================================
// Agenda Controller
// ============================================================================

#[tokio::test]
async fn test_single_realm_flood_schedules_one_motion() {
    let engine = engine();
    for i in 1..=5 {
        engine
            .submit_motion(
                "steward",
                MotionDraft::new(format!("Water motion {}", i), "water", "Proposed"),
            )
            .await
            .unwrap();
    }

    let report = engine.advance_cycle(Utc::now()).await.unwrap();
    let agenda = &report.agenda;

    assert_eq!(agenda.in_band(PriorityBand::Quota).len(), 1);
    let deferrals: Vec<_> = agenda
        .transparency
        .deferrals
        .iter()
        .filter(|d| d.reason == REALM_QUOTA_EXCEEDED)
        .collect();
    assert_eq!(deferrals.len(), 4);
    assert!(deferrals.iter().all(|d| d.deferral_count == 1));
    assert_eq!(engine.capacity().open_deferrals().await.len(), 4);
}

#[tokio::test]
async fn test_realm_quota_bounds_new_motions() {
    let engine = engine();
    let realms = ["water", "water", "water", "roads", "roads", "parks", "parks"];
    for (i, realm) in realms.iter().enumerate() {
        engine
            .submit_motion("steward", MotionDraft::new(format!("Motion {}", i), *realm, "Proposed"))
            .await
            .unwrap();
    }

    let report = engine.advance_cycle(Utc::now()).await.unwrap();
    let scheduled = report.agenda.in_band(PriorityBand::Quota).len();
    let deferred = report
        .agenda
        .transparency
        .deferrals
        .iter()
        .filter(|d| d.reason == REALM_QUOTA_EXCEEDED)
        .count();

    assert!(scheduled <= 3);
    assert_eq!(scheduled + deferred, realms.len());

    // Deferred motions come back ahead of new ones.
    let next = engine.advance_cycle(Utc::now()).await.unwrap();
    assert!(!next.agenda.in_band(PriorityBand::Deferred).is_empty());
}

#[tokio::test]
async fn test_forced_band_survives_minimal_capacity() {
    let engine = engine();
    let now = Utc::now();
    engine
        .declare_capacity("programs", CapacitySource::ProgramSlots, 1, now, now + Duration::days(30))
        .await
        .unwrap();

    let candidates = vec!["exec-a".to_string(), "exec-b".to_string()];
    for title in ["Grade the track", "Drain the pond", "Fence the paddock"] {
        let task = engine.authorize_task("delegator", title).await.unwrap();
        let task = engine
            .activate("delegator", &task.id, task.version, activation(&task))
            .await
            .unwrap();
        engine
            .auto_route("router", &task.id, task.version, &candidates, 1)
            .await
            .unwrap();
    }
    engine
        .submit_motion("steward", MotionDraft::new("Resurface the road", "roads", "Proposed"))
        .await
        .unwrap();

    let report = engine.advance_cycle(now).await.unwrap();
    let forced = report.agenda.in_band(PriorityBand::Forced);

    assert_eq!(forced.len(), 3);
    assert_eq!(report.agenda.transparency.capacity, 1);
    assert!(report.agenda.in_band(PriorityBand::Quota).is_empty());
}

#[tokio::test]
async fn test_public_agenda_redacts_motion_bodies() {
    let engine = engine();
    engine
        .submit_motion(
            "steward",
            MotionDraft::new("Dredge the canal", "water", "Internal cost estimate: 40k"),
        )
        .await
        .unwrap();
    let report = engine.advance_cycle(Utc::now()).await.unwrap();

    let public = serde_json::to_string(&report.agenda.public_summary()).unwrap();
    assert!(public.contains("Dredge the canal"));
    assert!(!public.contains("40k"));
}

// ============================================================================
// Legitimacy and Capacity Ledgers
// ============================================================================

#[tokio::test]
async fn test_three_minor_triggers_decay_once() {
    let engine = engine();
    for i in 0..3 {
        engine
            .legitimacy()
            .record_trigger(
                TriggerKind::UnrecordedWrite,
                TriggerWeight::Minor,
                None,
                vec![],
                format!("write {} lost", i),
            )
            .await
            .unwrap();
    }

    assert_eq!(engine.band().await, LegitimacyBand::Strained);
    let decays = engine
        .legitimacy()
        .ledger()
        .entries()
        .iter()
        .filter(|e| matches!(e.kind, LegitimacyEntryKind::AutomaticDecay { .. }))
        .count();
    assert_eq!(decays, 1);
}

#[tokio::test]
async fn test_repeat_over_declaration_weighs_more() {
    let engine = engine();
    let now = Utc::now();
    let declaration = engine
        .declare_capacity("programs", CapacitySource::ProgramSlots, 6, now, now + Duration::days(30))
        .await
        .unwrap();

    let first = engine.report_delivery(&declaration.id, 2).await.unwrap().unwrap();
    assert_eq!(first.occurrences, 1);
    assert_eq!(engine.band().await, LegitimacyBand::Stable);

    let second = engine.report_delivery(&declaration.id, 3).await.unwrap().unwrap();
    assert_eq!(second.occurrences, 2);
    assert_eq!(engine.band().await, LegitimacyBand::Strained);

    assert!(engine.report_delivery(&declaration.id, 6).await.unwrap().is_none());
}

#[tokio::test]
async fn test_ledgers_only_grow() {
    let engine = engine();
    let history = engine.registry().history_ledger();

    let task = routed(&engine, "Trim the hedges", &["exec-a"]).await;
    let first: Vec<(u64, String)> = history
        .snapshot()
        .iter()
        .map(|r| (r.seq, r.digest.clone()))
        .collect();

    engine.accept("exec-a", &task.id, task.version).await.unwrap();
    engine.advance_cycle(Utc::now()).await.unwrap();

    let second: Vec<(u64, String)> = history
        .snapshot()
        .iter()
        .map(|r| (r.seq, r.digest.clone()))
        .collect();
    assert!(second.len() > first.len());
    assert_eq!(&second[..first.len()], &first[..]);
    assert!(second.windows(2).all(|w| w[1].0 == w[0].0 + 1));
    assert!(history.snapshot().iter().all(|r| r.verify()));
}

#[tokio::test]
async fn test_failing_sink_surfaces_unrecorded_write() {
    let mut config = EngineConfig::default();
    config.ledger.sink_retry_attempts = 0;
    config.ledger.sink_retry_delay_ms = 1;
    let engine = EngineBuilder::new()
        .config(config)
        .panel_seed(7)
        .with_history_sink(Arc::new(FailingSink))
        .build()
        .unwrap();
    seed_actors(&engine);

    let err = engine
        .authorize_task("delegator", "Count the sheep")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unrecorded");
    assert_eq!(unrecorded_triggers(&engine), 1);
}

#[tokio::test]
async fn test_failed_containment_blocks_task_until_retried() {
    let mut config = EngineConfig::default();
    config.ledger.sink_retry_attempts = 0;
    config.ledger.sink_retry_delay_ms = 1;
    let sink = Arc::new(QuarantineRefusingSink {
        failing: AtomicBool::new(true),
    });
    let engine = EngineBuilder::new()
        .config(config)
        .panel_seed(7)
        .with_history_sink(sink.clone())
        .build()
        .unwrap();
    seed_actors(&engine);

    let (task, statement) = injected(&engine).await;
    assert!(statement.containment);
    assert_eq!(engine.unenforced(), vec![statement.id.clone()]);
    assert!(engine.containment(&statement.id).is_none());
    assert!(engine.case_for_statement(&statement.id).is_none());

    // The violating work cannot proceed while the hold is missing.
    let current = engine.task(&task.id).await.unwrap();
    assert_eq!(current.state, TaskState::InProgress);
    let err = engine
        .report("exec-a", &current.id, current.version, finished(&current, "exec-a"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "containment_pending");

    engine.advance_cycle(Utc::now()).await.unwrap();
    assert_eq!(engine.task(&task.id).await.unwrap().state, TaskState::InProgress);
    assert_eq!(engine.unenforced(), vec![statement.id.clone()]);
    assert!(unrecorded_triggers(&engine) >= 2);

    sink.failing.store(false, Ordering::SeqCst);
    engine.advance_cycle(Utc::now()).await.unwrap();

    assert!(engine.unenforced().is_empty());
    assert_eq!(engine.task(&task.id).await.unwrap().state, TaskState::Quarantined);
    assert_eq!(
        engine.containment(&statement.id).unwrap().status,
        ContainmentStatus::Held
    );
    assert!(engine.case_for_statement(&statement.id).is_some());
}

// ============================================================================
// Cycle Orchestration
// ============================================================================

#[tokio::test]
async fn test_strained_band_forces_acknowledgment_item() {
    let engine = engine();
    engine
        .legitimacy()
        .record_trigger(
            TriggerKind::IllegitimateFinding,
            TriggerWeight::Major,
            None,
            vec![],
            "test finding",
        )
        .await
        .unwrap();

    let report = engine.advance_cycle(Utc::now()).await.unwrap();
    assert!(report
        .agenda
        .in_band(PriorityBand::Forced)
        .iter()
        .any(|i| i.title.to_lowercase().contains("acknowledg")));

    engine.acknowledge("steward").await.unwrap();
    assert!(!engine.legitimacy().effects().await.forced_acknowledgment);
}

#[tokio::test]
async fn test_event_stream_reports_containment_and_cycle() {
    use conclave::EngineEvent;
    use futures::StreamExt;

    let engine = engine();
    let events = engine.event_stream();
    injected(&engine).await;
    engine.advance_cycle(Utc::now()).await.unwrap();

    let seen: Vec<EngineEvent> = events
        .take_while(|e| futures::future::ready(!matches!(e, EngineEvent::CycleAdvanced { .. })))
        .collect()
        .await;
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::Contained(_))));
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::CaseOpened { .. })));
    assert!(seen.iter().any(|e| matches!(e, EngineEvent::AgendaPublished(_))));
}
