//! Task registry - per-task ownership under optimistic versioning.
//!
//! Each task sits behind its own mutex; there is no lock spanning tasks.
//! Every operation records its event in the task-history ledger *before*
//! mutating the task, so a failed append leaves the task untouched.
//! Refused attempts are recorded too, as [`LifecycleEventKind::Rejected`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use charter::{Actor, AppendOnlyLedger, Capability, CharterError, LedgerRecord};

use crate::contract::{ActivationRecord, ResultRecord};
use crate::eligibility::EligibilityBook;
use crate::event::{LifecycleEvent, LifecycleEventKind, RejectionKind, RoutingMode, TransitionCause};
use crate::state::TaskState;
use crate::task::{Acceptance, QuarantineHold, Routing, Task};
use crate::types::{LifecycleError, Result};

/// Actor id recorded for containment, release and nullification.
pub const CONTAINMENT_AUTHORITY: &str = "enforcement";

/// Name of the task-history ledger.
pub const HISTORY_LEDGER: &str = "task_history";

/// A task whose activation response window has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueTask {
    pub task_id: String,
    pub state: TaskState,
    pub activation_id: String,
    pub deadline: DateTime<Utc>,
}

/// Owns every task and the task-history ledger.
pub struct TaskRegistry {
    /// Tasks by id
    tasks: DashMap<String, Arc<Mutex<Task>>>,
    /// Task-history ledger
    history: Arc<AppendOnlyLedger<LifecycleEvent>>,
    /// Executor weighting
    eligibility: Arc<EligibilityBook>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Registry with an in-memory history ledger.
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(AppendOnlyLedger::new(HISTORY_LEDGER)))
    }

    /// Registry writing to the given history ledger.
    pub fn with_ledger(history: Arc<AppendOnlyLedger<LifecycleEvent>>) -> Self {
        Self {
            tasks: DashMap::new(),
            history,
            eligibility: Arc::new(EligibilityBook::new()),
        }
    }

    pub fn history_ledger(&self) -> Arc<AppendOnlyLedger<LifecycleEvent>> {
        Arc::clone(&self.history)
    }

    pub fn eligibility(&self) -> Arc<EligibilityBook> {
        Arc::clone(&self.eligibility)
    }

    /// Subscribe to recorded lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LedgerRecord<LifecycleEvent>>> {
        self.history.subscribe()
    }

    fn handle(&self, task_id: &str) -> Result<Arc<Mutex<Task>>> {
        self.tasks
            .get(task_id)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| LifecycleError::NotFound(task_id.to_string()))
    }

    /// Snapshot of one task.
    pub async fn get(&self, task_id: &str) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let task = handle.lock().await;
        Ok(task.clone())
    }

    /// Snapshot of every task, ordered by creation.
    pub async fn list(&self) -> Vec<Task> {
        let handles: Vec<Arc<Mutex<Task>>> =
            self.tasks.iter().map(|t| Arc::clone(t.value())).collect();
        let mut tasks = Vec::with_capacity(handles.len());
        for handle in handles {
            tasks.push(handle.lock().await.clone());
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks awaiting an executor past their response deadline.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<OverdueTask> {
        self.list()
            .await
            .into_iter()
            .filter_map(|task| {
                let deadline = task.response_deadline()?;
                let activation = task.current_activation()?;
                (deadline <= now).then(|| OverdueTask {
                    task_id: task.id.clone(),
                    state: task.state,
                    activation_id: activation.id.clone(),
                    deadline,
                })
            })
            .collect()
    }

    // ========== Bookkeeping ==========

    async fn reject(
        &self,
        task: &Task,
        actor_id: &str,
        attempted: TaskState,
        rejection: RejectionKind,
        err: LifecycleError,
    ) -> LifecycleError {
        let event = LifecycleEvent::new(
            &task.id,
            actor_id,
            LifecycleEventKind::Rejected {
                from: task.state,
                attempted,
                rejection,
                detail: err.to_string(),
            },
        );
        if let Err(e) = self.history.append(event).await {
            error!(task_id = %task.id, error = %e, "Rejected attempt could not be recorded");
        }
        warn!(
            task_id = %task.id,
            actor_id = %actor_id,
            rejection = rejection.as_str(),
            error = %err,
            "Lifecycle attempt rejected"
        );
        err
    }

    /// Capability, ownership and version checks shared by caller operations.
    async fn guard(
        &self,
        task: &Task,
        actor: &Actor,
        capability: Capability,
        owner_only: bool,
        expected_version: u64,
        attempted: TaskState,
    ) -> Result<()> {
        let authorized = actor
            .require(capability)
            .and_then(|_| {
                if owner_only && actor.id != task.delegator_id {
                    Err(CharterError::Unauthorized {
                        actor_id: actor.id.clone(),
                        capability,
                    })
                } else {
                    Ok(())
                }
            });
        if let Err(e) = authorized {
            return Err(self
                .reject(task, &actor.id, attempted, RejectionKind::Unauthorized, e.into())
                .await);
        }

        if task.version != expected_version {
            let err = LifecycleError::VersionConflict {
                task_id: task.id.clone(),
                expected: expected_version,
                actual: task.version,
            };
            return Err(self
                .reject(task, &actor.id, attempted, RejectionKind::VersionConflict, err)
                .await);
        }
        Ok(())
    }

    async fn check_edge(&self, task: &Task, actor_id: &str, to: TaskState) -> Result<()> {
        if task.state.can_transition_to(to) {
            return Ok(());
        }
        let err = LifecycleError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.state,
            to,
        };
        Err(self
            .reject(task, actor_id, to, RejectionKind::InvalidTransition, err)
            .await)
    }

    async fn invalid(
        &self,
        task: &Task,
        actor_id: &str,
        attempted: TaskState,
        err: LifecycleError,
    ) -> LifecycleError {
        self.reject(task, actor_id, attempted, RejectionKind::ValidationFailed, err)
            .await
    }

    /// Record the transition, then apply it.
    async fn commit(
        &self,
        task: &mut Task,
        actor_id: &str,
        to: TaskState,
        cause: TransitionCause,
    ) -> Result<u64> {
        let from = (!task.history.is_empty()).then_some(task.state);
        let event = LifecycleEvent::new(
            &task.id,
            actor_id,
            LifecycleEventKind::Transitioned {
                from,
                to,
                version: task.version + 1,
                cause: cause.clone(),
            },
        );
        let at = event.at;
        let record = self.history.append(event).await?;
        task.apply(record.seq, to, actor_id, cause, at);

        info!(
            task_id = %task.id,
            actor_id = %actor_id,
            from = from.map(|s| s.as_str()).unwrap_or("-"),
            to = to.as_str(),
            version = task.version,
            seq = record.seq,
            "Task transitioned"
        );
        Ok(record.seq)
    }

    // ========== Delegator operations ==========

    /// Authorize a new task owned by the calling delegator.
    pub async fn authorize(&self, actor: &Actor, title: impl Into<String>) -> Result<Task> {
        actor.require(Capability::AuthorizeTask)?;
        let title = title.into();
        if title.trim().is_empty() {
            return Err(LifecycleError::validation("missing_title", "task title is empty"));
        }

        let mut task = Task::new(uuid::Uuid::new_v4().to_string(), title.clone(), actor.id.clone());
        self.commit(
            &mut task,
            &actor.id,
            TaskState::Authorized,
            TransitionCause::Authorization { title },
        )
        .await?;

        let snapshot = task.clone();
        self.tasks
            .insert(task.id.clone(), Arc::new(Mutex::new(task)));
        Ok(snapshot)
    }

    /// Issue an activation, or reissue one after every executor declined.
    pub async fn activate(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: u64,
        activation: ActivationRecord,
    ) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Activated;

        self.guard(&task, actor, Capability::ActivateTask, true, expected_version, to)
            .await?;
        self.check_edge(&task, &actor.id, to).await?;

        if activation.task_id != task.id {
            let err = LifecycleError::validation(
                "activation_task_mismatch",
                format!("activation names task {}", activation.task_id),
            );
            return Err(self.invalid(&task, &actor.id, to, err).await);
        }
        if let Err(err) = activation.validate() {
            return Err(self.invalid(&task, &actor.id, to, err).await);
        }

        let reactivation = task.state == TaskState::Declined;
        if reactivation {
            let unchanged = task
                .current_activation()
                .map(|prev| prev.constraint_set() == activation.constraint_set())
                .unwrap_or(false);
            if unchanged {
                let err = LifecycleError::validation(
                    "constraints_unchanged",
                    "reactivation must modify the declined constraints",
                );
                return Err(self.invalid(&task, &actor.id, to, err).await);
            }
        }

        let cause = TransitionCause::Activation {
            activation_id: activation.id.clone(),
            reactivation,
        };
        self.commit(&mut task, &actor.id, to, cause).await?;
        task.activations.push(activation);
        task.routing = None;
        task.acceptance = None;
        task.executor_id = None;
        Ok(task.clone())
    }

    /// Aggregate reported results.
    pub async fn aggregate(&self, actor: &Actor, task_id: &str, expected_version: u64) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Aggregated;

        self.guard(&task, actor, Capability::AggregateResults, true, expected_version, to)
            .await?;
        self.check_edge(&task, &actor.id, to).await?;

        let cause = TransitionCause::Aggregation {
            result_count: task.results.len(),
        };
        self.commit(&mut task, &actor.id, to, cause).await?;
        Ok(task.clone())
    }

    /// Close the task once exit criteria are met.
    pub async fn complete(&self, actor: &Actor, task_id: &str, expected_version: u64) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Completed;

        self.guard(&task, actor, Capability::CompleteTask, true, expected_version, to)
            .await?;
        self.check_edge(&task, &actor.id, to).await?;

        let result_id = match task.latest_result() {
            Some(result) if result.status.satisfies_exit() => result.id.clone(),
            Some(result) => {
                let err = LifecycleError::validation(
                    "exit_criteria_unmet",
                    format!("latest result is {}", result.status.as_str()),
                );
                return Err(self.invalid(&task, &actor.id, to, err).await);
            }
            None => {
                let err = LifecycleError::validation("exit_criteria_unmet", "no result reported");
                return Err(self.invalid(&task, &actor.id, to, err).await);
            }
        };

        self.commit(&mut task, &actor.id, to, TransitionCause::Completion { result_id })
            .await?;
        Ok(task.clone())
    }

    // ========== Routing ==========

    /// Route an activated task to one or more executors.
    pub async fn route(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: u64,
        executors: Vec<String>,
        mode: RoutingMode,
    ) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Routed;

        self.guard(&task, actor, Capability::RouteTask, false, expected_version, to)
            .await?;
        self.check_edge(&task, &actor.id, to).await?;

        let mut unique: Vec<String> = Vec::with_capacity(executors.len());
        for executor in executors {
            if !unique.contains(&executor) {
                unique.push(executor);
            }
        }
        if unique.is_empty() {
            let err = LifecycleError::validation("no_executors", "routing names no executors");
            return Err(self.invalid(&task, &actor.id, to, err).await);
        }

        let cause = TransitionCause::Routing {
            executors: unique.clone(),
            mode,
        };
        self.commit(&mut task, &actor.id, to, cause).await?;
        task.routing = Some(Routing {
            executors: unique,
            mode,
            routed_by: actor.id.clone(),
            declined: Default::default(),
        });
        Ok(task.clone())
    }

    // ========== Executor operations ==========

    async fn require_routed(&self, task: &Task, actor: &Actor, attempted: TaskState) -> Result<()> {
        let open = task
            .routing
            .as_ref()
            .map(|r| r.is_open_to(&actor.id))
            .unwrap_or(false);
        if open {
            return Ok(());
        }
        let err = LifecycleError::validation(
            "unrouted_executor",
            format!("{} is not awaiting a response on this task", actor.id),
        );
        Err(self
            .reject(task, &actor.id, attempted, RejectionKind::UnroutedExecutor, err)
            .await)
    }

    /// Explicitly accept a routed task.
    pub async fn accept(&self, actor: &Actor, task_id: &str, expected_version: u64) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Accepted;

        self.guard(&task, actor, Capability::ExecuteTask, false, expected_version, to)
            .await?;
        self.check_edge(&task, &actor.id, to).await?;
        self.require_routed(&task, actor, to).await?;

        let cause = TransitionCause::Acceptance {
            executor_id: actor.id.clone(),
        };
        let seq = self.commit(&mut task, &actor.id, to, cause).await?;
        task.acceptance = Some(Acceptance {
            executor_id: actor.id.clone(),
            accepted_at: Utc::now(),
            event_seq: seq,
        });
        task.executor_id = Some(actor.id.clone());
        Ok(task.clone())
    }

    /// Decline a routed task. Eligibility is never consulted or changed.
    ///
    /// Once every routed executor has declined the task moves to `declined`.
    pub async fn decline(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: u64,
        reason: impl Into<String>,
    ) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Declined;
        let reason = reason.into();

        self.guard(&task, actor, Capability::ExecuteTask, false, expected_version, to)
            .await?;
        self.check_edge(&task, &actor.id, to).await?;
        self.require_routed(&task, actor, to).await?;

        let Some(mut routing) = task.routing.clone() else {
            return Err(LifecycleError::validation("unrouted_executor", "task has no routing"));
        };
        routing.declined.insert(actor.id.clone(), reason.clone());
        let awaiting = routing.awaiting();

        if awaiting.is_empty() {
            let cause = TransitionCause::AllDeclined {
                declines: routing.declined.clone(),
            };
            self.commit(&mut task, &actor.id, to, cause).await?;
        } else {
            let event = LifecycleEvent::new(
                &task.id,
                &actor.id,
                LifecycleEventKind::DeclineRecorded {
                    executor_id: actor.id.clone(),
                    reason,
                    version: task.version + 1,
                    awaiting: awaiting.clone(),
                },
            );
            let at = event.at;
            self.history.append(event).await?;
            task.touch(at);
            info!(
                task_id = %task.id,
                executor_id = %actor.id,
                awaiting = awaiting.len(),
                "Decline recorded"
            );
        }
        task.routing = Some(routing);
        Ok(task.clone())
    }

    /// Begin work. Requires an acceptance recorded by the same executor.
    pub async fn start(&self, actor: &Actor, task_id: &str, expected_version: u64) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::InProgress;

        self.guard(&task, actor, Capability::ExecuteTask, false, expected_version, to)
            .await?;

        let acceptance_seq = match &task.acceptance {
            Some(a) if a.executor_id == actor.id && !task.state.precedes_acceptance() => a.event_seq,
            _ => {
                let err = LifecycleError::MissingAcceptance {
                    task_id: task.id.clone(),
                    actor_id: actor.id.clone(),
                };
                return Err(self
                    .reject(&task, &actor.id, to, RejectionKind::MissingAcceptance, err)
                    .await);
            }
        };
        self.check_edge(&task, &actor.id, to).await?;

        self.commit(&mut task, &actor.id, to, TransitionCause::Start { acceptance_seq })
            .await?;
        Ok(task.clone())
    }

    /// Submit a result. Only the accepting executor may report.
    pub async fn report(
        &self,
        actor: &Actor,
        task_id: &str,
        expected_version: u64,
        result: ResultRecord,
    ) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;
        let to = TaskState::Reported;

        self.guard(&task, actor, Capability::ExecuteTask, false, expected_version, to)
            .await?;

        let provenance = if result.executor_id != actor.id {
            Err(format!(
                "submitted by {} on behalf of {}",
                actor.id, result.executor_id
            ))
        } else if task.executor_id.as_deref() != Some(actor.id.as_str()) {
            Err(format!("{} never accepted this task", actor.id))
        } else if result.task_id != task.id {
            Err(format!("result names task {}", result.task_id))
        } else {
            Ok(())
        };
        if let Err(detail) = provenance {
            let err = LifecycleError::ResultWithoutProvenance {
                task_id: task.id.clone(),
                detail,
            };
            return Err(self
                .reject(&task, &actor.id, to, RejectionKind::ResultWithoutProvenance, err)
                .await);
        }
        self.check_edge(&task, &actor.id, to).await?;

        let success = task
            .current_activation()
            .map(|a| a.success.clone())
            .unwrap_or_default();
        let undeclared = match result.validate(&success) {
            Ok(undeclared) => undeclared,
            Err(err) => return Err(self.invalid(&task, &actor.id, to, err).await),
        };

        let cause = TransitionCause::Report {
            result_id: result.id.clone(),
            status: result.status,
            undeclared_deliverables: undeclared,
        };
        self.commit(&mut task, &actor.id, to, cause).await?;
        self.eligibility.record_outcome(&actor.id, result.status);
        task.results.push(result);
        Ok(task.clone())
    }

    // ========== Containment ==========

    /// Place a reversible hold on the task.
    ///
    /// The one transition that ignores caller versions; it applies against
    /// whatever state the task holds when the lock is taken.
    pub async fn quarantine(&self, task_id: &str, statement_id: &str) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;

        if !task.state.is_containable() {
            return Err(LifecycleError::NotContainable {
                task_id: task.id.clone(),
                state: task.state,
            });
        }

        let previous_state = task.state;
        let cause = TransitionCause::Containment {
            statement_id: statement_id.to_string(),
        };
        self.commit(&mut task, CONTAINMENT_AUTHORITY, TaskState::Quarantined, cause)
            .await?;
        task.quarantine = Some(QuarantineHold {
            statement_id: statement_id.to_string(),
            previous_state,
            since: Utc::now(),
        });
        Ok(task.clone())
    }

    fn held_under<'a>(task: &'a Task, statement_id: &str) -> Result<&'a QuarantineHold> {
        match &task.quarantine {
            Some(hold) if task.state == TaskState::Quarantined && hold.statement_id == statement_id => {
                Ok(hold)
            }
            Some(hold) => Err(LifecycleError::QuarantineMismatch {
                task_id: task.id.clone(),
                held: hold.statement_id.clone(),
                requested: statement_id.to_string(),
            }),
            None => Err(LifecycleError::validation(
                "not_quarantined",
                format!("task {} is {}", task.id, task.state),
            )),
        }
    }

    /// Lift a hold, restoring the pre-quarantine state.
    pub async fn release(&self, task_id: &str, case_id: &str, statement_id: &str) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;

        let previous = Self::held_under(&task, statement_id)?.previous_state;
        let cause = TransitionCause::Release {
            case_id: case_id.to_string(),
            statement_id: statement_id.to_string(),
        };
        self.commit(&mut task, CONTAINMENT_AUTHORITY, previous, cause).await?;
        task.quarantine = None;
        Ok(task.clone())
    }

    /// Void a quarantined task.
    pub async fn nullify(&self, task_id: &str, case_id: &str, statement_id: &str) -> Result<Task> {
        let handle = self.handle(task_id)?;
        let mut task = handle.lock().await;

        Self::held_under(&task, statement_id)?;
        let cause = TransitionCause::Nullification {
            case_id: case_id.to_string(),
            statement_id: statement_id.to_string(),
        };
        self.commit(&mut task, CONTAINMENT_AUTHORITY, TaskState::Nullified, cause)
            .await?;
        Ok(task.clone())
    }
}
