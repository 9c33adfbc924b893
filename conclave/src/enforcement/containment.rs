//! Containment stage - reversible holds, each explained by a statement id.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lifecycle::{LifecycleError, Task, TaskRegistry, TaskState};

use super::statement::WitnessStatement;
use crate::types::EnforcementError;

/// Where a hold stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentStatus {
    Held,
    Released,
    Nullified,
}

/// A hold placed on a task because of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainmentRecord {
    /// Statement that triggered the hold
    pub statement_id: String,
    /// Held task
    pub task_id: String,
    /// State to restore on release
    pub previous_state: TaskState,
    pub applied_at: DateTime<Utc>,
    /// A finding must be issued by this time
    pub review_due: DateTime<Utc>,
    pub status: ContainmentStatus,
    /// Case that released or nullified the hold
    pub resolved_by: Option<String>,
}

/// Every hold the pipeline has placed.
pub struct ContainmentRegistry {
    /// Holds by statement id
    records: DashMap<String, ContainmentRecord>,
    /// Review SLA
    review_sla: Duration,
}

impl ContainmentRegistry {
    pub fn new(review_sla_secs: u64) -> Self {
        Self {
            records: DashMap::new(),
            review_sla: charter::window(review_sla_secs),
        }
    }

    pub fn get(&self, statement_id: &str) -> Option<ContainmentRecord> {
        self.records.get(statement_id).map(|r| r.value().clone())
    }

    /// Holds still in force.
    pub fn held(&self) -> Vec<ContainmentRecord> {
        let mut held: Vec<ContainmentRecord> = self
            .records
            .iter()
            .filter(|r| r.status == ContainmentStatus::Held)
            .map(|r| r.value().clone())
            .collect();
        held.sort_by(|a, b| a.applied_at.cmp(&b.applied_at));
        held
    }

    /// Holds past their review SLA.
    pub fn overdue_reviews(&self, now: DateTime<Utc>) -> Vec<ContainmentRecord> {
        self.held()
            .into_iter()
            .filter(|r| r.review_due <= now)
            .collect()
    }

    /// Quarantine the statement's task.
    ///
    /// Returns `None` when the task is not in a containable state; the
    /// statement still stands and goes to review like any other.
    pub async fn contain(
        &self,
        registry: &TaskRegistry,
        statement: &WitnessStatement,
    ) -> Result<Option<ContainmentRecord>, EnforcementError> {
        let task = match registry.quarantine(&statement.subject_id, &statement.id).await {
            Ok(task) => task,
            Err(LifecycleError::NotContainable { state, .. }) => {
                warn!(
                    statement_id = %statement.id,
                    task_id = %statement.subject_id,
                    state = state.as_str(),
                    "Task not containable; statement stands without a hold"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(hold) = task.quarantine.as_ref() else {
            return Ok(None);
        };
        let record = ContainmentRecord {
            statement_id: statement.id.clone(),
            task_id: task.id.clone(),
            previous_state: hold.previous_state,
            applied_at: hold.since,
            review_due: hold.since + self.review_sla,
            status: ContainmentStatus::Held,
            resolved_by: None,
        };
        self.records.insert(statement.id.clone(), record.clone());

        info!(
            statement_id = %statement.id,
            task_id = %task.id,
            previous_state = hold.previous_state.as_str(),
            "Task contained"
        );
        Ok(Some(record))
    }

    fn require_held(&self, statement_id: &str) -> Result<ContainmentRecord, EnforcementError> {
        match self.get(statement_id) {
            Some(record) if record.status == ContainmentStatus::Held => Ok(record),
            _ => Err(EnforcementError::NotContained(statement_id.to_string())),
        }
    }

    fn resolve(&self, statement_id: &str, status: ContainmentStatus, case_id: &str) {
        if let Some(mut record) = self.records.get_mut(statement_id) {
            record.status = status;
            record.resolved_by = Some(case_id.to_string());
        }
    }

    /// Lift the hold, restoring the pre-quarantine state.
    pub async fn release(
        &self,
        registry: &TaskRegistry,
        statement_id: &str,
        case_id: &str,
    ) -> Result<Task, EnforcementError> {
        let record = self.require_held(statement_id)?;
        let task = registry.release(&record.task_id, case_id, statement_id).await?;
        self.resolve(statement_id, ContainmentStatus::Released, case_id);
        info!(statement_id = %statement_id, task_id = %task.id, case_id = %case_id, "Hold released");
        Ok(task)
    }

    /// Void the held task.
    pub async fn nullify(
        &self,
        registry: &TaskRegistry,
        statement_id: &str,
        case_id: &str,
    ) -> Result<Task, EnforcementError> {
        let record = self.require_held(statement_id)?;
        let task = registry.nullify(&record.task_id, case_id, statement_id).await?;
        self.resolve(statement_id, ContainmentStatus::Nullified, case_id);
        warn!(statement_id = %statement_id, task_id = %task.id, case_id = %case_id, "Task nullified");
        Ok(task)
    }

    pub fn is_held(&self, statement_id: &str) -> bool {
        self.require_held(statement_id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::statement::{SubjectKind, ViolationKind};
    use charter::{Actor, Role};
    use lifecycle::{ActivationRecord, RoutingMode};

    async fn working_task(registry: &TaskRegistry) -> Task {
        let delegator = Actor::new("delegator", "Delegator").with_role(Role::Delegator);
        let router = Actor::new("router", "Router").with_role(Role::Router);
        let executor = Actor::new("exec-1", "Executor").with_role(Role::Executor);
        let task = registry.authorize(&delegator, "Survey").await.unwrap();
        let activation =
            ActivationRecord::new(&task.id, "Survey", chrono::Duration::hours(4)).with_deliverable("report");
        let task = registry.activate(&delegator, &task.id, task.version, activation).await.unwrap();
        let task = registry
            .route(&router, &task.id, task.version, vec!["exec-1".into()], RoutingMode::Explicit)
            .await
            .unwrap();
        let task = registry.accept(&executor, &task.id, task.version).await.unwrap();
        registry.start(&executor, &task.id, task.version).await.unwrap()
    }

    fn statement(task_id: &str) -> WitnessStatement {
        WitnessStatement::new(task_id, SubjectKind::Task, ViolationKind::ResultInjection, "injected")
    }

    #[tokio::test]
    async fn test_contain_then_release_restores_state() {
        let registry = TaskRegistry::new();
        let containment = ContainmentRegistry::new(3600);
        let task = working_task(&registry).await;
        let statement = statement(&task.id);

        let record = containment.contain(&registry, &statement).await.unwrap().unwrap();
        assert_eq!(record.previous_state, TaskState::InProgress);
        assert_eq!(registry.get(&task.id).await.unwrap().state, TaskState::Quarantined);
        assert_eq!(containment.held().len(), 1);

        let task = containment.release(&registry, &statement.id, "case-1").await.unwrap();
        assert_eq!(task.state, TaskState::InProgress);
        assert_eq!(containment.get(&statement.id).unwrap().status, ContainmentStatus::Released);

        let err = containment.release(&registry, &statement.id, "case-1").await.unwrap_err();
        assert_eq!(err.code(), "not_contained");
    }

    #[tokio::test]
    async fn test_uncontainable_task_yields_no_hold() {
        let registry = TaskRegistry::new();
        let containment = ContainmentRegistry::new(3600);
        let delegator = Actor::new("delegator", "Delegator").with_role(Role::Delegator);
        let task = registry.authorize(&delegator, "Survey").await.unwrap();

        assert!(containment.contain(&registry, &statement(&task.id)).await.unwrap().is_none());
        assert!(containment.held().is_empty());
    }

    #[tokio::test]
    async fn test_overdue_reviews() {
        let registry = TaskRegistry::new();
        let containment = ContainmentRegistry::new(60);
        let task = working_task(&registry).await;
        containment.contain(&registry, &statement(&task.id)).await.unwrap();

        assert!(containment.overdue_reviews(Utc::now()).is_empty());
        assert_eq!(containment.overdue_reviews(Utc::now() + Duration::minutes(2)).len(), 1);
    }
}
