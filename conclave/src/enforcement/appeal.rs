//! Appeals and finality.
//!
//! Each finding may be appealed once, on one of four grounds, before its
//! appeal window closes. A fresh panel with none of the original members
//! rules, and that ruling is final. A finding nobody appealed becomes final
//! when its window closes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use charter::{new_id, Actor, Capability};

use super::review::{CaseKind, CaseStatus, Disposition, Finding, Remedy, ReviewBoard, ReviewCase};
use super::statement::SubjectKind;
use crate::types::EnforcementError;

/// Admissible grounds for an appeal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundsKind {
    NewFacts,
    ChangedConstraints,
    RevisedPlan,
    /// Defect in how the original review was conducted
    ProceduralDefect,
}

impl GroundsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewFacts => "new_facts",
            Self::ChangedConstraints => "changed_constraints",
            Self::RevisedPlan => "revised_plan",
            Self::ProceduralDefect => "procedural_defect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppealGrounds {
    pub kind: GroundsKind,
    /// What is new; an empty detail is no grounds at all
    pub detail: String,
}

impl AppealGrounds {
    pub fn new(kind: GroundsKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// A finding that can no longer change, with everything downstream needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalFinding {
    /// Case whose finding stands
    pub ruling_case_id: String,
    /// Case opened for the statement
    pub original_case_id: String,
    pub statement_id: String,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub finding: Finding,
    pub remedies: Vec<Remedy>,
    pub disposition: Disposition,
    /// Every case involved, original first
    pub case_ids: Vec<String>,
    pub finalized_at: DateTime<Utc>,
}

impl FinalFinding {
    fn from_case(ruling: &ReviewCase, original_case_id: &str, now: DateTime<Utc>) -> Option<Self> {
        let issued = ruling.finding.as_ref()?;
        let mut case_ids = vec![original_case_id.to_string()];
        if ruling.id != original_case_id {
            case_ids.push(ruling.id.clone());
        }
        Some(Self {
            ruling_case_id: ruling.id.clone(),
            original_case_id: original_case_id.to_string(),
            statement_id: ruling.statement.id.clone(),
            subject_id: ruling.statement.subject_id.clone(),
            subject_kind: ruling.statement.subject_kind,
            finding: issued.finding,
            remedies: issued.remedies.clone(),
            disposition: issued.disposition,
            case_ids,
            finalized_at: now,
        })
    }
}

impl ReviewBoard {
    /// File the one permitted appeal against a case's finding.
    pub async fn file_appeal(
        &self,
        case_id: &str,
        appellant: &Actor,
        grounds: AppealGrounds,
        reviewers: &[Actor],
        involved: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<ReviewCase, EnforcementError> {
        appellant.require(Capability::FileAppeal)?;

        let handle = self.handle(case_id)?;
        let mut original = handle.lock().await;

        if original.is_appeal() {
            return Err(EnforcementError::appeal(
                "ruling_final",
                "an appeal ruling cannot itself be appealed",
            ));
        }
        if original.appeal_case_id.is_some() {
            return Err(EnforcementError::appeal(
                "appeal_already_filed",
                format!("case {} has already been appealed", case_id),
            ));
        }
        let Some(issued) = original.finding.as_ref() else {
            return Err(EnforcementError::appeal(
                "finding_not_issued",
                format!("case {} is still deliberating", case_id),
            ));
        };
        let window_open = original.status == CaseStatus::Issued
            && issued.appeal_deadline.map(|d| now < d).unwrap_or(false);
        if !window_open {
            return Err(EnforcementError::appeal(
                "appeal_window_closed",
                format!("case {} is final", case_id),
            ));
        }
        if grounds.detail.trim().is_empty() {
            return Err(EnforcementError::appeal(
                "appeal_without_grounds",
                format!("{} grounds state nothing new", grounds.kind.as_str()),
            ));
        }

        let excluded: BTreeSet<String> = original.panel.iter().cloned().collect();
        let panel = self
            .draw_panel(&original.statement, reviewers, involved, &excluded)
            .await?;

        let appeal = ReviewCase {
            id: new_id(),
            kind: CaseKind::Appeal {
                original_case_id: original.id.clone(),
                appellant_id: appellant.id.clone(),
                grounds: grounds.clone(),
            },
            statement: original.statement.clone(),
            panel,
            opinions: BTreeMap::new(),
            finding: None,
            status: CaseStatus::Deliberating,
            appeal_case_id: None,
            opened_at: now,
        };
        original.appeal_case_id = Some(appeal.id.clone());
        original.status = CaseStatus::Appealed;
        self.insert(appeal.clone());

        info!(
            case_id = %appeal.id,
            original_case_id = %case_id,
            appellant_id = %appellant.id,
            grounds = grounds.kind.as_str(),
            "Appeal filed"
        );
        Ok(appeal)
    }

    /// Settle an issued appeal ruling; the original case becomes final with it.
    pub async fn conclude_appeal(
        &self,
        appeal: &ReviewCase,
        now: DateTime<Utc>,
    ) -> Result<Option<FinalFinding>, EnforcementError> {
        let CaseKind::Appeal { original_case_id, .. } = &appeal.kind else {
            return Ok(None);
        };
        let handle = self.handle(original_case_id)?;
        let mut original = handle.lock().await;
        original.status = CaseStatus::Final;
        Ok(FinalFinding::from_case(appeal, original_case_id, now))
    }

    /// Finalize every unappealed finding whose appeal window has closed.
    pub async fn finalize_due(&self, now: DateTime<Utc>) -> Vec<FinalFinding> {
        let handles: Vec<_> = self
            .cases
            .iter()
            .map(|c| std::sync::Arc::clone(c.value()))
            .collect();

        let mut finalized = Vec::new();
        for handle in handles {
            let mut case = handle.lock().await;
            let due = case.status == CaseStatus::Issued
                && case
                    .finding
                    .as_ref()
                    .and_then(|f| f.appeal_deadline)
                    .map(|d| d <= now)
                    .unwrap_or(false);
            if !due {
                continue;
            }
            case.status = CaseStatus::Final;
            if let Some(final_finding) = FinalFinding::from_case(&case, &case.id, now) {
                info!(
                    case_id = %case.id,
                    finding = final_finding.finding.as_str(),
                    "Finding final"
                );
                finalized.push(final_finding);
            }
        }
        finalized.sort_by(|a, b| a.original_case_id.cmp(&b.original_case_id));
        finalized
    }
}
