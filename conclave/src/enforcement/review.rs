//! Review stage - independent panels over immutable statements.
//!
//! A case copies the statement it reviews and never consults anything the
//! statement does not say. Panels are drawn at random from reviewers with
//! no conflict; every member evaluates the same three axes and the case
//! finding is the median of their findings. Opinions that differ from it
//! are kept verbatim as dissents.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use charter::{new_id, Actor, Capability};

use super::appeal::AppealGrounds;
use super::statement::WitnessStatement;
use crate::types::EnforcementError;

type Result<T> = std::result::Result<T, EnforcementError>;

/// Fixed finding vocabulary, ordered from most to least legitimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finding {
    Legitimate,
    LegitimateWithConcerns,
    ProcedurallyDeficient,
    Illegitimate,
    VoidAbInitio,
}

impl Finding {
    /// Procedural remedies ordered by this finding.
    pub fn remedies(&self) -> Vec<Remedy> {
        match self {
            Self::Legitimate => vec![],
            Self::LegitimateWithConcerns => vec![Remedy::MandateDisclosure],
            Self::ProcedurallyDeficient => vec![Remedy::RequireRevisedPlan],
            Self::Illegitimate | Self::VoidAbInitio => vec![Remedy::Reauthorize],
        }
    }

    /// What happens to the held task.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Legitimate | Self::LegitimateWithConcerns | Self::ProcedurallyDeficient => {
                Disposition::Release
            }
            Self::Illegitimate | Self::VoidAbInitio => Disposition::Nullify,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legitimate => "legitimate",
            Self::LegitimateWithConcerns => "legitimate_with_concerns",
            Self::ProcedurallyDeficient => "procedurally_deficient",
            Self::Illegitimate => "illegitimate",
            Self::VoidAbInitio => "void_ab_initio",
        }
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Procedural remedies. Individual sanctions do not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    /// The work must be authorized afresh
    Reauthorize,
    /// A revised execution plan is required
    RequireRevisedPlan,
    /// The circumstances must be disclosed to the body
    MandateDisclosure,
}

impl Remedy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reauthorize => "reauthorize",
            Self::RequireRevisedPlan => "require_revised_plan",
            Self::MandateDisclosure => "mandate_disclosure",
        }
    }
}

/// Outcome for the contained task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Release,
    Nullify,
}

/// The three evaluated axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisAssessment {
    /// Ratified intent was respected
    pub intent_respected: bool,
    /// The approved execution plan was followed
    pub plan_followed: bool,
    /// Required procedural steps and escalations occurred
    pub procedure_followed: bool,
}

/// Members who answered yes on each axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisTally {
    pub intent_respected: usize,
    pub plan_followed: usize,
    pub procedure_followed: usize,
    pub panel_size: usize,
}

/// One member's opinion, kept exactly as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub reviewer_id: String,
    pub axes: AxisAssessment,
    pub finding: Finding,
    /// Reasoning, verbatim
    pub statement: String,
    pub submitted_at: DateTime<Utc>,
}

/// A case's issued finding. Immutable once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedFinding {
    pub finding: Finding,
    pub tally: AxisTally,
    /// Opinions whose finding differs from the case finding
    pub dissents: Vec<Opinion>,
    pub remedies: Vec<Remedy>,
    pub disposition: Disposition,
    pub issued_at: DateTime<Utc>,
    /// Appeals close at this time; `None` for a final ruling
    pub appeal_deadline: Option<DateTime<Utc>>,
}

/// Whether a case reviews a statement or an appeal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseKind {
    Original,
    Appeal {
        original_case_id: String,
        appellant_id: String,
        grounds: AppealGrounds,
    },
}

/// Progress of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Opinions outstanding
    Deliberating,
    /// Finding issued; appeal window open
    Issued,
    /// Under appeal
    Appealed,
    /// No further change possible
    Final,
}

/// A panel's evaluation of one statement or appeal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCase {
    pub id: String,
    pub kind: CaseKind,
    /// The statement under review, as recorded
    pub statement: WitnessStatement,
    /// Drawn panel members
    pub panel: Vec<String>,
    /// Opinions by reviewer
    pub opinions: BTreeMap<String, Opinion>,
    pub finding: Option<IssuedFinding>,
    pub status: CaseStatus,
    /// Appeal filed against this case
    pub appeal_case_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl ReviewCase {
    pub fn is_appeal(&self) -> bool {
        matches!(self.kind, CaseKind::Appeal { .. })
    }

    /// Panel members yet to submit.
    pub fn outstanding(&self) -> Vec<String> {
        self.panel
            .iter()
            .filter(|m| !self.opinions.contains_key(*m))
            .cloned()
            .collect()
    }
}

/// Result of submitting an opinion.
#[derive(Debug, Clone, PartialEq)]
pub enum OpinionOutcome {
    /// Recorded; others still outstanding
    Recorded { outstanding: usize },
    /// The last opinion arrived and the finding was issued
    Issued(ReviewCase),
}

/// What a member is asked to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct OpinionDraft {
    pub axes: AxisAssessment,
    pub finding: Finding,
    pub statement: String,
}

/// Median of an odd number of findings.
pub fn median_finding(opinions: &[Finding]) -> Option<Finding> {
    let mut sorted = opinions.to_vec();
    sorted.sort();
    sorted.get(sorted.len() / 2).copied()
}

/// Holds every review case.
pub struct ReviewBoard {
    /// Cases by id
    pub(crate) cases: DashMap<String, Arc<Mutex<ReviewCase>>>,
    /// Original case per statement
    pub(crate) by_statement: DashMap<String, String>,
    /// Reviewers who sat on a case per subject
    sat_on: DashMap<String, BTreeSet<String>>,
    /// Panel draws
    rng: Mutex<StdRng>,
    pub(crate) panel_size: usize,
    pub(crate) appeal_window: Duration,
}

impl ReviewBoard {
    pub fn new(panel_size: usize, appeal_window_secs: u64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cases: DashMap::new(),
            by_statement: DashMap::new(),
            sat_on: DashMap::new(),
            rng: Mutex::new(rng),
            panel_size,
            appeal_window: charter::window(appeal_window_secs),
        }
    }

    pub(crate) fn handle(&self, case_id: &str) -> Result<Arc<Mutex<ReviewCase>>> {
        self.cases
            .get(case_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| EnforcementError::CaseNotFound(case_id.to_string()))
    }

    pub async fn get(&self, case_id: &str) -> Result<ReviewCase> {
        Ok(self.handle(case_id)?.lock().await.clone())
    }

    /// Original case opened for a statement.
    pub fn case_for_statement(&self, statement_id: &str) -> Option<String> {
        self.by_statement.get(statement_id).map(|c| c.value().clone())
    }

    /// Every case, oldest first.
    pub async fn list(&self) -> Vec<ReviewCase> {
        let handles: Vec<_> = self.cases.iter().map(|c| Arc::clone(c.value())).collect();
        let mut cases = Vec::with_capacity(handles.len());
        for handle in handles {
            cases.push(handle.lock().await.clone());
        }
        cases.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        cases
    }

    /// Draw a panel from reviewers free of conflict.
    ///
    /// Excluded: anyone involved in the subject, anyone who sat on an
    /// earlier case about the same subject, anyone with a declared bias
    /// toward the subject or a party, and anyone listed in `excluded`.
    pub(crate) async fn draw_panel(
        &self,
        statement: &WitnessStatement,
        reviewers: &[Actor],
        involved: &BTreeSet<String>,
        excluded: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let prior = self
            .sat_on
            .get(&statement.subject_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        let mut bias_targets: Vec<&str> = vec![statement.subject_id.as_str()];
        bias_targets.extend(involved.iter().map(|s| s.as_str()));

        let mut eligible: Vec<String> = reviewers
            .iter()
            .filter(|r| r.can(Capability::SitOnPanel))
            .filter(|r| !involved.contains(&r.id))
            .filter(|r| !prior.contains(&r.id))
            .filter(|r| !excluded.contains(&r.id))
            .filter(|r| !r.is_biased_toward(bias_targets.iter().copied()))
            .map(|r| r.id.clone())
            .collect();
        eligible.sort();
        eligible.dedup();

        if eligible.len() < self.panel_size {
            return Err(EnforcementError::InsufficientPanel {
                needed: self.panel_size,
                eligible: eligible.len(),
            });
        }

        let mut rng = self.rng.lock().await;
        let mut panel: Vec<String> = eligible
            .choose_multiple(&mut *rng, self.panel_size)
            .cloned()
            .collect();
        panel.sort();
        debug!(
            subject_id = %statement.subject_id,
            eligible = eligible.len(),
            panel = ?panel,
            "Panel drawn"
        );
        Ok(panel)
    }

    pub(crate) fn insert(&self, case: ReviewCase) {
        self.sat_on
            .entry(case.statement.subject_id.clone())
            .or_default()
            .extend(case.panel.iter().cloned());
        self.cases
            .insert(case.id.clone(), Arc::new(Mutex::new(case)));
    }

    /// Open a case for a statement.
    pub async fn open_case(
        &self,
        statement: &WitnessStatement,
        reviewers: &[Actor],
        involved: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<ReviewCase> {
        if self.by_statement.contains_key(&statement.id) {
            return Err(EnforcementError::AlreadyUnderReview(statement.id.clone()));
        }
        let panel = self
            .draw_panel(statement, reviewers, involved, &BTreeSet::new())
            .await?;

        let case = ReviewCase {
            id: new_id(),
            kind: CaseKind::Original,
            statement: statement.clone(),
            panel,
            opinions: BTreeMap::new(),
            finding: None,
            status: CaseStatus::Deliberating,
            appeal_case_id: None,
            opened_at: now,
        };
        // A concurrent open for the same statement loses here.
        match self.by_statement.entry(statement.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EnforcementError::AlreadyUnderReview(statement.id.clone()));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(case.id.clone());
            }
        }
        self.insert(case.clone());

        info!(
            case_id = %case.id,
            statement_id = %statement.id,
            kind = statement.kind.as_str(),
            panel_size = case.panel.len(),
            "Review case opened"
        );
        Ok(case)
    }

    /// Record a member's opinion; the last one issues the finding.
    pub async fn submit_opinion(
        &self,
        case_id: &str,
        reviewer: &Actor,
        draft: OpinionDraft,
        now: DateTime<Utc>,
    ) -> Result<OpinionOutcome> {
        reviewer.require(Capability::SitOnPanel)?;
        if draft.statement.trim().is_empty() {
            return Err(EnforcementError::Validation {
                code: "missing_statement",
                detail: "an opinion must state its reasoning".to_string(),
            });
        }

        let handle = self.handle(case_id)?;
        let mut case = handle.lock().await;
        if case.finding.is_some() {
            return Err(EnforcementError::FindingIssued(case_id.to_string()));
        }
        if !case.panel.contains(&reviewer.id) {
            return Err(EnforcementError::NotPanelMember {
                case_id: case_id.to_string(),
                reviewer_id: reviewer.id.clone(),
            });
        }
        if case.opinions.contains_key(&reviewer.id) {
            return Err(EnforcementError::OpinionAlreadySubmitted {
                case_id: case_id.to_string(),
                reviewer_id: reviewer.id.clone(),
            });
        }

        case.opinions.insert(
            reviewer.id.clone(),
            Opinion {
                reviewer_id: reviewer.id.clone(),
                axes: draft.axes,
                finding: draft.finding,
                statement: draft.statement,
                submitted_at: now,
            },
        );
        debug!(case_id = %case_id, reviewer_id = %reviewer.id, "Opinion recorded");

        let outstanding = case.outstanding().len();
        if outstanding > 0 {
            return Ok(OpinionOutcome::Recorded { outstanding });
        }

        let issued = self.issue(&case, now);
        info!(
            case_id = %case.id,
            statement_id = %case.statement.id,
            finding = issued.finding.as_str(),
            dissents = issued.dissents.len(),
            appeal = case.is_appeal(),
            "Finding issued"
        );
        case.finding = Some(issued);
        case.status = if case.is_appeal() {
            CaseStatus::Final
        } else {
            CaseStatus::Issued
        };
        Ok(OpinionOutcome::Issued(case.clone()))
    }

    fn issue(&self, case: &ReviewCase, now: DateTime<Utc>) -> IssuedFinding {
        let findings: Vec<Finding> = case.opinions.values().map(|o| o.finding).collect();
        let finding = median_finding(&findings).unwrap_or(Finding::Legitimate);

        let mut tally = AxisTally {
            panel_size: case.panel.len(),
            ..AxisTally::default()
        };
        for opinion in case.opinions.values() {
            tally.intent_respected += opinion.axes.intent_respected as usize;
            tally.plan_followed += opinion.axes.plan_followed as usize;
            tally.procedure_followed += opinion.axes.procedure_followed as usize;
        }

        IssuedFinding {
            finding,
            tally,
            dissents: case
                .opinions
                .values()
                .filter(|o| o.finding != finding)
                .cloned()
                .collect(),
            remedies: finding.remedies(),
            disposition: finding.disposition(),
            issued_at: now,
            appeal_deadline: (!case.is_appeal()).then(|| now + self.appeal_window),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::enforcement::statement::{SubjectKind, ViolationKind};
    use charter::Role;

    pub(crate) fn reviewers(n: usize) -> Vec<Actor> {
        (1..=n)
            .map(|i| Actor::new(format!("reviewer-{}", i), format!("Reviewer {}", i)).with_role(Role::Reviewer))
            .collect()
    }

    pub(crate) fn statement() -> WitnessStatement {
        WitnessStatement::new("task-1", SubjectKind::Task, ViolationKind::ResultInjection, "injected result")
    }

    pub(crate) fn draft(finding: Finding) -> OpinionDraft {
        OpinionDraft {
            axes: AxisAssessment {
                intent_respected: finding <= Finding::LegitimateWithConcerns,
                plan_followed: true,
                procedure_followed: finding == Finding::Legitimate,
            },
            finding,
            statement: format!("I find this {}", finding),
        }
    }

    #[test]
    fn test_median_finding() {
        assert_eq!(
            median_finding(&[Finding::Illegitimate, Finding::Legitimate, Finding::ProcedurallyDeficient]),
            Some(Finding::ProcedurallyDeficient)
        );
        assert_eq!(median_finding(&[]), None);
    }

    #[tokio::test]
    async fn test_panel_excludes_conflicts() {
        let board = ReviewBoard::new(3, 3600, Some(7));
        let mut pool = reviewers(5);
        pool[0] = pool[0].clone().with_bias("task-1");
        let involved: BTreeSet<String> = ["reviewer-2".to_string()].into_iter().collect();

        let case = board.open_case(&statement(), &pool, &involved, Utc::now()).await.unwrap();
        assert_eq!(case.panel, vec!["reviewer-3", "reviewer-4", "reviewer-5"]);
        assert_eq!(case.panel.len() % 2, 1);
    }

    #[tokio::test]
    async fn test_insufficient_panel() {
        let board = ReviewBoard::new(3, 3600, Some(7));
        let err = board
            .open_case(&statement(), &reviewers(2), &BTreeSet::new(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "insufficient_panel");
    }

    #[tokio::test]
    async fn test_one_case_per_statement() {
        let board = ReviewBoard::new(3, 3600, Some(7));
        let statement = statement();
        board.open_case(&statement, &reviewers(6), &BTreeSet::new(), Utc::now()).await.unwrap();
        let err = board
            .open_case(&statement, &reviewers(6), &BTreeSet::new(), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "already_under_review");
    }

    #[tokio::test]
    async fn test_finding_keeps_dissent_verbatim() {
        let board = ReviewBoard::new(3, 3600, Some(7));
        let pool = reviewers(3);
        let case = board.open_case(&statement(), &pool, &BTreeSet::new(), Utc::now()).await.unwrap();

        let votes = [Finding::Legitimate, Finding::ProcedurallyDeficient, Finding::ProcedurallyDeficient];
        let mut outcome = None;
        for (reviewer, finding) in pool.iter().zip(votes) {
            outcome = Some(board.submit_opinion(&case.id, reviewer, draft(finding), Utc::now()).await.unwrap());
        }

        let Some(OpinionOutcome::Issued(case)) = outcome else {
            panic!("finding not issued");
        };
        let issued = case.finding.unwrap();
        assert_eq!(issued.finding, Finding::ProcedurallyDeficient);
        assert_eq!(issued.dissents.len(), 1);
        assert_eq!(issued.dissents[0].statement, "I find this legitimate");
        assert_eq!(issued.remedies, vec![Remedy::RequireRevisedPlan]);
        assert_eq!(issued.disposition, Disposition::Release);
        assert_eq!(issued.tally.plan_followed, 3);
        assert!(issued.appeal_deadline.is_some());
        assert_eq!(case.status, CaseStatus::Issued);
    }

    #[tokio::test]
    async fn test_opinion_guards() {
        let board = ReviewBoard::new(3, 3600, Some(7));
        let pool = reviewers(4);
        let case = board.open_case(&statement(), &pool[..3], &BTreeSet::new(), Utc::now()).await.unwrap();

        let err = board
            .submit_opinion(&case.id, &pool[3], draft(Finding::Legitimate), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_panel_member");

        board.submit_opinion(&case.id, &pool[0], draft(Finding::Legitimate), Utc::now()).await.unwrap();
        let err = board
            .submit_opinion(&case.id, &pool[0], draft(Finding::Legitimate), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "opinion_already_submitted");

        let executor = Actor::new("reviewer-2", "Imposter").with_role(Role::Executor);
        let err = board
            .submit_opinion(&case.id, &executor, draft(Finding::Legitimate), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }
}
