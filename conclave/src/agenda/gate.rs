//! Pre-admission gate for new motions.
//!
//! A submission is either admitted to the new-motions queue or rejected
//! with a reason code. Both outcomes are logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use charter::{Actor, Capability};

use super::item::{AgendaItem, AgendaQueue, ItemSource};
use crate::types::AgendaError;

/// A motion as submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionDraft {
    pub title: String,
    pub realm: String,
    pub body: String,
}

impl MotionDraft {
    pub fn new(title: impl Into<String>, realm: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            realm: realm.into(),
            body: body.into(),
        }
    }
}

/// Outcome of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    Admitted { item_id: String },
    Rejected { code: String, detail: String },
}

/// Log entry for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub sponsor_id: String,
    pub title: String,
    pub realm: String,
    pub admission: Admission,
    pub at: DateTime<Utc>,
}

/// Lowercased title with collapsed whitespace.
fn normalize(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validates motions before they reach the new-motions queue.
#[derive(Default)]
pub struct AdmissionGate {
    log: RwLock<Vec<AdmissionRecord>>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(sponsor: &Actor, draft: &MotionDraft, pending: &[AgendaItem]) -> Result<(), (String, String)> {
        if !sponsor.can(Capability::SubmitMotion) {
            return Err((
                "unauthorized_sponsor".to_string(),
                format!("{} may not submit motions", sponsor.id),
            ));
        }
        for (field, value) in [("title", &draft.title), ("realm", &draft.realm), ("body", &draft.body)] {
            if value.trim().is_empty() {
                return Err((format!("missing_field:{}", field), format!("{} is required", field)));
            }
        }
        let title = normalize(&draft.title);
        let duplicate = pending.iter().any(|item| {
            item.is_motion()
                && item.realm.as_deref() == Some(draft.realm.trim())
                && normalize(&item.title) == title
        });
        if duplicate {
            return Err((
                "duplicate_motion".to_string(),
                format!("'{}' is already pending in realm {}", draft.title.trim(), draft.realm.trim()),
            ));
        }
        Ok(())
    }

    /// Admit or reject a submission against the motions already pending.
    pub async fn admit(
        &self,
        sponsor: &Actor,
        draft: MotionDraft,
        pending: &[AgendaItem],
        now: DateTime<Utc>,
    ) -> Result<AgendaItem, AgendaError> {
        let outcome = Self::validate(sponsor, &draft, pending);
        let admission = match &outcome {
            Ok(()) => None,
            Err((code, detail)) => Some(Admission::Rejected {
                code: code.clone(),
                detail: detail.clone(),
            }),
        };

        let item = outcome.map(|_| {
            let mut item = AgendaItem::new(
                AgendaQueue::NewMotions,
                "",
                draft.title.trim(),
                ItemSource::Motion {
                    sponsor_id: sponsor.id.clone(),
                },
                now,
            )
            .with_realm(draft.realm.trim())
            .with_body(draft.body.clone());
            item.subject_id = item.id.clone();
            item
        });

        let admission = admission.unwrap_or_else(|| Admission::Admitted {
            item_id: item.as_ref().map(|i| i.id.clone()).unwrap_or_default(),
        });
        self.log.write().await.push(AdmissionRecord {
            sponsor_id: sponsor.id.clone(),
            title: draft.title.clone(),
            realm: draft.realm.clone(),
            admission,
            at: now,
        });

        match item {
            Ok(item) => {
                info!(
                    item_id = %item.id,
                    sponsor_id = %sponsor.id,
                    realm = %draft.realm.trim(),
                    "Motion admitted"
                );
                Ok(item)
            }
            Err((code, detail)) => {
                warn!(sponsor_id = %sponsor.id, code = %code, "Motion rejected at admission");
                Err(AgendaError::Rejected { code, detail })
            }
        }
    }

    pub async fn log(&self) -> Vec<AdmissionRecord> {
        self.log.read().await.clone()
    }
}
