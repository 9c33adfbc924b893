//! Agenda queues, priority bands and items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use charter::new_id;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Priority tier. Lower bands are scheduled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    /// Band 0: forced, never deferred
    Forced,
    /// Band 1: active blockers and escalated motions, outside quota
    Blocker,
    /// Band 2: previously deferred motions, outside quota
    Deferred,
    /// Band 3: new motions under the realm quota
    Quota,
    /// Band 4: best effort
    BestEffort,
}

impl PriorityBand {
    pub fn number(&self) -> u8 {
        match self {
            Self::Forced => 0,
            Self::Blocker => 1,
            Self::Deferred => 2,
            Self::Quota => 3,
            Self::BestEffort => 4,
        }
    }
}

/// The six fixed input queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AgendaQueue {
    /// Witness statements and review findings
    WitnessAndFindings,
    /// Periodic and legitimacy-forced reviews and acknowledgments
    MandatoryReviews,
    /// Active blockers
    ActiveBlockers,
    /// Motions deferred in an earlier cycle
    DeferredMotions,
    /// Motions admitted since the last cycle
    NewMotions,
    /// Optional and informational items
    Informational,
}

impl AgendaQueue {
    /// The band each queue feeds.
    pub fn band(&self) -> PriorityBand {
        match self {
            Self::WitnessAndFindings | Self::MandatoryReviews => PriorityBand::Forced,
            Self::ActiveBlockers => PriorityBand::Blocker,
            Self::DeferredMotions => PriorityBand::Deferred,
            Self::NewMotions => PriorityBand::Quota,
            Self::Informational => PriorityBand::BestEffort,
        }
    }

    pub fn all() -> [Self; 6] {
        [
            Self::WitnessAndFindings,
            Self::MandatoryReviews,
            Self::ActiveBlockers,
            Self::DeferredMotions,
            Self::NewMotions,
            Self::Informational,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WitnessAndFindings => "witness_and_findings",
            Self::MandatoryReviews => "mandatory_reviews",
            Self::ActiveBlockers => "active_blockers",
            Self::DeferredMotions => "deferred_motions",
            Self::NewMotions => "new_motions",
            Self::Informational => "informational",
        }
    }

    /// Whether items from this queue are motions tracked by capacity deferrals.
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::DeferredMotions | Self::NewMotions)
    }
}

/// Where an item came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemSource {
    Motion { sponsor_id: String },
    Blocker { raised_by: String },
    Statement { statement_id: String },
    Finding { case_id: String },
    MandatoryReview { reason: String },
    Informational { posted_by: String },
}

/// One entry awaiting or holding a place on an agenda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: String,
    pub queue: AgendaQueue,
    /// Task, statement, case or motion the item concerns
    pub subject_id: String,
    pub title: String,
    /// Topical domain; motions only
    pub realm: Option<String>,
    pub source: ItemSource,
    pub submitted_at: DateTime<Utc>,
    /// Running deferral count from the capacity ledger
    pub deferral_count: u32,
    /// Deferred often enough to be treated as a blocker
    pub escalated: bool,
    /// Cycles this item has been carried over without a place
    #[serde(default)]
    pub carried: u32,
    /// Internal body text; never in public views
    pub body: Option<String>,
}

impl AgendaItem {
    pub fn new(
        queue: AgendaQueue,
        subject_id: impl Into<String>,
        title: impl Into<String>,
        source: ItemSource,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            queue,
            subject_id: subject_id.into(),
            title: title.into(),
            realm: None,
            source,
            submitted_at,
            deferral_count: 0,
            escalated: false,
            carried: 0,
            body: None,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Band the item is scheduled in; escalation lifts motions to Band 1.
    pub fn band(&self) -> PriorityBand {
        if self.escalated {
            PriorityBand::Blocker
        } else {
            self.queue.band()
        }
    }

    pub fn is_motion(&self) -> bool {
        self.queue.is_motion()
    }
}
