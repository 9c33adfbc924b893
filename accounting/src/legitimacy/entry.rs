//! Legitimacy ledger entries and the fold that derives the current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use charter::CycleNumber;

use super::band::{BandEffects, LegitimacyBand};

/// How hard a trigger hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerWeight {
    /// Accumulates; enough within one cycle forces a decay
    Minor,
    /// Immediate one-band decay
    Major,
    /// Straight to `failed`
    Catastrophic,
}

impl TriggerWeight {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Catastrophic => "catastrophic",
        }
    }
}

/// Named decay triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A forced acknowledgment window passed without acknowledgment
    IgnoredAcknowledgment,
    /// Review found a procedural deficiency
    DeficientFinding,
    /// Review found the action illegitimate
    IllegitimateFinding,
    /// Review found the action void from the outset
    VoidFinding,
    /// A remedy ordered by a finding passed its deadline
    IgnoredFinding,
    /// A capacity deferral lapsed without resolution
    CapacityConcealment,
    /// Delivered capacity fell short of what was declared
    OverDeclaration,
    /// An engine write could not be durably recorded
    UnrecordedWrite,
    /// A ledger other than the detector's was altered
    RecordTampering,
    /// The detector's own records were altered
    DetectorTampering,
}

impl TriggerKind {
    /// Weight applied when the caller does not escalate.
    pub fn default_weight(&self) -> TriggerWeight {
        match self {
            Self::IgnoredAcknowledgment
            | Self::DeficientFinding
            | Self::CapacityConcealment
            | Self::OverDeclaration
            | Self::UnrecordedWrite => TriggerWeight::Minor,
            Self::IllegitimateFinding
            | Self::VoidFinding
            | Self::IgnoredFinding
            | Self::RecordTampering => TriggerWeight::Major,
            Self::DetectorTampering => TriggerWeight::Catastrophic,
        }
    }

    /// Only these triggers may jump straight to `failed`.
    pub fn may_be_catastrophic(&self) -> bool {
        matches!(self, Self::DetectorTampering)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IgnoredAcknowledgment => "ignored_acknowledgment",
            Self::DeficientFinding => "deficient_finding",
            Self::IllegitimateFinding => "illegitimate_finding",
            Self::VoidFinding => "void_finding",
            Self::IgnoredFinding => "ignored_finding",
            Self::CapacityConcealment => "capacity_concealment",
            Self::OverDeclaration => "over_declaration",
            Self::UnrecordedWrite => "unrecorded_write",
            Self::RecordTampering => "record_tampering",
            Self::DetectorTampering => "detector_tampering",
        }
    }
}

/// The fact an entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LegitimacyEntryKind {
    /// A decay trigger
    Trigger {
        trigger: TriggerKind,
        weight: TriggerWeight,
        /// Remedy, deferral or statement the trigger concerns
        subject: Option<String>,
        detail: String,
    },
    /// Accumulated minor triggers forced a decay
    AutomaticDecay { minor_count: u32 },
    /// The current band was acknowledged
    Acknowledged { actor_id: String },
    /// A finding ordered a remedy
    RemedyOpened {
        remedy_id: String,
        remedy: String,
        due: DateTime<Utc>,
    },
    /// A remedy was completed
    RemedyCompleted { remedy_id: String },
    /// A deliberation cycle closed
    CycleClosed { clean: bool, clean_streak: u32 },
    /// Sustained clean cycles restored one band
    Recovered { clean_streak: u32 },
}

impl LegitimacyEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger { .. } => "trigger",
            Self::AutomaticDecay { .. } => "automatic_decay",
            Self::Acknowledged { .. } => "acknowledged",
            Self::RemedyOpened { .. } => "remedy_opened",
            Self::RemedyCompleted { .. } => "remedy_completed",
            Self::CycleClosed { .. } => "cycle_closed",
            Self::Recovered { .. } => "recovered",
        }
    }
}

/// One legitimacy ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegitimacyEntry {
    /// Cycle the entry belongs to
    pub cycle: CycleNumber,
    /// Recorded fact
    pub kind: LegitimacyEntryKind,
    /// Band before the entry
    pub band_before: LegitimacyBand,
    /// Band after the entry
    pub band_after: LegitimacyBand,
    /// Review cases behind the entry
    pub related_case_ids: Vec<String>,
}

impl LegitimacyEntry {
    /// Trigger weight, if the entry is a trigger.
    pub fn severity(&self) -> Option<TriggerWeight> {
        match &self.kind {
            LegitimacyEntryKind::Trigger { weight, .. } => Some(*weight),
            _ => None,
        }
    }

    pub fn changes_band(&self) -> bool {
        self.band_before != self.band_after
    }
}

/// A remedy awaiting completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRemedy {
    pub remedy_id: String,
    pub remedy: String,
    pub case_ids: Vec<String>,
    pub due: DateTime<Utc>,
    /// The deadline passed and was recorded as an ignored finding
    pub lapsed: bool,
}

/// Current legitimacy, derived by folding the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegitimacyState {
    /// Current band
    pub band: LegitimacyBand,
    /// Whether the current band has been acknowledged
    pub acknowledged: bool,
    /// Cycle in which acknowledgment was first required
    pub ack_required_since: Option<CycleNumber>,
    /// Currently open cycle
    pub cycle: CycleNumber,
    /// Minor triggers since the last forced decay in this cycle
    pub minors_this_cycle: u32,
    /// Decay triggers of any weight in this cycle
    pub decay_events_this_cycle: u32,
    /// Consecutive clean closed cycles
    pub clean_streak: u32,
    /// Remedies awaiting completion
    pub open_remedies: BTreeMap<String, OpenRemedy>,
}

impl Default for LegitimacyState {
    fn default() -> Self {
        Self {
            band: LegitimacyBand::Stable,
            acknowledged: false,
            ack_required_since: None,
            cycle: 1,
            minors_this_cycle: 0,
            decay_events_this_cycle: 0,
            clean_streak: 0,
            open_remedies: BTreeMap::new(),
        }
    }
}

impl LegitimacyState {
    /// Fold entries from the initial state.
    pub fn fold<'a>(entries: impl IntoIterator<Item = &'a LegitimacyEntry>) -> Self {
        let mut state = Self::default();
        for entry in entries {
            state.apply(entry);
        }
        state
    }

    /// Apply one entry.
    pub fn apply(&mut self, entry: &LegitimacyEntry) {
        if entry.band_after > self.band {
            // Every decay must be acknowledged afresh.
            self.band = entry.band_after;
            self.acknowledged = false;
            self.ack_required_since = Some(entry.cycle);
            self.clean_streak = 0;
        } else if entry.band_after < self.band {
            self.band = entry.band_after;
            self.acknowledged = true;
            self.ack_required_since = None;
        }

        match &entry.kind {
            LegitimacyEntryKind::Trigger {
                trigger,
                weight,
                subject,
                ..
            } => {
                self.decay_events_this_cycle += 1;
                if *weight == TriggerWeight::Minor {
                    self.minors_this_cycle += 1;
                }
                match trigger {
                    TriggerKind::IgnoredFinding => {
                        if let Some(remedy) = subject.as_ref().and_then(|s| self.open_remedies.get_mut(s)) {
                            remedy.lapsed = true;
                        }
                    }
                    TriggerKind::IgnoredAcknowledgment if !self.acknowledged => {
                        self.ack_required_since = Some(entry.cycle);
                    }
                    _ => {}
                }
            }
            LegitimacyEntryKind::AutomaticDecay { .. } => {
                self.minors_this_cycle = 0;
            }
            LegitimacyEntryKind::Acknowledged { .. } => {
                self.acknowledged = true;
                self.ack_required_since = None;
            }
            LegitimacyEntryKind::RemedyOpened {
                remedy_id,
                remedy,
                due,
            } => {
                self.open_remedies.insert(
                    remedy_id.clone(),
                    OpenRemedy {
                        remedy_id: remedy_id.clone(),
                        remedy: remedy.clone(),
                        case_ids: entry.related_case_ids.clone(),
                        due: *due,
                        lapsed: false,
                    },
                );
            }
            LegitimacyEntryKind::RemedyCompleted { remedy_id } => {
                self.open_remedies.remove(remedy_id);
            }
            LegitimacyEntryKind::CycleClosed { clean_streak, .. } => {
                self.cycle = entry.cycle + 1;
                self.minors_this_cycle = 0;
                self.decay_events_this_cycle = 0;
                self.clean_streak = *clean_streak;
            }
            LegitimacyEntryKind::Recovered { .. } => {
                self.clean_streak = 0;
            }
        }
    }

    /// Side effects of the current band.
    pub fn effects(&self) -> BandEffects {
        self.band.effects(self.acknowledged)
    }

    /// Open remedies whose deadline has passed and that are not yet recorded as ignored.
    pub fn overdue_remedies(&self, now: DateTime<Utc>) -> Vec<OpenRemedy> {
        self.open_remedies
            .values()
            .filter(|r| !r.lapsed && r.due <= now)
            .cloned()
            .collect()
    }
}
