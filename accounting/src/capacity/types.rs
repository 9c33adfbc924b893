//! Capacity ledger records and the folded state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use charter::{CycleNumber, LedgerRecord};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Where declared capacity comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum CapacitySource {
    /// Bottom level: executors available to take work
    ExecutorAvailability,
    /// Mid tier: program slots, including agenda slots per cycle
    ProgramSlots,
    /// Tasks that can be carried through per cycle
    TaskThroughput,
    /// Plan-level demand
    PlanDemand,
}

impl CapacitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutorAvailability => "executor_availability",
            Self::ProgramSlots => "program_slots",
            Self::TaskThroughput => "task_throughput",
            Self::PlanDemand => "plan_demand",
        }
    }

    pub fn all() -> [Self; 4] {
        [
            Self::ExecutorAvailability,
            Self::ProgramSlots,
            Self::TaskThroughput,
            Self::PlanDemand,
        ]
    }
}

/// Self-reported capacity for a validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub id: String,
    pub source: CapacitySource,
    /// Declaring actor
    pub source_id: String,
    /// Units available per cycle
    pub units: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Declaration {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at < self.valid_until
    }
}

/// Demand against a source in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub source: CapacitySource,
    pub claimant: String,
    /// What the capacity is for (motion, task, plan item)
    pub subject: String,
    pub units: u32,
    pub cycle: CycleNumber,
    /// Whether capacity was available
    pub granted: bool,
    pub at: DateTime<Utc>,
}

/// A recorded shortfall with its running count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deferral {
    pub id: String,
    /// Deferred subject; counts accumulate per subject
    pub subject: String,
    pub claimant: String,
    /// Realm, when the deferral comes from a per-realm quota
    pub realm: Option<String>,
    /// Reason code
    pub reason: String,
    /// Claim that could not be met, if any
    pub claim_id: Option<String>,
    /// The deferral must be revisited by this date
    pub review_date: DateTime<Utc>,
    /// How many times the subject has been deferred
    pub count: u32,
    /// Count reached the escalation threshold
    pub escalated: bool,
    pub cycle: CycleNumber,
}

/// A deferral whose review date passed without resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lapse {
    pub deferral_id: String,
    pub subject: String,
    pub claimant: String,
    pub review_date: DateTime<Utc>,
    /// Lapses recorded against this claimant so far, this one included
    pub occurrences: u32,
}

/// Delivered capacity fell short of a declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortfall {
    pub declaration_id: String,
    pub source: CapacitySource,
    pub source_id: String,
    pub declared: u32,
    pub delivered: u32,
    pub cycle: CycleNumber,
    /// Shortfalls recorded against this source so far, this one included
    pub occurrences: u32,
}

/// Unclaimed capacity at the close of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleRecord {
    pub source: CapacitySource,
    pub cycle: CycleNumber,
    pub declared: u32,
    pub claimed: u32,
    pub idle: u32,
}

/// One capacity ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum CapacityEntry {
    Declared(Declaration),
    Claimed(Claim),
    Deferred(Deferral),
    Resolved {
        subject: String,
        deferral_id: String,
        resolution: String,
        cycle: CycleNumber,
    },
    Lapsed(Lapse),
    Shortfall(Shortfall),
    Idle(IdleRecord),
    Expired {
        declaration_id: String,
    },
}

impl CapacityEntry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Declared(_) => "declared",
            Self::Claimed(_) => "claimed",
            Self::Deferred(_) => "deferred",
            Self::Resolved { .. } => "resolved",
            Self::Lapsed(_) => "lapsed",
            Self::Shortfall(_) => "shortfall",
            Self::Idle(_) => "idle",
            Self::Expired { .. } => "expired",
        }
    }
}

/// Result of a claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Granted(Claim),
    Deferred { claim: Claim, deferral: Deferral },
}

/// Current capacity, derived by folding the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityState {
    /// Declarations not yet expired
    pub declarations: BTreeMap<String, Declaration>,
    /// Granted units per cycle and source
    pub granted: BTreeMap<CycleNumber, BTreeMap<CapacitySource, u32>>,
    /// Latest unresolved deferral per subject
    pub open_deferrals: BTreeMap<String, Deferral>,
    /// Deferral ids already recorded as lapsed
    pub lapsed: BTreeSet<String>,
    /// Lapse count per claimant
    pub lapses_by_claimant: BTreeMap<String, u32>,
    /// Shortfall count per declaring source id
    pub shortfalls_by_source: BTreeMap<String, u32>,
    /// Cycles whose idle capacity has been recorded
    pub closed_cycles: BTreeSet<CycleNumber>,
}

impl CapacityState {
    pub fn fold<'a>(entries: impl IntoIterator<Item = &'a CapacityEntry>) -> Self {
        let mut state = Self::default();
        for entry in entries {
            state.apply(entry);
        }
        state
    }

    pub fn apply(&mut self, entry: &CapacityEntry) {
        match entry {
            CapacityEntry::Declared(declaration) => {
                self.declarations
                    .insert(declaration.id.clone(), declaration.clone());
            }
            CapacityEntry::Claimed(claim) => {
                if claim.granted {
                    let granted = self
                        .granted
                        .entry(claim.cycle)
                        .or_default()
                        .entry(claim.source)
                        .or_default();
                    *granted = granted.saturating_add(claim.units);
                }
            }
            CapacityEntry::Deferred(deferral) => {
                self.open_deferrals
                    .insert(deferral.subject.clone(), deferral.clone());
            }
            CapacityEntry::Resolved { subject, .. } => {
                self.open_deferrals.remove(subject);
            }
            CapacityEntry::Lapsed(lapse) => {
                self.lapsed.insert(lapse.deferral_id.clone());
                self.lapses_by_claimant
                    .insert(lapse.claimant.clone(), lapse.occurrences);
            }
            CapacityEntry::Shortfall(shortfall) => {
                self.shortfalls_by_source
                    .insert(shortfall.source_id.clone(), shortfall.occurrences);
            }
            CapacityEntry::Idle(idle) => {
                self.closed_cycles.insert(idle.cycle);
            }
            CapacityEntry::Expired { declaration_id } => {
                self.declarations.remove(declaration_id);
            }
        }
    }

    /// Declared units for a source active at `at`, saturating at `u32::MAX`.
    pub fn declared_units(&self, source: CapacitySource, at: DateTime<Utc>) -> u32 {
        self.declarations
            .values()
            .filter(|d| d.source == source && d.is_active_at(at))
            .fold(0u32, |total, d| total.saturating_add(d.units))
    }

    /// Units granted against a source in a cycle.
    pub fn granted_units(&self, source: CapacitySource, cycle: CycleNumber) -> u32 {
        self.granted
            .get(&cycle)
            .and_then(|by_source| by_source.get(&source))
            .copied()
            .unwrap_or(0)
    }

    /// Unclaimed units for a source in a cycle.
    pub fn available(&self, source: CapacitySource, cycle: CycleNumber, at: DateTime<Utc>) -> u32 {
        self.declared_units(source, at)
            .saturating_sub(self.granted_units(source, cycle))
    }

    /// Whether any declaration for the source is active.
    pub fn has_declaration(&self, source: CapacitySource, at: DateTime<Utc>) -> bool {
        self.declarations
            .values()
            .any(|d| d.source == source && d.is_active_at(at))
    }

    /// Running deferral count for a subject (0 once resolved).
    pub fn deferral_count(&self, subject: &str) -> u32 {
        self.open_deferrals
            .get(subject)
            .map(|d| d.count)
            .unwrap_or(0)
    }

    /// Open deferrals whose review date has passed and that are not yet lapsed.
    pub fn lapsing(&self, now: DateTime<Utc>) -> Vec<Deferral> {
        self.open_deferrals
            .values()
            .filter(|d| d.review_date <= now && !self.lapsed.contains(&d.id))
            .cloned()
            .collect()
    }
}

/// Public capacity summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySummary {
    /// Unclaimed units per source in the summarized cycle
    pub available: BTreeMap<CapacitySource, u32>,
    /// Unresolved deferrals
    pub open_deferrals: usize,
    /// Unresolved deferrals at or past the escalation count
    pub escalated_deferrals: usize,
    /// Deferrals whose review date lapsed
    pub lapses: usize,
}

/// Full internal view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityView {
    pub state: CapacityState,
    pub records: Vec<LedgerRecord<CapacityEntry>>,
}
