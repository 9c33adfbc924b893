//! Generated agendas and the record explaining them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use charter::CycleNumber;

use super::item::{AgendaItem, AgendaQueue, PriorityBand};

/// Why an item was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionReason {
    /// Band 0, included unconditionally
    Forced,
    /// Active blocker
    ActiveBlocker,
    /// Deferral count reached the escalation threshold
    EscalatedDeferral,
    /// Previously deferred motion
    PriorDeferral,
    /// Within the realm quota
    WithinRealmQuota,
    /// Spare capacity after all other bands
    SpareCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inclusion {
    pub item_id: String,
    /// 1-based position on the agenda
    pub position: usize,
    pub band: PriorityBand,
    pub queue: AgendaQueue,
    pub reason: InclusionReason,
}

/// A motion pushed to a later cycle, with its capacity-ledger deferral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferralNote {
    pub item_id: String,
    pub realm: Option<String>,
    pub reason: String,
    pub deferral_id: String,
    pub deferral_count: u32,
    pub escalated: bool,
}

/// A non-motion item kept for a later cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarryOver {
    pub item_id: String,
    pub queue: AgendaQueue,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmUsage {
    /// New motions considered
    pub submitted: usize,
    pub scheduled: usize,
    pub deferred: usize,
}

/// Band 0 alone overflowed capacity for consecutive cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaturationEscalation {
    pub consecutive_cycles: u32,
    pub band0_items: usize,
    pub capacity: usize,
}

/// Where the cycle capacity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityBasis {
    /// Program-slot declarations in the capacity ledger
    Declared,
    /// Configured fallback
    Configured,
}

/// Explanation of every inclusion and deferral in one agenda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransparencyRecord {
    pub cycle: CycleNumber,
    pub capacity: usize,
    pub capacity_basis: CapacityBasis,
    /// Items waiting in each queue at cycle start
    pub queue_counts: BTreeMap<AgendaQueue, usize>,
    /// Items scheduled per band
    pub band_fill: BTreeMap<PriorityBand, usize>,
    pub realm_usage: BTreeMap<String, RealmUsage>,
    pub inclusions: Vec<Inclusion>,
    pub deferrals: Vec<DeferralNote>,
    pub carried_over: Vec<CarryOver>,
    /// Informational items dropped after their carry limit
    #[serde(default)]
    pub expired: Vec<CarryOver>,
    /// Bands 0-2 alone exceeded capacity
    pub capacity_crisis: bool,
    pub saturation: Option<SaturationEscalation>,
}

/// One cycle's ordered agenda.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agenda {
    pub cycle: CycleNumber,
    pub items: Vec<AgendaItem>,
    pub transparency: TransparencyRecord,
    pub generated_at: DateTime<Utc>,
}

impl Agenda {
    /// Items scheduled in a band.
    pub fn in_band(&self, band: PriorityBand) -> Vec<&AgendaItem> {
        self.items.iter().filter(|i| i.band() == band).collect()
    }

    /// Redacted view: titles and aggregate counts only.
    pub fn public_summary(&self) -> PublicAgendaSummary {
        let mut deferral_reasons: BTreeMap<String, usize> = BTreeMap::new();
        for note in &self.transparency.deferrals {
            *deferral_reasons.entry(note.reason.clone()).or_default() += 1;
        }
        PublicAgendaSummary {
            cycle: self.cycle,
            items: self
                .items
                .iter()
                .map(|i| PublicItem {
                    band: i.band().number(),
                    title: i.title.clone(),
                    realm: i.realm.clone(),
                })
                .collect(),
            queue_counts: self.transparency.queue_counts.clone(),
            band_fill: self
                .transparency
                .band_fill
                .iter()
                .map(|(band, n)| (band.number(), *n))
                .collect(),
            realm_usage: self.transparency.realm_usage.clone(),
            deferral_reasons,
            capacity_crisis: self.transparency.capacity_crisis,
            saturation_escalated: self.transparency.saturation.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicItem {
    pub band: u8,
    pub title: String,
    pub realm: Option<String>,
}

/// Public agenda view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicAgendaSummary {
    pub cycle: CycleNumber,
    pub items: Vec<PublicItem>,
    pub queue_counts: BTreeMap<AgendaQueue, usize>,
    pub band_fill: BTreeMap<u8, usize>,
    pub realm_usage: BTreeMap<String, RealmUsage>,
    /// Deferrals per reason code
    pub deferral_reasons: BTreeMap<String, usize>,
    pub capacity_crisis: bool,
    pub saturation_escalated: bool,
}
