//! Per-cycle agenda generation.
//!
//! Generation is a deterministic batch over a snapshot of the six queues
//! taken at cycle start. Submissions that arrive while it runs land in the
//! live queues and wait for the next cycle. Only one generation may run at
//! a time.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use accounting::CapacityLedger;
use charter::{Actor, Capability, CycleNumber};

use super::gate::{AdmissionGate, AdmissionRecord, MotionDraft};
use super::item::{AgendaItem, AgendaQueue, ItemSource, PriorityBand};
use super::transparency::{
    Agenda, CapacityBasis, CarryOver, DeferralNote, Inclusion, InclusionReason, RealmUsage,
    SaturationEscalation, TransparencyRecord,
};
use crate::config::AgendaConfig;
use crate::types::AgendaError;

/// Deferral reason: realm already had its quota of new motions.
pub const REALM_QUOTA_EXCEEDED: &str = "realm_quota_exceeded";
/// Deferral reason: Bands 0-2 overflowed capacity.
pub const CAPACITY_CRISIS: &str = "capacity_crisis";
/// Deferral reason: no capacity left after higher bands.
pub const CYCLE_CAPACITY_EXHAUSTED: &str = "cycle_capacity_exhausted";
/// Informational item carried over past its limit.
pub const INFORMATIONAL_EXPIRED: &str = "informational_expired";

type Result<T> = std::result::Result<T, AgendaError>;
type Queues = BTreeMap<AgendaQueue, Vec<AgendaItem>>;

fn oldest_first(a: &AgendaItem, b: &AgendaItem) -> std::cmp::Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.id.cmp(&b.id))
}

fn sponsor_of(item: &AgendaItem) -> &str {
    match &item.source {
        ItemSource::Motion { sponsor_id } => sponsor_id,
        _ => "agenda",
    }
}

/// Working state of one generation pass.
struct Plan {
    items: Vec<AgendaItem>,
    inclusions: Vec<Inclusion>,
    deferrals: Vec<DeferralNote>,
    carried_over: Vec<CarryOver>,
    expired: Vec<CarryOver>,
    /// Motions moved to the deferred queue
    deferred_items: Vec<AgendaItem>,
    band_fill: BTreeMap<PriorityBand, usize>,
}

impl Plan {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            inclusions: Vec::new(),
            deferrals: Vec::new(),
            carried_over: Vec::new(),
            expired: Vec::new(),
            deferred_items: Vec::new(),
            band_fill: BTreeMap::new(),
        }
    }

    fn include(&mut self, item: AgendaItem, reason: InclusionReason) {
        let band = item.band();
        self.inclusions.push(Inclusion {
            item_id: item.id.clone(),
            position: self.items.len() + 1,
            band,
            queue: item.queue,
            reason,
        });
        *self.band_fill.entry(band).or_default() += 1;
        self.items.push(item);
    }

    fn carry(&mut self, item: &AgendaItem, reason: &str) {
        self.carried_over.push(CarryOver {
            item_id: item.id.clone(),
            queue: item.queue,
            reason: reason.to_string(),
        });
    }

    fn expire(&mut self, item: &AgendaItem) {
        self.expired.push(CarryOver {
            item_id: item.id.clone(),
            queue: item.queue,
            reason: INFORMATIONAL_EXPIRED.to_string(),
        });
    }
}

/// Builds each cycle's ordered agenda from the six input queues.
pub struct AgendaController {
    config: AgendaConfig,
    /// Live queues
    queues: RwLock<Queues>,
    /// Motion admission
    gate: AdmissionGate,
    /// Held for the duration of one generation
    generating: Mutex<()>,
    /// Consecutive cycles in which Band 0 alone exceeded capacity
    saturation_streak: AtomicU32,
    /// Every generated agenda
    history: RwLock<Vec<Agenda>>,
}

impl AgendaController {
    pub fn new(config: AgendaConfig) -> Self {
        Self {
            config,
            queues: RwLock::new(BTreeMap::new()),
            gate: AdmissionGate::new(),
            generating: Mutex::new(()),
            saturation_streak: AtomicU32::new(0),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AgendaConfig {
        &self.config
    }

    async fn push(&self, item: AgendaItem) -> AgendaItem {
        debug!(item_id = %item.id, queue = item.queue.as_str(), "Agenda item queued");
        self.queues
            .write()
            .await
            .entry(item.queue)
            .or_default()
            .push(item.clone());
        item
    }

    /// Submit a motion through the admission gate.
    pub async fn submit_motion(
        &self,
        sponsor: &Actor,
        draft: MotionDraft,
        now: DateTime<Utc>,
    ) -> Result<AgendaItem> {
        let mut queues = self.queues.write().await;
        let pending: Vec<AgendaItem> = [AgendaQueue::NewMotions, AgendaQueue::DeferredMotions]
            .iter()
            .flat_map(|q| queues.get(q).cloned().unwrap_or_default())
            .collect();
        let item = self.gate.admit(sponsor, draft, &pending, now).await?;
        queues
            .entry(AgendaQueue::NewMotions)
            .or_default()
            .push(item.clone());
        Ok(item)
    }

    /// Raise an active blocker against a subject.
    pub async fn raise_blocker(
        &self,
        actor: &Actor,
        subject_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<AgendaItem> {
        actor.require(Capability::RaiseBlocker)?;
        if title.trim().is_empty() {
            return Err(AgendaError::Rejected {
                code: "missing_field:title".to_string(),
                detail: "a blocker needs a title".to_string(),
            });
        }
        let item = AgendaItem::new(
            AgendaQueue::ActiveBlockers,
            subject_id,
            title.trim(),
            ItemSource::Blocker {
                raised_by: actor.id.clone(),
            },
            now,
        );
        info!(item_id = %item.id, subject_id = %subject_id, raised_by = %actor.id, "Blocker raised");
        Ok(self.push(item).await)
    }

    /// Post an optional item.
    pub async fn post_informational(&self, actor: &Actor, title: &str, now: DateTime<Utc>) -> Result<AgendaItem> {
        actor.require(Capability::SubmitMotion)?;
        if title.trim().is_empty() {
            return Err(AgendaError::Rejected {
                code: "missing_field:title".to_string(),
                detail: "an informational item needs a title".to_string(),
            });
        }
        let item = AgendaItem::new(
            AgendaQueue::Informational,
            "",
            title.trim(),
            ItemSource::Informational {
                posted_by: actor.id.clone(),
            },
            now,
        );
        Ok(self.push(item).await)
    }

    /// Queue a forced Band 0 item.
    pub async fn push_forced(
        &self,
        queue: AgendaQueue,
        subject_id: &str,
        title: String,
        source: ItemSource,
        now: DateTime<Utc>,
    ) -> AgendaItem {
        self.push(AgendaItem::new(queue, subject_id, title, source, now))
            .await
    }

    /// Queue a mandatory review unless one with the same reason is already waiting.
    pub async fn push_mandatory(&self, reason: &str, title: String, now: DateTime<Utc>) -> Option<AgendaItem> {
        let waiting = self
            .queues
            .read()
            .await
            .get(&AgendaQueue::MandatoryReviews)
            .map(|items| {
                items.iter().any(|i| {
                    matches!(&i.source, ItemSource::MandatoryReview { reason: r } if r == reason)
                })
            })
            .unwrap_or(false);
        if waiting {
            return None;
        }
        let source = ItemSource::MandatoryReview {
            reason: reason.to_string(),
        };
        Some(
            self.push_forced(AgendaQueue::MandatoryReviews, reason, title, source, now)
                .await,
        )
    }

    /// Items waiting in a queue.
    pub async fn pending(&self, queue: AgendaQueue) -> Vec<AgendaItem> {
        self.queues
            .read()
            .await
            .get(&queue)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn admission_log(&self) -> Vec<AdmissionRecord> {
        self.gate.log().await
    }

    pub async fn history(&self) -> Vec<Agenda> {
        self.history.read().await.clone()
    }

    pub async fn latest(&self) -> Option<Agenda> {
        self.history.read().await.last().cloned()
    }

    /// Generate the agenda for a cycle.
    ///
    /// Band 0 is always included in full. Blockers and escalated motions
    /// come next, oldest first, then earlier deferrals by count and age,
    /// then new motions under the realm quota, then best-effort items. Every
    /// motion left off is deferred through the capacity ledger.
    pub async fn generate(
        &self,
        cycle: CycleNumber,
        capacity_ledger: &CapacityLedger,
        now: DateTime<Utc>,
    ) -> Result<Agenda> {
        let _running = self
            .generating
            .try_lock()
            .map_err(|_| AgendaError::CycleInProgress(cycle))?;
        let snapshot: Queues = self.queues.read().await.clone();
        let queued = |q: AgendaQueue| {
            let mut items = snapshot.get(&q).cloned().unwrap_or_default();
            items.sort_by(oldest_first);
            items
        };

        let (capacity, capacity_basis) = match capacity_ledger.cycle_slots(now).await {
            Some(slots) => (slots as usize, CapacityBasis::Declared),
            None => (self.config.cycle_capacity, CapacityBasis::Configured),
        };
        let queue_counts: BTreeMap<AgendaQueue, usize> = AgendaQueue::all()
            .into_iter()
            .map(|q| (q, snapshot.get(&q).map(|v| v.len()).unwrap_or(0)))
            .collect();

        let mut band0 = queued(AgendaQueue::WitnessAndFindings);
        band0.extend(queued(AgendaQueue::MandatoryReviews));

        let (escalated, mut band2): (Vec<AgendaItem>, Vec<AgendaItem>) = queued(AgendaQueue::DeferredMotions)
            .into_iter()
            .partition(|i| i.deferral_count >= self.config.escalation_threshold);
        let mut band1 = queued(AgendaQueue::ActiveBlockers);
        band1.extend(escalated.into_iter().map(|mut i| {
            i.escalated = true;
            i
        }));
        band1.sort_by(oldest_first);
        band2.sort_by(|a, b| {
            b.deferral_count
                .cmp(&a.deferral_count)
                .then_with(|| oldest_first(a, b))
        });

        let capacity_crisis = band0.len() + band1.len() + band2.len() > capacity;
        let saturation = self.track_saturation(band0.len(), capacity);

        let mut plan = Plan::new();
        for item in band0 {
            plan.include(item, InclusionReason::Forced);
        }

        for item in band1 {
            if plan.items.len() < capacity {
                let reason = if item.escalated {
                    InclusionReason::EscalatedDeferral
                } else {
                    InclusionReason::ActiveBlocker
                };
                plan.include(item, reason);
            } else {
                self.hold_over(&mut plan, item, CAPACITY_CRISIS, cycle, capacity_ledger, now)
                    .await?;
            }
        }
        for item in band2 {
            if plan.items.len() < capacity {
                plan.include(item, InclusionReason::PriorDeferral);
            } else {
                self.hold_over(&mut plan, item, CAPACITY_CRISIS, cycle, capacity_ledger, now)
                    .await?;
            }
        }

        let exhausted = if capacity_crisis {
            CAPACITY_CRISIS
        } else {
            CYCLE_CAPACITY_EXHAUSTED
        };

        // Band 3: realm quota first, then whatever capacity remains.
        let mut realm_usage: BTreeMap<String, RealmUsage> = BTreeMap::new();
        for item in queued(AgendaQueue::NewMotions) {
            let realm = item.realm.clone().unwrap_or_default();
            let usage = realm_usage.entry(realm).or_default();
            usage.submitted += 1;
            let reason = if usage.scheduled >= self.config.realm_quota {
                Some(REALM_QUOTA_EXCEEDED)
            } else if plan.items.len() >= capacity {
                Some(exhausted)
            } else {
                None
            };
            match reason {
                None => {
                    usage.scheduled += 1;
                    plan.include(item, InclusionReason::WithinRealmQuota);
                }
                Some(reason) => {
                    usage.deferred += 1;
                    self.hold_over(&mut plan, item, reason, cycle, capacity_ledger, now)
                        .await?;
                }
            }
        }

        for item in queued(AgendaQueue::Informational) {
            if plan.items.len() < capacity {
                plan.include(item, InclusionReason::SpareCapacity);
            } else if item.carried >= self.config.informational_carry_limit {
                plan.expire(&item);
            } else {
                plan.carry(&item, exhausted);
            }
        }

        for item in plan.items.iter().filter(|i| i.is_motion()) {
            capacity_ledger
                .resolve(&item.subject_id, "scheduled", cycle)
                .await?;
        }

        self.commit(&plan).await;

        let agenda = Agenda {
            cycle,
            transparency: TransparencyRecord {
                cycle,
                capacity,
                capacity_basis,
                queue_counts,
                band_fill: plan.band_fill,
                realm_usage,
                inclusions: plan.inclusions,
                deferrals: plan.deferrals,
                carried_over: plan.carried_over,
                expired: plan.expired,
                capacity_crisis,
                saturation,
            },
            items: plan.items,
            generated_at: now,
        };

        if capacity_crisis {
            warn!(cycle = cycle, capacity = capacity, "Agenda capacity crisis");
        }
        info!(
            cycle = cycle,
            items = agenda.items.len(),
            deferrals = agenda.transparency.deferrals.len(),
            carried_over = agenda.transparency.carried_over.len(),
            "Agenda generated"
        );
        self.history.write().await.push(agenda.clone());
        Ok(agenda)
    }

    /// Defer a motion through the capacity ledger, or carry a blocker over.
    async fn hold_over(
        &self,
        plan: &mut Plan,
        mut item: AgendaItem,
        reason: &str,
        cycle: CycleNumber,
        capacity_ledger: &CapacityLedger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !item.is_motion() {
            plan.carry(&item, reason);
            return Ok(());
        }
        let deferral = capacity_ledger
            .defer(
                sponsor_of(&item),
                &item.subject_id,
                item.realm.clone(),
                reason,
                cycle,
                now,
            )
            .await?;
        item.queue = AgendaQueue::DeferredMotions;
        item.deferral_count = deferral.count;
        item.escalated = false;
        let escalated = deferral.count >= self.config.escalation_threshold;
        plan.deferrals.push(DeferralNote {
            item_id: item.id.clone(),
            realm: item.realm.clone(),
            reason: reason.to_string(),
            deferral_id: deferral.id,
            deferral_count: deferral.count,
            escalated,
        });
        plan.deferred_items.push(item);
        Ok(())
    }

    /// Drop scheduled and expired items from the live queues, move
    /// deferrals and count carry-overs.
    async fn commit(&self, plan: &Plan) {
        let removed: HashSet<&str> = plan
            .items
            .iter()
            .map(|i| i.id.as_str())
            .chain(plan.deferred_items.iter().map(|i| i.id.as_str()))
            .chain(plan.expired.iter().map(|c| c.item_id.as_str()))
            .collect();
        let carried: HashSet<&str> = plan.carried_over.iter().map(|c| c.item_id.as_str()).collect();

        let mut queues = self.queues.write().await;
        for items in queues.values_mut() {
            items.retain(|i| !removed.contains(i.id.as_str()));
            for item in items.iter_mut().filter(|i| carried.contains(i.id.as_str())) {
                item.carried += 1;
            }
        }
        queues
            .entry(AgendaQueue::DeferredMotions)
            .or_default()
            .extend(plan.deferred_items.iter().cloned());
    }

    fn track_saturation(&self, band0: usize, capacity: usize) -> Option<SaturationEscalation> {
        if band0 <= capacity {
            self.saturation_streak.store(0, Ordering::SeqCst);
            return None;
        }
        let streak = self.saturation_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak < self.config.band0_saturation_cycles {
            return None;
        }
        warn!(
            consecutive_cycles = streak,
            band0_items = band0,
            capacity = capacity,
            "Band 0 saturation escalated"
        );
        Some(SaturationEscalation {
            consecutive_cycles: streak,
            band0_items: band0,
            capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accounting::CapacityConfig;
    use charter::Role;

    fn steward() -> Actor {
        Actor::new("steward", "Steward").with_role(Role::Steward)
    }

    fn controller() -> AgendaController {
        AgendaController::new(AgendaConfig::default())
    }

    async fn motion(controller: &AgendaController, title: &str, realm: &str) -> AgendaItem {
        controller
            .submit_motion(&steward(), MotionDraft::new(title, realm, "body"), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_realm_quota_defers_excess() {
        let controller = controller();
        let capacity = CapacityLedger::new(CapacityConfig::default());
        for i in 0..5 {
            motion(&controller, &format!("Motion {}", i), "water").await;
        }

        let agenda = controller.generate(1, &capacity, Utc::now()).await.unwrap();
        assert_eq!(agenda.in_band(PriorityBand::Quota).len(), 1);
        assert_eq!(agenda.transparency.deferrals.len(), 4);
        assert!(agenda
            .transparency
            .deferrals
            .iter()
            .all(|d| d.reason == REALM_QUOTA_EXCEEDED && d.deferral_count == 1));
        assert_eq!(controller.pending(AgendaQueue::DeferredMotions).await.len(), 4);
        assert!(controller.pending(AgendaQueue::NewMotions).await.is_empty());
    }

    #[tokio::test]
    async fn test_deferred_motions_come_back_in_band_two() {
        let controller = controller();
        let capacity = CapacityLedger::new(CapacityConfig::default());
        motion(&controller, "First", "water").await;
        motion(&controller, "Second", "water").await;
        controller.generate(1, &capacity, Utc::now()).await.unwrap();

        let agenda = controller.generate(2, &capacity, Utc::now()).await.unwrap();
        let band2 = agenda.in_band(PriorityBand::Deferred);
        assert_eq!(band2.len(), 1);
        assert_eq!(band2[0].title, "Second");
        assert_eq!(capacity.deferral_count(&band2[0].subject_id).await, 0);
    }

    #[tokio::test]
    async fn test_band_zero_survives_zero_capacity() {
        let mut config = AgendaConfig::default();
        config.cycle_capacity = 0;
        let controller = AgendaController::new(config);
        let capacity = CapacityLedger::new(CapacityConfig::default());
        controller
            .push_mandatory("periodic_review", "Periodic review".into(), Utc::now())
            .await
            .unwrap();
        controller
            .raise_blocker(&steward(), "task-1", "Stalled survey", Utc::now())
            .await
            .unwrap();

        let agenda = controller.generate(1, &capacity, Utc::now()).await.unwrap();
        assert_eq!(agenda.in_band(PriorityBand::Forced).len(), 1);
        assert!(agenda.transparency.capacity_crisis);
        assert_eq!(agenda.transparency.carried_over.len(), 1);
        // The blocker is retained for the next cycle.
        assert_eq!(controller.pending(AgendaQueue::ActiveBlockers).await.len(), 1);
    }

    #[tokio::test]
    async fn test_crisis_deferrals_name_the_crisis() {
        let mut config = AgendaConfig::default();
        config.cycle_capacity = 1;
        let controller = AgendaController::new(config);
        let capacity = CapacityLedger::new(CapacityConfig::default());
        controller
            .push_mandatory("periodic_review", "Periodic review".into(), Utc::now())
            .await
            .unwrap();
        controller
            .raise_blocker(&steward(), "task-1", "Stalled survey", Utc::now())
            .await
            .unwrap();
        motion(&controller, "Repair the weir", "water").await;
        controller
            .post_informational(&steward(), "Quarterly figures", Utc::now())
            .await
            .unwrap();

        let agenda = controller.generate(1, &capacity, Utc::now()).await.unwrap();
        assert!(agenda.transparency.capacity_crisis);
        assert_eq!(agenda.transparency.deferrals.len(), 1);
        assert_eq!(agenda.transparency.deferrals[0].reason, CAPACITY_CRISIS);
        assert!(agenda
            .transparency
            .carried_over
            .iter()
            .all(|c| c.reason == CAPACITY_CRISIS));
    }

    #[tokio::test]
    async fn test_exhausted_capacity_without_crisis() {
        let mut config = AgendaConfig::default();
        config.cycle_capacity = 1;
        let controller = AgendaController::new(config);
        let capacity = CapacityLedger::new(CapacityConfig::default());
        motion(&controller, "Repair the weir", "water").await;
        motion(&controller, "Resurface the east road", "roads").await;

        let agenda = controller.generate(1, &capacity, Utc::now()).await.unwrap();
        assert!(!agenda.transparency.capacity_crisis);
        assert_eq!(agenda.transparency.deferrals.len(), 1);
        assert_eq!(agenda.transparency.deferrals[0].reason, CYCLE_CAPACITY_EXHAUSTED);
    }

    #[tokio::test]
    async fn test_informational_items_expire_after_carry_limit() {
        let mut config = AgendaConfig::default();
        config.cycle_capacity = 0;
        config.informational_carry_limit = 2;
        let controller = AgendaController::new(config);
        let capacity = CapacityLedger::new(CapacityConfig::default());
        let posted = controller
            .post_informational(&steward(), "Quarterly figures", Utc::now())
            .await
            .unwrap();

        for cycle in 1..=2 {
            let agenda = controller.generate(cycle, &capacity, Utc::now()).await.unwrap();
            assert_eq!(agenda.transparency.carried_over.len(), 1);
            assert!(agenda.transparency.expired.is_empty());
        }
        let pending = controller.pending(AgendaQueue::Informational).await;
        assert_eq!(pending[0].carried, 2);

        let agenda = controller.generate(3, &capacity, Utc::now()).await.unwrap();
        assert!(agenda.transparency.carried_over.is_empty());
        assert_eq!(agenda.transparency.expired.len(), 1);
        assert_eq!(agenda.transparency.expired[0].item_id, posted.id);
        assert_eq!(agenda.transparency.expired[0].reason, INFORMATIONAL_EXPIRED);
        assert!(controller.pending(AgendaQueue::Informational).await.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_band_zero_overflow_escalates() {
        let mut config = AgendaConfig::default();
        config.cycle_capacity = 1;
        let controller = AgendaController::new(config);
        let capacity = CapacityLedger::new(CapacityConfig::default());

        for cycle in 1..=2 {
            for reason in ["a", "b"] {
                controller
                    .push_mandatory(reason, format!("Review {}", reason), Utc::now())
                    .await;
            }
            let agenda = controller.generate(cycle, &capacity, Utc::now()).await.unwrap();
            assert_eq!(agenda.in_band(PriorityBand::Forced).len(), 2);
            assert_eq!(agenda.transparency.saturation.is_some(), cycle == 2);
        }
    }

    #[tokio::test]
    async fn test_escalated_deferral_moves_to_band_one() {
        let controller = controller();
        let capacity = CapacityLedger::new(CapacityConfig::default());
        let loser = motion(&controller, "Keeps losing", "water").await;
        for c in 1..=3 {
            capacity
                .defer("steward", &loser.subject_id, Some("water".into()), REALM_QUOTA_EXCEEDED, c, Utc::now())
                .await
                .unwrap();
        }
        {
            let mut queues = controller.queues.write().await;
            let mut moved = loser.clone();
            moved.queue = AgendaQueue::DeferredMotions;
            moved.deferral_count = 3;
            queues.get_mut(&AgendaQueue::NewMotions).unwrap().retain(|i| i.id != loser.id);
            queues.entry(AgendaQueue::DeferredMotions).or_default().push(moved);
        }

        let agenda = controller.generate(4, &capacity, Utc::now()).await.unwrap();
        let band1 = agenda.in_band(PriorityBand::Blocker);
        assert_eq!(band1.len(), 1);
        assert_eq!(band1[0].title, "Keeps losing");
        assert!(agenda
            .transparency
            .inclusions
            .iter()
            .any(|i| i.reason == InclusionReason::EscalatedDeferral));
    }

    #[tokio::test]
    async fn test_public_summary_is_redacted() {
        let controller = controller();
        let capacity = CapacityLedger::new(CapacityConfig::default());
        motion(&controller, "Repair the weir", "water").await;
        motion(&controller, "Dredge the canal", "water").await;
        let agenda = controller.generate(1, &capacity, Utc::now()).await.unwrap();

        let summary = agenda.public_summary();
        assert_eq!(summary.items.len(), 1);
        assert_eq!(summary.deferral_reasons.get(REALM_QUOTA_EXCEEDED), Some(&1));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("body"));
    }
}
