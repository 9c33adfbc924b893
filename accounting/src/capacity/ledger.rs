//! The capacity reducer.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use charter::{new_id, Actor, AppendOnlyLedger, Capability, CycleNumber, LedgerRecord};

use super::types::{
    CapacityEntry, CapacitySource, CapacityState, CapacitySummary, CapacityView, Claim,
    ClaimOutcome, Declaration, Deferral, IdleRecord, Lapse, Shortfall,
};
use crate::config::CapacityConfig;
use crate::types::{AccountingError, Result};

/// Name of the capacity ledger.
pub const CAPACITY_LEDGER: &str = "capacity";

/// Reason recorded when a claim exceeds available capacity.
pub const INSUFFICIENT_CAPACITY: &str = "insufficient_capacity";

type Record = Arc<LedgerRecord<CapacityEntry>>;

/// Append-only record of declared capacity, demand and shortfall.
pub struct CapacityLedger {
    ledger: Arc<AppendOnlyLedger<CapacityEntry>>,
    state: Mutex<CapacityState>,
    config: CapacityConfig,
}

impl CapacityLedger {
    pub fn new(config: CapacityConfig) -> Self {
        Self::with_ledger(Arc::new(AppendOnlyLedger::new(CAPACITY_LEDGER)), config)
    }

    pub fn with_ledger(ledger: Arc<AppendOnlyLedger<CapacityEntry>>, config: CapacityConfig) -> Self {
        let state = CapacityState::fold(ledger.entries().iter());
        Self {
            ledger,
            state: Mutex::new(state),
            config,
        }
    }

    pub fn ledger(&self) -> Arc<AppendOnlyLedger<CapacityEntry>> {
        Arc::clone(&self.ledger)
    }

    pub fn config(&self) -> &CapacityConfig {
        &self.config
    }

    pub async fn state(&self) -> CapacityState {
        self.state.lock().await.clone()
    }

    async fn write(&self, state: &mut CapacityState, entry: CapacityEntry) -> Result<Record> {
        let record = self.ledger.append(entry).await?;
        if let Some(entry) = record.entry() {
            state.apply(entry);
            debug!(seq = record.seq, kind = entry.as_str(), "Capacity entry recorded");
        }
        Ok(record)
    }

    /// Declare capacity for a validity window.
    pub async fn declare(
        &self,
        actor: &Actor,
        source: CapacitySource,
        units: u32,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Result<Declaration> {
        actor.require(Capability::DeclareCapacity)?;
        if valid_until <= valid_from {
            return Err(AccountingError::validation(
                "invalid_window",
                "declaration must end after it starts",
            ));
        }

        let declaration = Declaration {
            id: new_id(),
            source,
            source_id: actor.id.clone(),
            units,
            valid_from,
            valid_until,
        };
        let mut state = self.state.lock().await;
        self.write(&mut state, CapacityEntry::Declared(declaration.clone()))
            .await?;
        info!(
            source = source.as_str(),
            source_id = %actor.id,
            units = units,
            "Capacity declared"
        );
        Ok(declaration)
    }

    #[allow(clippy::too_many_arguments)]
    fn deferral_locked(
        &self,
        state: &CapacityState,
        claimant: &str,
        subject: &str,
        realm: Option<String>,
        reason: &str,
        claim_id: Option<String>,
        cycle: CycleNumber,
        now: DateTime<Utc>,
    ) -> Deferral {
        let count = state.deferral_count(subject) + 1;
        Deferral {
            id: new_id(),
            subject: subject.to_string(),
            claimant: claimant.to_string(),
            realm,
            reason: reason.to_string(),
            claim_id,
            review_date: now + charter::window(self.config.deferral_review_secs),
            count,
            escalated: count >= self.config.escalation_count,
            cycle,
        }
    }

    /// Claim units from a source. An unmet claim is deferred, never rejected.
    pub async fn claim(
        &self,
        claimant: &str,
        source: CapacitySource,
        units: u32,
        subject: &str,
        cycle: CycleNumber,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        if units == 0 {
            return Err(AccountingError::validation("zero_units", "claim requests no units"));
        }

        let mut state = self.state.lock().await;
        let granted = state.available(source, cycle, now) >= units;
        let claim = Claim {
            id: new_id(),
            source,
            claimant: claimant.to_string(),
            subject: subject.to_string(),
            units,
            cycle,
            granted,
            at: now,
        };
        self.write(&mut state, CapacityEntry::Claimed(claim.clone()))
            .await?;

        if granted {
            return Ok(ClaimOutcome::Granted(claim));
        }

        let deferral = self.deferral_locked(
            &state,
            claimant,
            subject,
            None,
            INSUFFICIENT_CAPACITY,
            Some(claim.id.clone()),
            cycle,
            now,
        );
        self.write(&mut state, CapacityEntry::Deferred(deferral.clone()))
            .await?;
        info!(
            subject = %subject,
            source = source.as_str(),
            units = units,
            count = deferral.count,
            "Claim deferred"
        );
        Ok(ClaimOutcome::Deferred { claim, deferral })
    }

    /// Record a deferral decided elsewhere (e.g. a per-realm quota).
    pub async fn defer(
        &self,
        claimant: &str,
        subject: &str,
        realm: Option<String>,
        reason: &str,
        cycle: CycleNumber,
        now: DateTime<Utc>,
    ) -> Result<Deferral> {
        let mut state = self.state.lock().await;
        let deferral = self.deferral_locked(&state, claimant, subject, realm, reason, None, cycle, now);
        self.write(&mut state, CapacityEntry::Deferred(deferral.clone()))
            .await?;
        if deferral.escalated {
            warn!(subject = %subject, count = deferral.count, reason = %reason, "Deferral escalated");
        }
        Ok(deferral)
    }

    /// Resolve the open deferral for a subject, if any.
    pub async fn resolve(
        &self,
        subject: &str,
        resolution: impl Into<String>,
        cycle: CycleNumber,
    ) -> Result<Option<Record>> {
        let mut state = self.state.lock().await;
        let Some(open) = state.open_deferrals.get(subject).cloned() else {
            return Ok(None);
        };
        let entry = CapacityEntry::Resolved {
            subject: subject.to_string(),
            deferral_id: open.id,
            resolution: resolution.into(),
            cycle,
        };
        Ok(Some(self.write(&mut state, entry).await?))
    }

    /// Record every open deferral whose review date passed unresolved.
    pub async fn sweep_lapses(&self, now: DateTime<Utc>) -> Result<Vec<Lapse>> {
        let mut state = self.state.lock().await;
        let mut lapses = Vec::new();
        for deferral in state.lapsing(now) {
            let occurrences = state
                .lapses_by_claimant
                .get(&deferral.claimant)
                .copied()
                .unwrap_or(0)
                + 1;
            let lapse = Lapse {
                deferral_id: deferral.id,
                subject: deferral.subject,
                claimant: deferral.claimant,
                review_date: deferral.review_date,
                occurrences,
            };
            self.write(&mut state, CapacityEntry::Lapsed(lapse.clone()))
                .await?;
            warn!(
                subject = %lapse.subject,
                claimant = %lapse.claimant,
                occurrences = occurrences,
                "Deferral review lapsed"
            );
            lapses.push(lapse);
        }
        Ok(lapses)
    }

    /// Record delivered capacity below what a declaration promised.
    ///
    /// Returns `None` when the declaration was honoured.
    pub async fn report_delivery(
        &self,
        declaration_id: &str,
        delivered: u32,
        cycle: CycleNumber,
    ) -> Result<Option<Shortfall>> {
        let mut state = self.state.lock().await;
        let Some(declaration) = state.declarations.get(declaration_id).cloned() else {
            return Err(AccountingError::UnknownDeclaration(declaration_id.to_string()));
        };
        if delivered >= declaration.units {
            return Ok(None);
        }

        let occurrences = state
            .shortfalls_by_source
            .get(&declaration.source_id)
            .copied()
            .unwrap_or(0)
            + 1;
        let shortfall = Shortfall {
            declaration_id: declaration.id,
            source: declaration.source,
            source_id: declaration.source_id,
            declared: declaration.units,
            delivered,
            cycle,
            occurrences,
        };
        self.write(&mut state, CapacityEntry::Shortfall(shortfall.clone()))
            .await?;
        warn!(
            source_id = %shortfall.source_id,
            declared = shortfall.declared,
            delivered = delivered,
            "Capacity over-declared"
        );
        Ok(Some(shortfall))
    }

    /// Close a cycle: record idle capacity per source and expire lapsed declarations.
    pub async fn close_cycle(&self, cycle: CycleNumber, now: DateTime<Utc>) -> Result<Vec<IdleRecord>> {
        let mut state = self.state.lock().await;
        let mut idle_records = Vec::new();

        if !state.closed_cycles.contains(&cycle) {
            for source in CapacitySource::all() {
                if !state.has_declaration(source, now) {
                    continue;
                }
                let declared = state.declared_units(source, now);
                let claimed = state.granted_units(source, cycle);
                let idle = IdleRecord {
                    source,
                    cycle,
                    declared,
                    claimed,
                    idle: declared.saturating_sub(claimed),
                };
                self.write(&mut state, CapacityEntry::Idle(idle.clone()))
                    .await?;
                idle_records.push(idle);
            }
        }

        let expired: Vec<String> = state
            .declarations
            .values()
            .filter(|d| d.valid_until <= now)
            .map(|d| d.id.clone())
            .collect();
        for declaration_id in expired {
            self.write(&mut state, CapacityEntry::Expired { declaration_id })
                .await?;
        }

        Ok(idle_records)
    }

    /// Agenda slots declared for the cycle, if any program-slot declaration is active.
    pub async fn cycle_slots(&self, now: DateTime<Utc>) -> Option<u32> {
        let state = self.state.lock().await;
        state
            .has_declaration(CapacitySource::ProgramSlots, now)
            .then(|| state.declared_units(CapacitySource::ProgramSlots, now))
    }

    pub async fn deferral_count(&self, subject: &str) -> u32 {
        self.state.lock().await.deferral_count(subject)
    }

    /// Unresolved deferrals, oldest cycle first.
    pub async fn open_deferrals(&self) -> Vec<Deferral> {
        let mut open: Vec<Deferral> = self
            .state
            .lock()
            .await
            .open_deferrals
            .values()
            .cloned()
            .collect();
        open.sort_by(|a, b| a.cycle.cmp(&b.cycle).then_with(|| a.subject.cmp(&b.subject)));
        open
    }

    /// Public summary for a cycle.
    pub async fn summary(&self, cycle: CycleNumber, now: DateTime<Utc>) -> CapacitySummary {
        let state = self.state.lock().await;
        CapacitySummary {
            available: CapacitySource::all()
                .into_iter()
                .map(|s| (s, state.available(s, cycle, now)))
                .collect(),
            open_deferrals: state.open_deferrals.len(),
            escalated_deferrals: state.open_deferrals.values().filter(|d| d.escalated).count(),
            lapses: state.lapsed.len(),
        }
    }

    /// Internal view: folded state and full ledger.
    pub async fn internal_view(&self) -> CapacityView {
        let state = self.state.lock().await.clone();
        CapacityView {
            state,
            records: self.ledger.snapshot().iter().map(|r| (**r).clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use charter::Role;

    fn source() -> Actor {
        Actor::new("program-office", "Program Office").with_role(Role::CapacitySource)
    }

    #[tokio::test]
    async fn test_declare_requires_capability() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        let outsider = Actor::new("outsider", "Outsider");
        let err = ledger
            .declare(&outsider, CapacitySource::ProgramSlots, 4, now, now + Duration::days(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let err = ledger
            .declare(&source(), CapacitySource::ProgramSlots, 4, now, now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_window");
    }

    #[tokio::test]
    async fn test_unmet_claim_is_deferred_not_rejected() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        ledger
            .declare(&source(), CapacitySource::TaskThroughput, 2, now, now + Duration::days(7))
            .await
            .unwrap();

        let first = ledger
            .claim("delegator", CapacitySource::TaskThroughput, 2, "plan-a", 1, now)
            .await
            .unwrap();
        assert!(matches!(first, ClaimOutcome::Granted(_)));

        let second = ledger
            .claim("delegator", CapacitySource::TaskThroughput, 1, "plan-b", 1, now)
            .await
            .unwrap();
        match second {
            ClaimOutcome::Deferred { claim, deferral } => {
                assert!(!claim.granted);
                assert_eq!(deferral.reason, INSUFFICIENT_CAPACITY);
                assert_eq!(deferral.count, 1);
            }
            other => panic!("expected deferral, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deferral_count_accumulates_and_escalates() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        for cycle in 1..=3 {
            ledger
                .defer("steward", "motion-1", Some("water".into()), "realm_quota_exceeded", cycle, now)
                .await
                .unwrap();
        }
        let open = ledger.open_deferrals().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].count, 3);
        assert!(open[0].escalated);

        ledger.resolve("motion-1", "scheduled", 4).await.unwrap();
        assert_eq!(ledger.deferral_count("motion-1").await, 0);
    }

    #[tokio::test]
    async fn test_lapse_recorded_once() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        ledger
            .defer("steward", "motion-1", None, "realm_quota_exceeded", 1, now)
            .await
            .unwrap();

        assert!(ledger.sweep_lapses(now).await.unwrap().is_empty());
        let later = now + Duration::days(8);
        let lapses = ledger.sweep_lapses(later).await.unwrap();
        assert_eq!(lapses.len(), 1);
        assert_eq!(lapses[0].occurrences, 1);
        assert!(ledger.sweep_lapses(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_capacity_recorded_at_close() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        ledger
            .declare(&source(), CapacitySource::ExecutorAvailability, 5, now, now + Duration::days(7))
            .await
            .unwrap();
        ledger
            .claim("router", CapacitySource::ExecutorAvailability, 2, "task-1", 1, now)
            .await
            .unwrap();

        let idle = ledger.close_cycle(1, now).await.unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].idle, 3);
        // Closing twice records nothing new.
        assert!(ledger.close_cycle(1, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shortfall_counts_repeats() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        let declaration = ledger
            .declare(&source(), CapacitySource::ProgramSlots, 6, now, now + Duration::days(7))
            .await
            .unwrap();

        assert!(ledger.report_delivery(&declaration.id, 6, 1).await.unwrap().is_none());
        let first = ledger.report_delivery(&declaration.id, 2, 1).await.unwrap().unwrap();
        let second = ledger.report_delivery(&declaration.id, 3, 2).await.unwrap().unwrap();
        assert_eq!(first.occurrences, 1);
        assert_eq!(second.occurrences, 2);
        assert_eq!(ledger.cycle_slots(now).await, Some(6));
    }

    #[tokio::test]
    async fn test_oversized_declarations_saturate() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        let until = now + Duration::days(7);
        ledger
            .declare(&source(), CapacitySource::ProgramSlots, u32::MAX, now, until)
            .await
            .unwrap();
        ledger
            .declare(&source(), CapacitySource::ProgramSlots, 1, now, until)
            .await
            .unwrap();
        assert_eq!(ledger.cycle_slots(now).await, Some(u32::MAX));

        let claim = ledger
            .claim("router", CapacitySource::ProgramSlots, u32::MAX, "agenda", 1, now)
            .await
            .unwrap();
        assert!(matches!(claim, ClaimOutcome::Granted(_)));
        let claim = ledger
            .claim("router", CapacitySource::ProgramSlots, 1, "agenda-extra", 1, now)
            .await
            .unwrap();
        assert!(matches!(claim, ClaimOutcome::Deferred { .. }));

        let idle = ledger.close_cycle(1, now).await.unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].declared, u32::MAX);
        assert_eq!(idle[0].idle, 0);
    }

    #[test]
    fn test_granted_units_saturate_on_replay() {
        let claim = |units| {
            CapacityEntry::Claimed(Claim {
                id: format!("claim-{}", units),
                claimant: "router".to_string(),
                source: CapacitySource::ProgramSlots,
                units,
                subject: "agenda".to_string(),
                cycle: 1,
                granted: true,
                at: Utc::now(),
            })
        };
        let state = CapacityState::fold(&[claim(u32::MAX), claim(5)]);
        assert_eq!(state.granted_units(CapacitySource::ProgramSlots, 1), u32::MAX);
    }

    #[tokio::test]
    async fn test_declarations_expire() {
        let ledger = CapacityLedger::new(CapacityConfig::default());
        let now = Utc::now();
        ledger
            .declare(&source(), CapacitySource::ProgramSlots, 6, now, now + Duration::hours(1))
            .await
            .unwrap();
        ledger.close_cycle(1, now + Duration::hours(2)).await.unwrap();
        assert!(ledger.state().await.declarations.is_empty());
        assert_eq!(ledger.cycle_slots(now + Duration::hours(2)).await, None);
    }
}
