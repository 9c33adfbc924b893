//! The legitimacy reducer.
//!
//! All writes go through one mutex: the reducer reads the folded state,
//! derives the next entries, appends them and applies them. The band is
//! never set by any other path.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use charter::{Actor, AppendOnlyLedger, Capability, CycleNumber, LedgerRecord};

use super::band::{BandEffects, LegitimacyBand};
use super::entry::{
    LegitimacyEntry, LegitimacyEntryKind, LegitimacyState, OpenRemedy, TriggerKind, TriggerWeight,
};
use super::summary::{Highlight, LegitimacySummary, LegitimacyView};
use crate::config::LegitimacyConfig;
use crate::types::{AccountingError, Result};

/// Name of the legitimacy ledger.
pub const LEGITIMACY_LEDGER: &str = "legitimacy";

/// Highlights included in the public summary.
const SUMMARY_HIGHLIGHTS: usize = 5;

type Record = Arc<LedgerRecord<LegitimacyEntry>>;

/// Banded legitimacy state machine over an append-only ledger.
pub struct LegitimacyLedger {
    /// Every legitimacy fact
    ledger: Arc<AppendOnlyLedger<LegitimacyEntry>>,
    /// Folded state, the reducer's single write lock
    state: Mutex<LegitimacyState>,
    /// Settings
    config: LegitimacyConfig,
}

impl LegitimacyLedger {
    pub fn new(config: LegitimacyConfig) -> Self {
        Self::with_ledger(Arc::new(AppendOnlyLedger::new(LEGITIMACY_LEDGER)), config)
    }

    /// Reducer over an existing ledger; the state is folded from its entries.
    pub fn with_ledger(ledger: Arc<AppendOnlyLedger<LegitimacyEntry>>, config: LegitimacyConfig) -> Self {
        let state = LegitimacyState::fold(ledger.entries().iter());
        Self {
            ledger,
            state: Mutex::new(state),
            config,
        }
    }

    pub fn ledger(&self) -> Arc<AppendOnlyLedger<LegitimacyEntry>> {
        Arc::clone(&self.ledger)
    }

    pub async fn state(&self) -> LegitimacyState {
        self.state.lock().await.clone()
    }

    pub async fn band(&self) -> LegitimacyBand {
        self.state.lock().await.band
    }

    pub async fn effects(&self) -> BandEffects {
        self.state.lock().await.effects()
    }

    async fn write(&self, state: &mut LegitimacyState, entry: LegitimacyEntry) -> Result<Record> {
        let record = self.ledger.append(entry).await?;
        if let Some(entry) = record.entry() {
            state.apply(entry);
            if entry.changes_band() {
                if entry.band_after > entry.band_before {
                    warn!(
                        seq = record.seq,
                        cycle = entry.cycle,
                        from = entry.band_before.as_str(),
                        to = entry.band_after.as_str(),
                        cause = entry.kind.as_str(),
                        "Legitimacy band decayed"
                    );
                } else {
                    info!(
                        seq = record.seq,
                        cycle = entry.cycle,
                        from = entry.band_before.as_str(),
                        to = entry.band_after.as_str(),
                        "Legitimacy band recovered"
                    );
                }
            }
        }
        Ok(record)
    }

    async fn trigger_locked(
        &self,
        state: &mut LegitimacyState,
        trigger: TriggerKind,
        weight: TriggerWeight,
        subject: Option<String>,
        related_case_ids: Vec<String>,
        detail: String,
    ) -> Result<Vec<Record>> {
        let before = state.band;
        let after = match weight {
            TriggerWeight::Minor => before,
            TriggerWeight::Major => before.decayed(),
            TriggerWeight::Catastrophic => LegitimacyBand::Failed,
        };

        debug!(
            trigger = trigger.as_str(),
            weight = weight.as_str(),
            band = before.as_str(),
            "Recording legitimacy trigger"
        );

        let entry = LegitimacyEntry {
            cycle: state.cycle,
            kind: LegitimacyEntryKind::Trigger {
                trigger,
                weight,
                subject,
                detail,
            },
            band_before: before,
            band_after: after,
            related_case_ids: related_case_ids.clone(),
        };
        let mut written = vec![self.write(state, entry).await?];

        if weight == TriggerWeight::Minor && state.minors_this_cycle >= self.config.minor_decay_threshold {
            let band = state.band;
            let entry = LegitimacyEntry {
                cycle: state.cycle,
                kind: LegitimacyEntryKind::AutomaticDecay {
                    minor_count: state.minors_this_cycle,
                },
                band_before: band,
                band_after: band.decayed(),
                related_case_ids,
            };
            written.push(self.write(state, entry).await?);
        }
        Ok(written)
    }

    /// Record a decay trigger.
    ///
    /// Only triggers that [`TriggerKind::may_be_catastrophic`] may carry the
    /// catastrophic weight.
    pub async fn record_trigger(
        &self,
        trigger: TriggerKind,
        weight: TriggerWeight,
        subject: Option<String>,
        related_case_ids: Vec<String>,
        detail: impl Into<String>,
    ) -> Result<Vec<Record>> {
        if weight == TriggerWeight::Catastrophic && !trigger.may_be_catastrophic() {
            return Err(AccountingError::validation(
                "not_catastrophic",
                format!("{} cannot jump straight to failed", trigger.as_str()),
            ));
        }
        let mut state = self.state.lock().await;
        self.trigger_locked(&mut state, trigger, weight, subject, related_case_ids, detail.into())
            .await
    }

    /// Acknowledge the current band.
    pub async fn acknowledge(&self, actor: &Actor) -> Result<Record> {
        actor.require(Capability::Acknowledge)?;
        let mut state = self.state.lock().await;
        if !state.band.requires_acknowledgment() || state.acknowledged {
            return Err(AccountingError::validation(
                "nothing_to_acknowledge",
                format!("band {} needs no acknowledgment", state.band),
            ));
        }
        let band = state.band;
        let entry = LegitimacyEntry {
            cycle: state.cycle,
            kind: LegitimacyEntryKind::Acknowledged {
                actor_id: actor.id.clone(),
            },
            band_before: band,
            band_after: band,
            related_case_ids: vec![],
        };
        let record = self.write(&mut state, entry).await?;
        info!(actor_id = %actor.id, band = band.as_str(), "Legitimacy band acknowledged");
        Ok(record)
    }

    /// Open a remedy ordered by a finding. Returns the remedy id.
    pub async fn open_remedy(
        &self,
        case_ids: Vec<String>,
        remedy: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let remedy_id = charter::new_id();
        let mut state = self.state.lock().await;
        let band = state.band;
        let entry = LegitimacyEntry {
            cycle: state.cycle,
            kind: LegitimacyEntryKind::RemedyOpened {
                remedy_id: remedy_id.clone(),
                remedy: remedy.into(),
                due: now + charter::window(self.config.remedy_deadline_secs),
            },
            band_before: band,
            band_after: band,
            related_case_ids: case_ids,
        };
        self.write(&mut state, entry).await?;
        Ok(remedy_id)
    }

    /// Record completion of a remedy.
    pub async fn complete_remedy(&self, remedy_id: &str) -> Result<Record> {
        let mut state = self.state.lock().await;
        let Some(remedy) = state.open_remedies.get(remedy_id).cloned() else {
            return Err(AccountingError::UnknownRemedy(remedy_id.to_string()));
        };
        let band = state.band;
        let entry = LegitimacyEntry {
            cycle: state.cycle,
            kind: LegitimacyEntryKind::RemedyCompleted {
                remedy_id: remedy_id.to_string(),
            },
            band_before: band,
            band_after: band,
            related_case_ids: remedy.case_ids,
        };
        self.write(&mut state, entry).await
    }

    /// Record every overdue remedy as an ignored finding.
    pub async fn sweep_remedies(&self, now: DateTime<Utc>) -> Result<Vec<Record>> {
        let mut state = self.state.lock().await;
        let mut written = Vec::new();
        for remedy in state.overdue_remedies(now) {
            let OpenRemedy {
                remedy_id,
                remedy,
                case_ids,
                due,
                ..
            } = remedy;
            written.extend(
                self.trigger_locked(
                    &mut state,
                    TriggerKind::IgnoredFinding,
                    TriggerKind::IgnoredFinding.default_weight(),
                    Some(remedy_id),
                    case_ids,
                    format!("remedy '{}' due {} not completed", remedy, due.to_rfc3339()),
                )
                .await?,
            );
        }
        Ok(written)
    }

    /// Close the open cycle.
    ///
    /// An unacknowledged band whose window spans a full cycle counts as an
    /// ignored acknowledgment. Recovery moves one band once enough clean
    /// cycles have passed with no open remedies (and, from `compromised`,
    /// after re-acknowledgment).
    pub async fn close_cycle(&self) -> Result<(CycleNumber, Vec<Record>)> {
        let mut state = self.state.lock().await;
        let cycle = state.cycle;
        let mut written = Vec::new();

        if let Some(since) = state.ack_required_since {
            if since < cycle && !state.acknowledged && !state.band.is_absorbing() {
                let detail = format!("band {} unacknowledged since cycle {}", state.band, since);
                written.extend(
                    self.trigger_locked(
                        &mut state,
                        TriggerKind::IgnoredAcknowledgment,
                        TriggerWeight::Minor,
                        None,
                        vec![],
                        detail,
                    )
                    .await?,
                );
            }
        }

        let clean = state.decay_events_this_cycle == 0;
        let clean_streak = if clean { state.clean_streak + 1 } else { 0 };
        let band = state.band;
        written.push(
            self.write(
                &mut state,
                LegitimacyEntry {
                    cycle,
                    kind: LegitimacyEntryKind::CycleClosed { clean, clean_streak },
                    band_before: band,
                    band_after: band,
                    related_case_ids: vec![],
                },
            )
            .await?,
        );

        let recoverable = matches!(
            band,
            LegitimacyBand::Strained | LegitimacyBand::Eroding | LegitimacyBand::Compromised
        );
        let reacknowledged = band != LegitimacyBand::Compromised || state.acknowledged;
        if recoverable
            && clean_streak >= self.config.recovery_clean_cycles
            && state.open_remedies.is_empty()
            && reacknowledged
        {
            written.push(
                self.write(
                    &mut state,
                    LegitimacyEntry {
                        cycle,
                        kind: LegitimacyEntryKind::Recovered { clean_streak },
                        band_before: band,
                        band_after: band.recovered(),
                        related_case_ids: vec![],
                    },
                )
                .await?,
            );
        }

        debug!(cycle = cycle, clean = clean, band = %state.band, "Legitimacy cycle closed");
        Ok((cycle, written))
    }

    /// Check that every entry continues the band chain and that the cached
    /// state equals a fresh fold.
    pub async fn verify_chain(&self) -> Result<()> {
        let mut expected = LegitimacyBand::Stable;
        let mut entries = Vec::new();
        for record in self.ledger.snapshot() {
            let Some(entry) = record.entry() else {
                continue;
            };
            if !record.verify() || entry.band_before != expected {
                return Err(AccountingError::ChainBroken {
                    seq: record.seq,
                    expected: expected.to_string(),
                    found: entry.band_before.to_string(),
                });
            }
            expected = entry.band_after;
            entries.push(entry.clone());
        }

        let folded = LegitimacyState::fold(entries.iter());
        let cached = self.state.lock().await;
        if folded.band != cached.band {
            return Err(AccountingError::ChainBroken {
                seq: self.ledger.len() as u64,
                expected: folded.band.to_string(),
                found: cached.band.to_string(),
            });
        }
        Ok(())
    }

    /// Public view: current band plus causal highlights.
    pub async fn summary(&self) -> LegitimacySummary {
        let state = self.state.lock().await.clone();
        let mut highlights: Vec<Highlight> = self
            .ledger
            .snapshot()
            .iter()
            .filter_map(|record| {
                let entry = record.entry()?;
                entry.changes_band().then(|| Highlight::from_entry(record.seq, entry))
            })
            .collect();
        let skip = highlights.len().saturating_sub(SUMMARY_HIGHLIGHTS);
        highlights.drain(..skip);

        LegitimacySummary {
            band: state.band,
            effects: state.effects(),
            open_remedies: state.open_remedies.len(),
            highlights,
        }
    }

    /// Internal view: the folded state and the full ledger.
    pub async fn internal_view(&self) -> LegitimacyView {
        let state = self.state.lock().await.clone();
        LegitimacyView {
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

    fn ledger() -> LegitimacyLedger {
        LegitimacyLedger::new(LegitimacyConfig::default())
    }

    async fn minor(ledger: &LegitimacyLedger) -> Vec<Record> {
        ledger
            .record_trigger(
                TriggerKind::DeficientFinding,
                TriggerWeight::Minor,
                None,
                vec![],
                "procedurally deficient",
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_minors_force_one_decay() {
        let ledger = ledger();
        minor(&ledger).await;
        minor(&ledger).await;
        assert_eq!(ledger.band().await, LegitimacyBand::Stable);

        let written = minor(&ledger).await;
        assert_eq!(written.len(), 2);
        assert_eq!(ledger.band().await, LegitimacyBand::Strained);

        ledger.close_cycle().await.unwrap();
        assert_eq!(ledger.band().await, LegitimacyBand::Strained);
        ledger.verify_chain().await.unwrap();
    }

    #[tokio::test]
    async fn test_major_decays_one_band() {
        let ledger = ledger();
        ledger
            .record_trigger(TriggerKind::IllegitimateFinding, TriggerWeight::Major, None, vec!["case-1".into()], "illegitimate")
            .await
            .unwrap();
        assert_eq!(ledger.band().await, LegitimacyBand::Strained);
    }

    #[tokio::test]
    async fn test_only_tampering_is_catastrophic() {
        let ledger = ledger();
        let err = ledger
            .record_trigger(TriggerKind::VoidFinding, TriggerWeight::Catastrophic, None, vec![], "void")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_catastrophic");

        ledger
            .record_trigger(TriggerKind::DetectorTampering, TriggerWeight::Catastrophic, None, vec![], "seq 4 rewritten")
            .await
            .unwrap();
        assert_eq!(ledger.band().await, LegitimacyBand::Failed);
        assert!(ledger.effects().await.cessation_required);
    }

    #[tokio::test]
    async fn test_recovery_needs_sustained_clean_cycles() {
        let ledger = ledger();
        let steward = Actor::new("steward", "Steward").with_role(Role::Steward);
        ledger
            .record_trigger(TriggerKind::IgnoredFinding, TriggerWeight::Major, None, vec![], "ignored")
            .await
            .unwrap();
        ledger.acknowledge(&steward).await.unwrap();
        // Trigger cycle is not clean.
        ledger.close_cycle().await.unwrap();

        ledger.close_cycle().await.unwrap();
        assert_eq!(ledger.band().await, LegitimacyBand::Strained);
        ledger.close_cycle().await.unwrap();
        assert_eq!(ledger.band().await, LegitimacyBand::Strained);
        ledger.close_cycle().await.unwrap();
        assert_eq!(ledger.band().await, LegitimacyBand::Stable);
        ledger.verify_chain().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_remedy_blocks_recovery_then_lapses() {
        let ledger = ledger();
        let steward = Actor::new("steward", "Steward").with_role(Role::Steward);
        ledger
            .record_trigger(TriggerKind::IllegitimateFinding, TriggerWeight::Major, None, vec!["case-1".into()], "illegitimate")
            .await
            .unwrap();
        ledger.acknowledge(&steward).await.unwrap();
        let now = Utc::now();
        let remedy_id = ledger
            .open_remedy(vec!["case-1".into()], "reauthorize", now)
            .await
            .unwrap();

        for _ in 0..5 {
            ledger.close_cycle().await.unwrap();
        }
        assert_eq!(ledger.band().await, LegitimacyBand::Strained);

        let lapsed = ledger.sweep_remedies(now + Duration::days(15)).await.unwrap();
        assert_eq!(lapsed.len(), 1);
        assert_eq!(ledger.band().await, LegitimacyBand::Eroding);
        // Recorded once only.
        assert!(ledger.sweep_remedies(now + Duration::days(16)).await.unwrap().is_empty());

        ledger.complete_remedy(&remedy_id).await.unwrap();
        assert!(ledger.state().await.open_remedies.is_empty());
    }

    #[tokio::test]
    async fn test_compromised_pauses_authorization_until_acknowledged() {
        let ledger = ledger();
        let steward = Actor::new("steward", "Steward").with_role(Role::Steward);
        for _ in 0..3 {
            ledger
                .record_trigger(TriggerKind::VoidFinding, TriggerWeight::Major, None, vec![], "void")
                .await
                .unwrap();
        }
        assert_eq!(ledger.band().await, LegitimacyBand::Compromised);
        assert!(ledger.effects().await.authorization_paused);

        ledger.acknowledge(&steward).await.unwrap();
        let effects = ledger.effects().await;
        assert!(!effects.authorization_paused);
        assert!(effects.mandatory_review_each_cycle);
    }

    #[tokio::test]
    async fn test_unacknowledged_band_counts_as_minor() {
        let ledger = ledger();
        ledger
            .record_trigger(TriggerKind::IllegitimateFinding, TriggerWeight::Major, None, vec![], "illegitimate")
            .await
            .unwrap();
        let (_, first) = ledger.close_cycle().await.unwrap();
        assert_eq!(first.len(), 1);

        let (_, second) = ledger.close_cycle().await.unwrap();
        let ignored = second
            .iter()
            .filter_map(|r| r.entry())
            .any(|e| matches!(e.kind, LegitimacyEntryKind::Trigger { trigger: TriggerKind::IgnoredAcknowledgment, .. }));
        assert!(ignored);
    }

    #[tokio::test]
    async fn test_summary_lists_band_changes() {
        let ledger = ledger();
        ledger
            .record_trigger(TriggerKind::IllegitimateFinding, TriggerWeight::Major, None, vec![], "illegitimate")
            .await
            .unwrap();
        ledger.close_cycle().await.unwrap();

        let summary = ledger.summary().await;
        assert_eq!(summary.band, LegitimacyBand::Strained);
        assert_eq!(summary.highlights.len(), 1);
        assert_eq!(summary.highlights[0].cause, "illegitimate_finding");

        let view = ledger.internal_view().await;
        assert_eq!(view.records.len(), 2);
    }
}
