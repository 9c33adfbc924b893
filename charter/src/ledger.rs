//! Sequenced append-only ledgers.
//!
//! All four ledgers of the engine (task history, witness statements,
//! legitimacy, capacity) are instances of [`AppendOnlyLedger`]. Writers are
//! serialized only when a sequence number is taken from the atomic counter;
//! sealing, persistence and insertion proceed independently per writer.
//!
//! Readers only ever observe the contiguous prefix `1..=n`, so a slot whose
//! writer is still persisting is invisible until it lands. A slot whose
//! record could not be persisted is filled with an `unrecorded` marker:
//! sequence numbers are never reused and never skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Capacity of the broadcast feed for observers.
const FEED_CAPACITY: usize = 4096;

/// Error types for ledger writes.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The record could not be durably persisted; the slot holds a marker
    #[error("Ledger {ledger} could not durably record seq {seq}: {reason}")]
    Unrecorded {
        ledger: String,
        seq: u64,
        reason: String,
    },

    /// Payload could not be serialized for sealing
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Stable failure code.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Unrecorded { .. } => "unrecorded",
            LedgerError::Serialization(_) => "serialization",
        }
    }
}

/// Error types reported by a durability sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Backing store unreachable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backing store refused the write
    #[error("Write rejected: {0}")]
    Rejected(String),
}

/// Durable storage for ledger records.
///
/// The in-memory ledger is the source of truth for reads; a sink only has to
/// confirm that a record has been made durable before the append returns.
#[async_trait]
pub trait LedgerSink<T>: Send + Sync {
    /// Persist a sealed record.
    async fn persist(&self, record: &LedgerRecord<T>) -> Result<(), SinkError>;
}

/// Retry policy applied to a failing sink before the write is declared unrecorded.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

/// Body of a ledger slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum RecordBody<T> {
    /// A recorded fact
    Entry(T),
    /// The write for this slot failed to reach durable storage
    Unrecorded { reason: String },
}

/// A sealed ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord<T> {
    /// Name of the owning ledger
    pub ledger: String,
    /// Sequence number, strictly increasing from 1
    pub seq: u64,
    /// When the record was sealed
    pub recorded_at: DateTime<Utc>,
    /// Recorded fact or failure marker
    pub body: RecordBody<T>,
    /// SHA-256 over ledger name, seq, timestamp and body
    pub digest: String,
}

impl<T: Serialize> LedgerRecord<T> {
    /// Seal a new record.
    pub fn seal(ledger: &str, seq: u64, body: RecordBody<T>) -> Result<Self, serde_json::Error> {
        let recorded_at = Utc::now();
        let digest = Self::compute_digest(ledger, seq, &recorded_at, &body)?;
        Ok(Self {
            ledger: ledger.to_string(),
            seq,
            recorded_at,
            body,
            digest,
        })
    }

    fn marker(ledger: &str, seq: u64, reason: String) -> Self {
        let recorded_at = Utc::now();
        let digest = marker_digest(ledger, seq, &recorded_at, &reason);
        Self {
            ledger: ledger.to_string(),
            seq,
            recorded_at,
            body: RecordBody::Unrecorded { reason },
            digest,
        }
    }

    /// Compute the digest for a record's contents.
    pub fn compute_digest(
        ledger: &str,
        seq: u64,
        recorded_at: &DateTime<Utc>,
        body: &RecordBody<T>,
    ) -> Result<String, serde_json::Error> {
        match body {
            RecordBody::Entry(payload) => {
                let mut hasher = Sha256::new();
                hasher.update(ledger.as_bytes());
                hasher.update(seq.to_be_bytes());
                hasher.update(recorded_at.to_rfc3339().as_bytes());
                hasher.update(serde_json::to_vec(payload)?);
                Ok(hex::encode(hasher.finalize()))
            }
            RecordBody::Unrecorded { reason } => Ok(marker_digest(ledger, seq, recorded_at, reason)),
        }
    }

    /// Recompute the digest and compare.
    pub fn verify(&self) -> bool {
        Self::compute_digest(&self.ledger, self.seq, &self.recorded_at, &self.body)
            .map(|d| d == self.digest)
            .unwrap_or(false)
    }
}

impl<T> LedgerRecord<T> {
    /// The recorded fact, if this slot holds one.
    pub fn entry(&self) -> Option<&T> {
        match &self.body {
            RecordBody::Entry(payload) => Some(payload),
            RecordBody::Unrecorded { .. } => None,
        }
    }

    /// Whether this slot is a failure marker.
    pub fn is_unrecorded(&self) -> bool {
        matches!(self.body, RecordBody::Unrecorded { .. })
    }
}

fn marker_digest(ledger: &str, seq: u64, recorded_at: &DateTime<Utc>, reason: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ledger.as_bytes());
    hasher.update(seq.to_be_bytes());
    hasher.update(recorded_at.to_rfc3339().as_bytes());
    hasher.update(b"unrecorded:");
    hasher.update(reason.as_bytes());
    hex::encode(hasher.finalize())
}

/// A named, sequenced, append-only ledger.
pub struct AppendOnlyLedger<T> {
    /// Ledger name (part of every digest)
    name: String,
    /// Next sequence number to hand out
    next_seq: AtomicU64,
    /// Highest seq `n` such that every slot `1..=n` is filled
    visible: AtomicU64,
    /// Sealed records by sequence number
    records: DashMap<u64, Arc<LedgerRecord<T>>>,
    /// Optional durability sink
    sink: Option<Arc<dyn LedgerSink<T>>>,
    /// Sink retry policy
    retry: RetryPolicy,
    /// Feed of appended records
    feed: broadcast::Sender<Arc<LedgerRecord<T>>>,
}

impl<T> AppendOnlyLedger<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    /// Create an in-memory ledger.
    pub fn new(name: impl Into<String>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            name: name.into(),
            next_seq: AtomicU64::new(1),
            visible: AtomicU64::new(0),
            records: DashMap::new(),
            sink: None,
            retry: RetryPolicy::default(),
            feed,
        }
    }

    /// Attach a durability sink.
    pub fn with_sink(mut self, sink: Arc<dyn LedgerSink<T>>, retry: RetryPolicy) -> Self {
        self.sink = Some(sink);
        self.retry = retry;
        self
    }

    /// Ledger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a fact.
    ///
    /// Returns only once the record is durable. On persistent sink failure
    /// the slot is filled with an `unrecorded` marker and the caller must
    /// treat the operation as not having happened.
    pub async fn append(&self, payload: T) -> Result<Arc<LedgerRecord<T>>, LedgerError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let record = match LedgerRecord::seal(&self.name, seq, RecordBody::Entry(payload)) {
            Ok(record) => record,
            Err(e) => {
                self.fill_unrecorded(seq, format!("serialization: {}", e));
                return Err(LedgerError::Serialization(e));
            }
        };

        if let Some(sink) = &self.sink {
            let mut last_error = None;
            for attempt in 0..=self.retry.attempts {
                match sink.persist(&record).await {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            ledger = %self.name,
                            seq = seq,
                            attempt = attempt,
                            error = %e,
                            "Ledger sink write failed"
                        );
                        last_error = Some(e);
                        if attempt < self.retry.attempts {
                            tokio::time::sleep(self.retry.delay).await;
                        }
                    }
                }
            }

            if let Some(e) = last_error {
                let reason = e.to_string();
                error!(ledger = %self.name, seq = seq, reason = %reason, "Record left unrecorded");
                self.fill_unrecorded(seq, reason.clone());
                return Err(LedgerError::Unrecorded {
                    ledger: self.name.clone(),
                    seq,
                    reason,
                });
            }
        }

        let record = Arc::new(record);
        self.records.insert(seq, Arc::clone(&record));
        self.advance_visible();
        let _ = self.feed.send(Arc::clone(&record));

        debug!(ledger = %self.name, seq = seq, "Record appended");
        Ok(record)
    }

    fn fill_unrecorded(&self, seq: u64, reason: String) {
        let marker = Arc::new(LedgerRecord::marker(&self.name, seq, reason));
        self.records.insert(seq, Arc::clone(&marker));
        self.advance_visible();
        let _ = self.feed.send(marker);
    }

    /// Move the high-water mark over every slot filled contiguously after it.
    ///
    /// Called after each insert; whichever writer fills the gap carries the
    /// mark past slots that landed out of order.
    fn advance_visible(&self) {
        let mut current = self.visible.load(Ordering::SeqCst);
        while self.records.contains_key(&(current + 1)) {
            match self.visible.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => current += 1,
                Err(observed) => current = observed,
            }
        }
    }

    /// Number of visible records (contiguous prefix, markers included).
    pub fn len(&self) -> usize {
        self.visible.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a record by sequence number.
    pub fn get(&self, seq: u64) -> Option<Arc<LedgerRecord<T>>> {
        self.records.get(&seq).map(|r| Arc::clone(r.value()))
    }

    /// All visible records in sequence order.
    pub fn snapshot(&self) -> Vec<Arc<LedgerRecord<T>>> {
        self.since(0)
    }

    /// Visible records with a sequence number greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<Arc<LedgerRecord<T>>> {
        let visible = self.visible.load(Ordering::SeqCst);
        (seq + 1..=visible).filter_map(|n| self.get(n)).collect()
    }

    /// Recorded facts in sequence order, markers skipped.
    pub fn entries(&self) -> Vec<T> {
        self.snapshot()
            .iter()
            .filter_map(|r| r.entry().cloned())
            .collect()
    }

    /// Most recent visible record.
    pub fn last(&self) -> Option<Arc<LedgerRecord<T>>> {
        match self.visible.load(Ordering::SeqCst) {
            0 => None,
            seq => self.get(seq),
        }
    }

    /// Subscribe to appended records.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LedgerRecord<T>>> {
        self.feed.subscribe()
    }

    /// Compare an externally held copy of records against this ledger.
    ///
    /// Returns the sequence numbers whose content no longer matches: a bad
    /// digest, a digest that differs from the sealed original, or a record
    /// claiming a slot this ledger never sealed.
    pub fn audit(&self, records: &[LedgerRecord<T>]) -> Vec<u64> {
        records
            .iter()
            .filter(|r| {
                if r.ledger != self.name || !r.verify() {
                    return true;
                }
                match self.records.get(&r.seq) {
                    Some(original) => original.digest != r.digest,
                    None => true,
                }
            })
            .map(|r| r.seq)
            .collect()
    }
}
