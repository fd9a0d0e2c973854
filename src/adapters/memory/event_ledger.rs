//! In-memory idempotency ledger for tests and local development.
//!
//! The mutex is held across the whole check-and-claim in `try_begin`, which
//! gives the atomicity the port requires without further ceremony.
//!
//! # Panics
//!
//! Methods panic if the internal lock is poisoned. Acceptable for test
//! code; do not use this adapter in production.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    Admission, EventLedger, LedgerEntry, LedgerError, LedgerOutcome, MarkerState,
    DEFAULT_LEASE_SECS,
};

/// In-memory `EventLedger`.
pub struct InMemoryEventLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    lease_secs: i64,
}

impl Default for InMemoryEventLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lease_secs: DEFAULT_LEASE_SECS,
        }
    }

    /// Overrides the in-progress lease (0 makes markers instantly
    /// reclaimable, useful in tests).
    pub fn with_lease_secs(mut self, lease_secs: i64) -> Self {
        self.lease_secs = lease_secs;
        self
    }

    // === Test Helpers ===

    /// Direct marker access for assertions.
    pub fn entry(&self, event_id: &str) -> Option<LedgerEntry> {
        self.entries
            .lock()
            .expect("InMemoryEventLedger: lock poisoned")
            .get(event_id)
            .cloned()
    }

    /// Number of markers held.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("InMemoryEventLedger: lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn try_begin(&self, event_id: &str, event_type: &str) -> Result<Admission, LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .expect("InMemoryEventLedger: lock poisoned");
        let now = Timestamp::now();

        match entries.get_mut(event_id) {
            None => {
                entries.insert(
                    event_id.to_string(),
                    LedgerEntry {
                        event_id: event_id.to_string(),
                        event_type: event_type.to_string(),
                        state: MarkerState::InProgress,
                        detail: None,
                        attempts: 1,
                        first_seen_at: now,
                        updated_at: now,
                    },
                );
                Ok(Admission::Admitted)
            }
            Some(entry) if entry.state.is_terminal() => Ok(Admission::AlreadyProcessed),
            Some(entry) if entry.state == MarkerState::Failed => {
                entry.state = MarkerState::InProgress;
                entry.attempts += 1;
                entry.updated_at = now;
                Ok(Admission::Admitted)
            }
            Some(entry) => {
                // In progress. Reclaim only once the lease has lapsed.
                if now.secs_since(&entry.updated_at) >= self.lease_secs {
                    entry.attempts += 1;
                    entry.updated_at = now;
                    Ok(Admission::Admitted)
                } else {
                    Ok(Admission::InProgress)
                }
            }
        }
    }

    async fn complete(&self, event_id: &str, outcome: LedgerOutcome) -> Result<(), LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .expect("InMemoryEventLedger: lock poisoned");
        match entries.get_mut(event_id) {
            Some(entry) => {
                let (state, detail) = match outcome {
                    LedgerOutcome::Succeeded => (MarkerState::Succeeded, None),
                    LedgerOutcome::Ignored(reason) => (MarkerState::Ignored, Some(reason)),
                    LedgerOutcome::Failed(message) => (MarkerState::Failed, Some(message)),
                };
                entry.state = state;
                entry.detail = detail;
                entry.updated_at = Timestamp::now();
            }
            None => {
                tracing::warn!(event_id, "complete() for an event never admitted");
            }
        }
        Ok(())
    }

    async fn find_failed(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self
            .entries
            .lock()
            .expect("InMemoryEventLedger: lock poisoned");
        let mut failed: Vec<LedgerEntry> = entries
            .values()
            .filter(|e| e.state == MarkerState::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|e| std::cmp::Reverse(e.updated_at.as_unix_secs()));
        failed.truncate(limit);
        Ok(failed)
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .expect("InMemoryEventLedger: lock poisoned");
        let before = entries.len();
        entries.retain(|_, e| !e.updated_at.is_before(&cutoff));
        Ok((before - entries.len()) as u64)
    }
}
