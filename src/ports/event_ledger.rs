//! EventLedger port - idempotency markers for provider events.
//!
//! The provider redelivers events until they are acknowledged, and may
//! deliver the same event to concurrent requests. The ledger pins each event
//! id to a single processing attempt: `try_begin` atomically claims the id,
//! `complete` records the terminal outcome. A marker in `failed` state can
//! be reclaimed for a fresh attempt; a `succeeded` or `ignored` marker makes
//! every later delivery a no-op.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::Timestamp;

/// Default lease on an `in_progress` marker before it is considered
/// abandoned and eligible for reclaim, in seconds.
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    pub fn database(message: impl Into<String>) -> Self {
        LedgerError::Database(message.into())
    }
}

impl From<LedgerError> for crate::domain::billing::BillingError {
    fn from(err: LedgerError) -> Self {
        crate::domain::billing::BillingError::Ledger(err.to_string())
    }
}

/// Outcome of attempting to claim an event id for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// This caller holds the marker and must process the event.
    Admitted,
    /// A prior attempt reached a terminal state (`succeeded` or `ignored`).
    AlreadyProcessed,
    /// Another worker holds a live in-progress marker.
    InProgress,
}

/// Terminal outcome recorded by `complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// The event mutated the store.
    Succeeded,
    /// The event was acknowledged without a mutation (stale, orphan,
    /// unrecognized). The reason is kept for operators.
    Ignored(String),
    /// Processing failed; the marker may be reclaimed by a redelivery.
    Failed(String),
}

/// Processing state of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    InProgress,
    Succeeded,
    Ignored,
    Failed,
}

impl MarkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerState::InProgress => "in_progress",
            MarkerState::Succeeded => "succeeded",
            MarkerState::Ignored => "ignored",
            MarkerState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(MarkerState::InProgress),
            "succeeded" => Some(MarkerState::Succeeded),
            "ignored" => Some(MarkerState::Ignored),
            "failed" => Some(MarkerState::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MarkerState::Succeeded | MarkerState::Ignored)
    }
}

/// One ledger row: the processing history of a single event id.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub state: MarkerState,
    /// Ignore reason or failure message, depending on state.
    pub detail: Option<String>,
    pub attempts: u32,
    pub first_seen_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Port for the idempotency ledger.
///
/// Implementations must make `try_begin` atomic against concurrent calls
/// for the same event id (the in-memory ledger holds its lock across the
/// check-and-insert; Postgres relies on the primary key plus conditional
/// updates). Markers stuck in `in_progress` past the configured lease are
/// treated as abandoned and reclaimed, so a crashed worker cannot block an
/// event forever.
#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Claims the event id, creating an `in_progress` marker.
    ///
    /// - no marker: insert, return `Admitted`
    /// - terminal marker: return `AlreadyProcessed`
    /// - `failed` marker: reclaim it (attempts + 1), return `Admitted`
    /// - live `in_progress` marker: return `InProgress`
    /// - expired `in_progress` marker: reclaim it, return `Admitted`
    async fn try_begin(&self, event_id: &str, event_type: &str) -> Result<Admission, LedgerError>;

    /// Records the terminal outcome for an admitted event.
    async fn complete(&self, event_id: &str, outcome: LedgerOutcome) -> Result<(), LedgerError>;

    /// Most recently failed markers, newest first, for operator review.
    async fn find_failed(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Retention sweep: removes markers last touched before the cutoff.
    /// Returns the number removed. The cutoff must exceed the provider's
    /// maximum redelivery window or removed ids could be reprocessed.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trait object safety test
    #[test]
    fn event_ledger_is_object_safe() {
        fn _accepts_dyn(_ledger: &dyn EventLedger) {}
    }

    #[test]
    fn marker_state_round_trips_through_strings() {
        for state in [
            MarkerState::InProgress,
            MarkerState::Succeeded,
            MarkerState::Ignored,
            MarkerState::Failed,
        ] {
            assert_eq!(MarkerState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn unknown_marker_state_does_not_parse() {
        assert_eq!(MarkerState::parse("pending"), None);
    }

    #[test]
    fn only_succeeded_and_ignored_are_terminal() {
        assert!(MarkerState::Succeeded.is_terminal());
        assert!(MarkerState::Ignored.is_terminal());
        assert!(!MarkerState::InProgress.is_terminal());
        assert!(!MarkerState::Failed.is_terminal());
    }

    #[test]
    fn ledger_error_maps_to_billing_error() {
        use crate::domain::billing::BillingError;
        let err: BillingError = LedgerError::database("socket closed").into();
        assert!(matches!(err, BillingError::Ledger(_)));
    }
}
