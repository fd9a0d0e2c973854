//! PostgreSQL implementation of the EventLedger port.
//!
//! The primary key on `event_id` makes the initial claim atomic: whichever
//! worker's `INSERT ... ON CONFLICT DO NOTHING` lands first holds the
//! marker. Reclaims of failed or abandoned markers ride a conditional
//! UPDATE, so two workers racing a redelivery cannot both be admitted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    Admission, EventLedger, LedgerEntry, LedgerError, LedgerOutcome, MarkerState,
    DEFAULT_LEASE_SECS,
};

/// PostgreSQL implementation of the EventLedger port.
pub struct PostgresEventLedger {
    pool: PgPool,
    lease_secs: i64,
}

impl PostgresEventLedger {
    /// Creates a ledger with the default in-progress lease.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_secs: DEFAULT_LEASE_SECS,
        }
    }

    /// Overrides the in-progress lease.
    pub fn with_lease_secs(mut self, lease_secs: i64) -> Self {
        self.lease_secs = lease_secs;
        self
    }
}

/// Database row representation of a ledger marker.
#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    event_id: String,
    event_type: String,
    state: String,
    detail: Option<String>,
    attempts: i32,
    first_seen_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let state = MarkerState::parse(&row.state).ok_or_else(|| {
            LedgerError::database(format!("invalid marker state in database: {}", row.state))
        })?;
        Ok(LedgerEntry {
            event_id: row.event_id,
            event_type: row.event_type,
            state,
            detail: row.detail,
            attempts: row.attempts.max(0) as u32,
            first_seen_at: Timestamp::from_datetime(row.first_seen_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

/// Splits a terminal outcome into the stored state and detail columns.
fn outcome_columns(outcome: LedgerOutcome) -> (MarkerState, Option<String>) {
    match outcome {
        LedgerOutcome::Succeeded => (MarkerState::Succeeded, None),
        LedgerOutcome::Ignored(reason) => (MarkerState::Ignored, Some(reason)),
        LedgerOutcome::Failed(message) => (MarkerState::Failed, Some(message)),
    }
}

#[async_trait]
impl EventLedger for PostgresEventLedger {
    async fn try_begin(&self, event_id: &str, event_type: &str) -> Result<Admission, LedgerError> {
        // Two passes cover the window where a retention sweep deletes the
        // row between our statements.
        for _ in 0..2 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO event_ledger (
                    event_id, event_type, state, attempts, first_seen_at, updated_at
                ) VALUES ($1, $2, 'in_progress', 1, now(), now())
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(event_id)
            .bind(event_type)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::database(format!("failed to claim event: {}", e)))?;

            if inserted.rows_affected() > 0 {
                return Ok(Admission::Admitted);
            }

            // Marker exists. Reclaim it when the prior attempt failed or
            // its in-progress lease has lapsed.
            let reclaimed = sqlx::query(
                r#"
                UPDATE event_ledger
                SET state = 'in_progress', attempts = attempts + 1, updated_at = now()
                WHERE event_id = $1
                  AND (state = 'failed'
                       OR (state = 'in_progress'
                           AND updated_at <= now() - $2 * interval '1 second'))
                "#,
            )
            .bind(event_id)
            .bind(self.lease_secs)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::database(format!("failed to reclaim event: {}", e)))?;

            if reclaimed.rows_affected() > 0 {
                return Ok(Admission::Admitted);
            }

            let state: Option<String> =
                sqlx::query_scalar("SELECT state FROM event_ledger WHERE event_id = $1")
                    .bind(event_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| {
                        LedgerError::database(format!("failed to read event state: {}", e))
                    })?;

            match state.as_deref().and_then(MarkerState::parse) {
                Some(state) if state.is_terminal() => return Ok(Admission::AlreadyProcessed),
                Some(_) => return Ok(Admission::InProgress),
                // Row vanished under us; take another pass.
                None => continue,
            }
        }

        Err(LedgerError::database(format!(
            "marker for event {} kept vanishing during claim",
            event_id
        )))
    }

    async fn complete(&self, event_id: &str, outcome: LedgerOutcome) -> Result<(), LedgerError> {
        let (state, detail) = outcome_columns(outcome);

        let result = sqlx::query(
            r#"
            UPDATE event_ledger
            SET state = $2, detail = $3, updated_at = now()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(state.as_str())
        .bind(&detail)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::database(format!("failed to complete event: {}", e)))?;

        if result.rows_affected() == 0 {
            tracing::warn!(event_id, "complete() for an event never admitted");
        }
        Ok(())
    }

    async fn find_failed(&self, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, state, detail, attempts, first_seen_at, updated_at
            FROM event_ledger
            WHERE state = 'failed'
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::database(format!("failed to list failed events: {}", e)))?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM event_ledger WHERE updated_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::database(format!("failed to sweep ledger: {}", e)))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_columns_cover_every_outcome() {
        assert_eq!(
            outcome_columns(LedgerOutcome::Succeeded),
            (MarkerState::Succeeded, None)
        );
        assert_eq!(
            outcome_columns(LedgerOutcome::Ignored("stale".into())),
            (MarkerState::Ignored, Some("stale".into()))
        );
        assert_eq!(
            outcome_columns(LedgerOutcome::Failed("provider timeout".into())),
            (MarkerState::Failed, Some("provider timeout".into()))
        );
    }

    #[test]
    fn ledger_row_converts_to_entry() {
        let row = LedgerRow {
            event_id: "evt_1".into(),
            event_type: "invoice.paid".into(),
            state: "failed".into(),
            detail: Some("store unavailable".into()),
            attempts: 3,
            first_seen_at: *Timestamp::from_unix_secs(1_700_000_000).as_datetime(),
            updated_at: *Timestamp::from_unix_secs(1_700_000_600).as_datetime(),
        };

        let entry = LedgerEntry::try_from(row).unwrap();
        assert_eq!(entry.state, MarkerState::Failed);
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.detail.as_deref(), Some("store unavailable"));
    }

    #[test]
    fn ledger_row_rejects_unknown_state() {
        let row = LedgerRow {
            event_id: "evt_1".into(),
            event_type: "invoice.paid".into(),
            state: "pending".into(),
            detail: None,
            attempts: 1,
            first_seen_at: *Timestamp::from_unix_secs(1_700_000_000).as_datetime(),
            updated_at: *Timestamp::from_unix_secs(1_700_000_000).as_datetime(),
        };

        assert!(LedgerEntry::try_from(row).is_err());
    }
}
