//! PostgreSQL implementation of the MemberStore port.
//!
//! Subscription writes go through `apply_transition`, which guards the
//! UPDATE with the record version. A lost race reloads and re-applies the
//! transition a bounded number of times before reporting a conflict.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::billing::{
    check_payer_assignment, BillingError, BillingNote, Member, MemberQuery, NoteKind, PayerError,
    SubscriptionRecord, SubscriptionStatus,
};
use crate::domain::foundation::{MemberId, NoteId, Timestamp};
use crate::ports::{AppliedTransition, MemberStore, StoreError, TransitionFn};

/// Immediate re-attempts absorbed inside one `apply_transition` call before
/// the version race is reported as a conflict.
const VERSION_RACE_ATTEMPTS: u32 = 3;

/// PostgreSQL implementation of the MemberStore port.
pub struct PostgresMemberStore {
    pool: PgPool,
}

impl PostgresMemberStore {
    /// Creates a new PostgresMemberStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the payer chain starting at `payer_id` into a map and runs the
    /// shared cycle check over it. The preload is bounded by the seen set,
    /// so even a chain already corrupted into a loop terminates.
    async fn check_payer(&self, member: &Member) -> Result<(), StoreError> {
        let Some(payer_id) = member.payer_id else {
            return Ok(());
        };

        let mut links: HashMap<MemberId, Option<MemberId>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut current = payer_id;
        while seen.insert(current) {
            let row: Option<Option<Uuid>> =
                sqlx::query_scalar("SELECT payer_id FROM members WHERE id = $1")
                    .bind(current.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| {
                        StoreError::database(format!("failed to load payer chain: {}", e))
                    })?;

            match row {
                None if current == payer_id => {
                    return Err(PayerError::UnknownPayer(payer_id).into());
                }
                // A missing row further up just ends the chain.
                None => break,
                Some(next) => {
                    let next = next.map(MemberId::from_uuid);
                    links.insert(current, next);
                    match next {
                        Some(next) => current = next,
                        None => break,
                    }
                }
            }
        }

        check_payer_assignment(member.id, payer_id, |id| links.get(id).copied().flatten())?;
        Ok(())
    }
}

/// Database row representation of a member.
#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
    photo_url: Option<String>,
    payer_id: Option<Uuid>,
    customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: MemberId::from_uuid(row.id),
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            photo_url: row.photo_url,
            payer_id: row.payer_id.map(MemberId::from_uuid),
            customer_id: row.customer_id,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        }
    }
}

/// Database row representation of a subscription record.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    subscription_id: String,
    member_id: Uuid,
    customer_id: String,
    status: String,
    price_id: Option<String>,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    cancel_at_period_end: bool,
    last_event_at: DateTime<Utc>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = parse_stored_status(&row.status)?;
        Ok(SubscriptionRecord {
            member_id: MemberId::from_uuid(row.member_id),
            subscription_id: row.subscription_id,
            customer_id: row.customer_id,
            status,
            price_id: row.price_id,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            cancel_at_period_end: row.cancel_at_period_end,
            last_event_at: Timestamp::from_datetime(row.last_event_at),
            version: row.version,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

/// Database row representation of a billing note.
#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    id: Uuid,
    member_id: Uuid,
    kind: String,
    amount_cents: i64,
    currency: String,
    reference: String,
    detail: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<NoteRow> for BillingNote {
    type Error = StoreError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        let kind = parse_stored_note_kind(&row.kind)?;
        Ok(BillingNote {
            id: NoteId::from_uuid(row.id),
            member_id: MemberId::from_uuid(row.member_id),
            kind,
            amount_cents: row.amount_cents,
            currency: row.currency,
            reference: row.reference,
            detail: row.detail,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

fn parse_stored_status(s: &str) -> Result<SubscriptionStatus, StoreError> {
    SubscriptionStatus::parse(s)
        .map_err(|_| StoreError::database(format!("invalid status value in database: {}", s)))
}

fn parse_stored_note_kind(s: &str) -> Result<NoteKind, StoreError> {
    NoteKind::parse(s)
        .map_err(|_| StoreError::database(format!("invalid note kind in database: {}", s)))
}

const MEMBER_COLUMNS: &str = "id, first_name, last_name, email, phone, photo_url, \
     payer_id, customer_id, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, member_id, customer_id, status, price_id, \
     current_period_start, current_period_end, cancel_at_period_end, \
     last_event_at, version, created_at, updated_at";

#[async_trait]
impl MemberStore for PostgresMemberStore {
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        self.check_payer(member).await?;

        sqlx::query(
            r#"
            INSERT INTO members (
                id, first_name, last_name, email, phone, photo_url,
                payer_id, customer_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(member.id.as_uuid())
        .bind(&member.first_name)
        .bind(&member.last_name)
        .bind(&member.email)
        .bind(&member.phone)
        .bind(&member.photo_url)
        .bind(member.payer_id.map(|id| *id.as_uuid()))
        .bind(&member.customer_id)
        .bind(member.created_at.as_datetime())
        .bind(member.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("members_pkey") {
                    return StoreError::duplicate("member", member.id.to_string());
                }
            }
            StoreError::database(format!("failed to insert member: {}", e))
        })?;

        Ok(())
    }

    async fn update_member(&self, member: &Member) -> Result<(), StoreError> {
        self.check_payer(member).await?;

        let result = sqlx::query(
            r#"
            UPDATE members SET
                first_name = $2,
                last_name = $3,
                email = $4,
                phone = $5,
                photo_url = $6,
                payer_id = $7,
                customer_id = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(member.id.as_uuid())
        .bind(&member.first_name)
        .bind(&member.last_name)
        .bind(&member.email)
        .bind(&member.phone)
        .bind(&member.photo_url)
        .bind(member.payer_id.map(|id| *id.as_uuid()))
        .bind(&member.customer_id)
        .bind(member.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to update member: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("member", member.id.to_string()));
        }

        Ok(())
    }

    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM members WHERE id = $1",
            MEMBER_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to load member: {}", e)))?;

        Ok(row.map(Member::from))
    }

    async fn find_member_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM members WHERE customer_id = $1",
            MEMBER_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to load member by customer: {}", e)))?;

        Ok(row.map(Member::from))
    }

    async fn dependents_of(&self, payer_id: &MemberId) -> Result<Vec<Member>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM members WHERE payer_id = $1 ORDER BY last_name, first_name",
            MEMBER_COLUMNS
        ))
        .bind(payer_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to load dependents: {}", e)))?;

        Ok(rows.into_iter().map(Member::from).collect())
    }

    async fn search(&self, query: &MemberQuery) -> Result<Vec<Member>, StoreError> {
        // The lateral subquery picks the same record `subscription_of`
        // returns, so the status filter sees each member's current
        // subscription. NULL parameters disable their filter.
        let rows: Vec<MemberRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM members m
            LEFT JOIN LATERAL (
                SELECT s.status FROM subscriptions s
                WHERE s.member_id = m.id
                ORDER BY s.status IN ('trialing', 'active', 'past_due') DESC,
                         s.last_event_at DESC
                LIMIT 1
            ) cur ON TRUE
            WHERE ($1::text IS NULL
                   OR strpos(lower(m.first_name || ' ' || m.last_name), lower($1)) > 0)
              AND ($2::text IS NULL OR m.email = $2)
              AND ($3::text IS NULL OR cur.status = $3)
              AND ($4::uuid IS NULL OR m.payer_id = $4)
            ORDER BY m.last_name, m.first_name
            LIMIT $5 OFFSET $6
            "#,
            member_columns_qualified("m")
        ))
        .bind(&query.name_contains)
        .bind(&query.email)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.payer_id.map(|id| *id.as_uuid()))
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to search members: {}", e)))?;

        Ok(rows.into_iter().map(Member::from).collect())
    }

    async fn attach_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                subscription_id, member_id, customer_id, status, price_id,
                current_period_start, current_period_end, cancel_at_period_end,
                last_event_at, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&record.subscription_id)
        .bind(record.member_id.as_uuid())
        .bind(&record.customer_id)
        .bind(record.status.as_str())
        .bind(&record.price_id)
        .bind(record.current_period_start.as_datetime())
        .bind(record.current_period_end.as_datetime())
        .bind(record.cancel_at_period_end)
        .bind(record.last_event_at.as_datetime())
        .bind(record.version)
        .bind(record.created_at.as_datetime())
        .bind(record.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("subscriptions_pkey") {
                    return StoreError::duplicate("subscription", &record.subscription_id);
                }
            }
            StoreError::database(format!("failed to insert subscription: {}", e))
        })?;

        Ok(())
    }

    async fn subscription_of(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        // Prefer the record granting access, then the most recently touched.
        // Matches the ordering the search filter uses.
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE member_id = $1
            ORDER BY status IN ('trialing', 'active', 'past_due') DESC,
                     last_event_at DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(member_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to load subscription: {}", e)))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to load subscription: {}", e)))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn find_subscription_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE customer_id = $1
            ORDER BY last_event_at DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            StoreError::database(format!("failed to load subscription by customer: {}", e))
        })?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn apply_transition(
        &self,
        subscription_id: &str,
        transition: TransitionFn<'_>,
    ) -> Result<AppliedTransition, BillingError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let current = self
                .find_subscription(subscription_id)
                .await
                .map_err(BillingError::from)?
                .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;

            let mut updated = transition(&current)?;
            updated.version = current.version + 1;

            let result = sqlx::query(
                r#"
                UPDATE subscriptions SET
                    member_id = $3,
                    customer_id = $4,
                    status = $5,
                    price_id = $6,
                    current_period_start = $7,
                    current_period_end = $8,
                    cancel_at_period_end = $9,
                    last_event_at = $10,
                    version = $11,
                    updated_at = $12
                WHERE subscription_id = $1 AND version = $2
                "#,
            )
            .bind(subscription_id)
            .bind(current.version)
            .bind(updated.member_id.as_uuid())
            .bind(&updated.customer_id)
            .bind(updated.status.as_str())
            .bind(&updated.price_id)
            .bind(updated.current_period_start.as_datetime())
            .bind(updated.current_period_end.as_datetime())
            .bind(updated.cancel_at_period_end)
            .bind(updated.last_event_at.as_datetime())
            .bind(updated.version)
            .bind(updated.updated_at.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                BillingError::from(StoreError::database(format!(
                    "failed to write transition: {}",
                    e
                )))
            })?;

            if result.rows_affected() > 0 {
                return Ok(AppliedTransition {
                    previous: current,
                    updated,
                });
            }

            // Version check failed. Another writer got there first; reload
            // and re-apply against the fresh record.
            if attempt >= VERSION_RACE_ATTEMPTS {
                return Err(BillingError::conflict(format!(
                    "subscription {} version check failed after {} attempts",
                    subscription_id, attempt
                )));
            }
            tracing::debug!(
                subscription_id,
                attempt,
                "transition lost version race, reloading"
            );
        }
    }

    async fn append_billing_note(&self, note: &BillingNote) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO billing_notes (
                id, member_id, kind, amount_cents, currency, reference, detail, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(note.id.as_uuid())
        .bind(note.member_id.as_uuid())
        .bind(note.kind.as_str())
        .bind(note.amount_cents)
        .bind(&note.currency)
        .bind(&note.reference)
        .bind(&note.detail)
        .bind(note.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to insert billing note: {}", e)))?;

        Ok(())
    }

    async fn notes_for(&self, member_id: &MemberId) -> Result<Vec<BillingNote>, StoreError> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            r#"
            SELECT id, member_id, kind, amount_cents, currency, reference, detail, created_at
            FROM billing_notes
            WHERE member_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(member_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::database(format!("failed to load billing notes: {}", e)))?;

        rows.into_iter().map(BillingNote::try_from).collect()
    }
}

fn member_columns_qualified(alias: &str) -> String {
    MEMBER_COLUMNS
        .split(", ")
        .map(|col| format!("{}.{}", alias, col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
