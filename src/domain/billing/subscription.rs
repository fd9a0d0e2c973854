//! Subscription records and their status state machine.
//!
//! A `SubscriptionRecord` is the persisted billing state for one paying
//! member. All mutation helpers are pure (`&self -> Result<Self, _>`) so the
//! store can retry them safely under optimistic concurrency, and every
//! helper stamps `last_event_at` so out-of-order deliveries can be detected.

use crate::domain::foundation::{MemberId, StateMachine, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};

/// Subscription status as reported by the payment provider.
///
/// Lifecycle: `incomplete → trialing|active → past_due → active|canceled`;
/// `active`, `trialing` and `past_due` can each cancel. `unpaid` is reached
/// from `past_due` once the provider exhausts its payment retries. `canceled`
/// and `unpaid` are terminal for a given subscription id; reactivation only
/// happens through a brand-new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
}

impl SubscriptionStatus {
    /// All statuses, in lifecycle order. Used by exhaustiveness tests.
    pub const ALL: [SubscriptionStatus; 6] = [
        SubscriptionStatus::Incomplete,
        SubscriptionStatus::Trialing,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Canceled,
        SubscriptionStatus::Unpaid,
    ];

    /// Parses the provider's wire string.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown subscription status '{}'", other),
            )),
        }
    }

    /// Returns the provider's wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
        }
    }

    /// Whether a member in this status may use the gym.
    ///
    /// `past_due` retains access during the provider's dunning window.
    pub fn has_access(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active | SubscriptionStatus::PastDue
        )
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Incomplete, Trialing)
                | (Incomplete, Active)
                | (Incomplete, Canceled)
                | (Trialing, Active)
                | (Trialing, PastDue)
                | (Trialing, Canceled)
                | (Active, PastDue)
                | (Active, Canceled)
                | (PastDue, Active)
                | (PastDue, Canceled)
                | (PastDue, Unpaid)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Incomplete => vec![Trialing, Active, Canceled],
            Trialing => vec![Active, PastDue, Canceled],
            Active => vec![PastDue, Canceled],
            PastDue => vec![Active, Canceled, Unpaid],
            Canceled => vec![],
            Unpaid => vec![],
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a provider subscription, as decoded from a webhook
/// payload or an API response. The reconciliation engine consumes both the
/// same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancel_at_period_end: bool,
}

/// Persisted billing state for one paying member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub member_id: MemberId,
    /// Provider-assigned subscription id; the serialization key for writes.
    pub subscription_id: String,
    /// Provider-assigned customer id.
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Timestamp,
    pub current_period_end: Timestamp,
    pub cancel_at_period_end: bool,
    /// Provider timestamp of the last event applied to this record.
    /// Events carrying a strictly older timestamp are stale and ignored.
    pub last_event_at: Timestamp,
    /// Optimistic concurrency counter, bumped by the store on every write.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SubscriptionRecord {
    /// Creates a record from a provider snapshot, e.g. on checkout
    /// completion or a `subscription created` event for a known customer.
    pub fn from_snapshot(
        member_id: MemberId,
        snapshot: &SubscriptionSnapshot,
        event_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        check_period(&snapshot.current_period_start, &snapshot.current_period_end)?;
        if snapshot.subscription_id.is_empty() {
            return Err(ValidationError::empty_field("subscription_id"));
        }
        if snapshot.customer_id.is_empty() {
            return Err(ValidationError::empty_field("customer_id"));
        }
        let now = Timestamp::now();
        Ok(Self {
            member_id,
            subscription_id: snapshot.subscription_id.clone(),
            customer_id: snapshot.customer_id.clone(),
            status: snapshot.status,
            price_id: snapshot.price_id.clone(),
            current_period_start: snapshot.current_period_start,
            current_period_end: snapshot.current_period_end,
            cancel_at_period_end: snapshot.cancel_at_period_end,
            last_event_at: event_at,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// True when an event stamped `event_at` is older than the last applied
    /// event and must not be applied.
    pub fn is_stale_event(&self, event_at: &Timestamp) -> bool {
        event_at.is_before(&self.last_event_at)
    }

    /// Upserts provider-reported state (`subscription created/updated`).
    ///
    /// A snapshot carrying the current status refreshes the remaining fields;
    /// a different status must be a legal transition.
    pub fn apply_snapshot(
        &self,
        snapshot: &SubscriptionSnapshot,
        event_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        check_period(&snapshot.current_period_start, &snapshot.current_period_end)?;
        let status = if snapshot.status == self.status {
            self.status
        } else {
            self.status.transition_to(snapshot.status)?
        };
        Ok(Self {
            status,
            price_id: snapshot.price_id.clone(),
            current_period_start: snapshot.current_period_start,
            current_period_end: snapshot.current_period_end,
            cancel_at_period_end: snapshot.cancel_at_period_end,
            last_event_at: event_at,
            updated_at: Timestamp::now(),
            ..self.clone()
        })
    }

    /// Applies a `subscription deleted` event: status becomes `canceled`,
    /// historical period data is retained.
    pub fn mark_canceled(&self, event_at: Timestamp) -> Result<Self, ValidationError> {
        let status = self.status.transition_to(SubscriptionStatus::Canceled)?;
        Ok(Self {
            status,
            last_event_at: event_at,
            updated_at: Timestamp::now(),
            ..self.clone()
        })
    }

    /// Applies a paid invoice: status becomes `active`, period bounds refresh
    /// from the invoice. An already `active` record treats this as a renewal
    /// (period refresh, no status change).
    pub fn record_payment(
        &self,
        period_start: Timestamp,
        period_end: Timestamp,
        event_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        check_period(&period_start, &period_end)?;
        let status = if self.status == SubscriptionStatus::Active {
            self.status
        } else {
            self.status.transition_to(SubscriptionStatus::Active)?
        };
        Ok(Self {
            status,
            current_period_start: period_start,
            current_period_end: period_end,
            last_event_at: event_at,
            updated_at: Timestamp::now(),
            ..self.clone()
        })
    }

    /// Applies a failed invoice: status becomes `past_due` with no period
    /// mutation. `final_attempt` marks the provider's last retry; a record
    /// already `past_due` then moves to `unpaid`.
    pub fn record_payment_failure(
        &self,
        final_attempt: bool,
        event_at: Timestamp,
    ) -> Result<Self, ValidationError> {
        let status = match self.status {
            SubscriptionStatus::PastDue if final_attempt => self
                .status
                .transition_to(SubscriptionStatus::Unpaid)?,
            SubscriptionStatus::PastDue => self.status,
            _ => self.status.transition_to(SubscriptionStatus::PastDue)?,
        };
        Ok(Self {
            status,
            last_event_at: event_at,
            updated_at: Timestamp::now(),
            ..self.clone()
        })
    }

    /// Whether this record currently grants gym access.
    pub fn has_access(&self) -> bool {
        self.status.has_access()
    }
}

fn check_period(start: &Timestamp, end: &Timestamp) -> Result<(), ValidationError> {
    if end.is_before(start) {
        return Err(ValidationError::order_violation(
            "current_period_end",
            "current_period_start",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: SubscriptionStatus) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            subscription_id: "sub_123".to_string(),
            customer_id: "cus_123".to_string(),
            status,
            price_id: Some("price_monthly".to_string()),
            current_period_start: Timestamp::from_unix_secs(1_700_000_000),
            current_period_end: Timestamp::from_unix_secs(1_702_592_000),
            cancel_at_period_end: false,
        }
    }

    fn record(status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord::from_snapshot(
            MemberId::new(),
            &snapshot(status),
            Timestamp::from_unix_secs(1_700_000_100),
        )
        .unwrap()
    }

    // ============================================================
    // Status machine
    // ============================================================

    #[test]
    fn incomplete_reaches_trialing_active_or_canceled() {
        let from = SubscriptionStatus::Incomplete;
        assert!(from.can_transition_to(&SubscriptionStatus::Trialing));
        assert!(from.can_transition_to(&SubscriptionStatus::Active));
        assert!(from.can_transition_to(&SubscriptionStatus::Canceled));
        assert!(!from.can_transition_to(&SubscriptionStatus::PastDue));
        assert!(!from.can_transition_to(&SubscriptionStatus::Unpaid));
    }

    #[test]
    fn past_due_recovers_cancels_or_goes_unpaid() {
        let from = SubscriptionStatus::PastDue;
        assert!(from.can_transition_to(&SubscriptionStatus::Active));
        assert!(from.can_transition_to(&SubscriptionStatus::Canceled));
        assert!(from.can_transition_to(&SubscriptionStatus::Unpaid));
        assert!(!from.can_transition_to(&SubscriptionStatus::Trialing));
    }

    #[test]
    fn unpaid_is_only_reachable_from_past_due() {
        for status in SubscriptionStatus::ALL {
            let reachable = status.can_transition_to(&SubscriptionStatus::Unpaid);
            assert_eq!(reachable, status == SubscriptionStatus::PastDue, "{:?}", status);
        }
    }

    #[test]
    fn canceled_and_unpaid_are_terminal() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(SubscriptionStatus::Unpaid.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
    }

    #[test]
    fn no_status_reactivates_out_of_canceled() {
        for target in SubscriptionStatus::ALL {
            assert!(!SubscriptionStatus::Canceled.can_transition_to(&target));
        }
    }

    #[test]
    fn every_status_pair_has_a_defined_answer() {
        for from in SubscriptionStatus::ALL {
            for target in SubscriptionStatus::ALL {
                let allowed = from.can_transition_to(&target);
                assert_eq!(
                    allowed,
                    from.valid_transitions().contains(&target),
                    "{:?} -> {:?}",
                    from,
                    target
                );
            }
        }
    }

    #[test]
    fn access_follows_status() {
        assert!(SubscriptionStatus::Trialing.has_access());
        assert!(SubscriptionStatus::Active.has_access());
        assert!(SubscriptionStatus::PastDue.has_access());
        assert!(!SubscriptionStatus::Incomplete.has_access());
        assert!(!SubscriptionStatus::Canceled.has_access());
        assert!(!SubscriptionStatus::Unpaid.has_access());
    }

    #[test]
    fn wire_string_roundtrip() {
        for status in SubscriptionStatus::ALL {
            assert_eq!(SubscriptionStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn parse_rejects_unknown_status() {
        assert!(SubscriptionStatus::parse("paused").is_err());
        assert!(SubscriptionStatus::parse("").is_err());
        assert!(SubscriptionStatus::parse("ACTIVE").is_err());
    }

    // ============================================================
    // Record construction
    // ============================================================

    #[test]
    fn from_snapshot_copies_provider_fields() {
        let member_id = MemberId::new();
        let snap = snapshot(SubscriptionStatus::Trialing);
        let event_at = Timestamp::from_unix_secs(1_700_000_500);

        let rec = SubscriptionRecord::from_snapshot(member_id, &snap, event_at).unwrap();

        assert_eq!(rec.member_id, member_id);
        assert_eq!(rec.subscription_id, "sub_123");
        assert_eq!(rec.customer_id, "cus_123");
        assert_eq!(rec.status, SubscriptionStatus::Trialing);
        assert_eq!(rec.price_id.as_deref(), Some("price_monthly"));
        assert_eq!(rec.last_event_at, event_at);
        assert_eq!(rec.version, 0);
    }

    #[test]
    fn from_snapshot_rejects_inverted_period() {
        let mut snap = snapshot(SubscriptionStatus::Active);
        snap.current_period_end = snap.current_period_start.minus_secs(1);
        let result = SubscriptionRecord::from_snapshot(MemberId::new(), &snap, Timestamp::now());
        assert!(result.is_err());
    }

    #[test]
    fn from_snapshot_rejects_blank_ids() {
        let mut snap = snapshot(SubscriptionStatus::Active);
        snap.subscription_id = String::new();
        assert!(SubscriptionRecord::from_snapshot(MemberId::new(), &snap, Timestamp::now()).is_err());
    }

    #[test]
    fn zero_length_period_is_allowed() {
        let mut snap = snapshot(SubscriptionStatus::Active);
        snap.current_period_end = snap.current_period_start;
        assert!(SubscriptionRecord::from_snapshot(MemberId::new(), &snap, Timestamp::now()).is_ok());
    }

    // ============================================================
    // Staleness guard
    // ============================================================

    #[test]
    fn strictly_older_events_are_stale() {
        let rec = record(SubscriptionStatus::Active);
        let older = rec.last_event_at.minus_secs(10);
        assert!(rec.is_stale_event(&older));
    }

    #[test]
    fn equal_timestamp_events_are_not_stale() {
        // Same-second event pairs are common during checkout; they apply in
        // arrival order rather than being dropped.
        let rec = record(SubscriptionStatus::Active);
        let equal = rec.last_event_at;
        assert!(!rec.is_stale_event(&equal));
    }

    #[test]
    fn newer_events_are_not_stale() {
        let rec = record(SubscriptionStatus::Active);
        let newer = rec.last_event_at.plus_secs(10);
        assert!(!rec.is_stale_event(&newer));
    }

    // ============================================================
    // Upsert (subscription created/updated)
    // ============================================================

    #[test]
    fn apply_snapshot_with_same_status_refreshes_fields() {
        let rec = record(SubscriptionStatus::Active);
        let mut snap = snapshot(SubscriptionStatus::Active);
        snap.cancel_at_period_end = true;
        snap.price_id = Some("price_annual".to_string());
        let event_at = rec.last_event_at.plus_secs(60);

        let next = rec.apply_snapshot(&snap, event_at).unwrap();

        assert_eq!(next.status, SubscriptionStatus::Active);
        assert!(next.cancel_at_period_end);
        assert_eq!(next.price_id.as_deref(), Some("price_annual"));
        assert_eq!(next.last_event_at, event_at);
        assert_eq!(next.subscription_id, rec.subscription_id);
    }

    #[test]
    fn apply_snapshot_performs_legal_transition() {
        let rec = record(SubscriptionStatus::Trialing);
        let snap = snapshot(SubscriptionStatus::Active);
        let next = rec.apply_snapshot(&snap, rec.last_event_at.plus_secs(1)).unwrap();
        assert_eq!(next.status, SubscriptionStatus::Active);
    }

    #[test]
    fn apply_snapshot_rejects_illegal_transition() {
        let rec = record(SubscriptionStatus::Canceled);
        let snap = snapshot(SubscriptionStatus::Active);
        let result = rec.apply_snapshot(&snap, rec.last_event_at.plus_secs(1));
        assert!(result.is_err());
    }

    #[test]
    fn apply_snapshot_carries_unpaid_from_provider() {
        let rec = record(SubscriptionStatus::PastDue);
        let snap = snapshot(SubscriptionStatus::Unpaid);
        let next = rec.apply_snapshot(&snap, rec.last_event_at.plus_secs(1)).unwrap();
        assert_eq!(next.status, SubscriptionStatus::Unpaid);
    }

    // ============================================================
    // Cancellation
    // ============================================================

    #[test]
    fn mark_canceled_retains_period_data() {
        let rec = record(SubscriptionStatus::Active);
        let next = rec.mark_canceled(rec.last_event_at.plus_secs(1)).unwrap();
        assert_eq!(next.status, SubscriptionStatus::Canceled);
        assert_eq!(next.current_period_start, rec.current_period_start);
        assert_eq!(next.current_period_end, rec.current_period_end);
    }

    #[test]
    fn mark_canceled_twice_fails() {
        let rec = record(SubscriptionStatus::Active);
        let canceled = rec.mark_canceled(rec.last_event_at.plus_secs(1)).unwrap();
        assert!(canceled.mark_canceled(canceled.last_event_at.plus_secs(1)).is_err());
    }

    // ============================================================
    // Payments
    // ============================================================

    #[test]
    fn payment_recovers_past_due_record() {
        let rec = record(SubscriptionStatus::PastDue);
        let start = Timestamp::from_unix_secs(1_703_000_000);
        let end = Timestamp::from_unix_secs(1_705_592_000);

        let next = rec.record_payment(start, end, rec.last_event_at.plus_secs(1)).unwrap();

        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.current_period_start, start);
        assert_eq!(next.current_period_end, end);
    }

    #[test]
    fn payment_on_active_record_is_a_renewal() {
        let rec = record(SubscriptionStatus::Active);
        let start = rec.current_period_end;
        let end = start.plus_days(30);

        let next = rec.record_payment(start, end, rec.last_event_at.plus_secs(1)).unwrap();

        assert_eq!(next.status, SubscriptionStatus::Active);
        assert_eq!(next.current_period_start, start);
        assert_eq!(next.current_period_end, end);
    }

    #[test]
    fn payment_settles_incomplete_record() {
        let rec = record(SubscriptionStatus::Incomplete);
        let next = rec
            .record_payment(
                rec.current_period_start,
                rec.current_period_end,
                rec.last_event_at.plus_secs(1),
            )
            .unwrap();
        assert_eq!(next.status, SubscriptionStatus::Active);
    }

    #[test]
    fn payment_cannot_reactivate_canceled_record() {
        let rec = record(SubscriptionStatus::Canceled);
        let result = rec.record_payment(
            rec.current_period_start,
            rec.current_period_end,
            rec.last_event_at.plus_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn payment_cannot_revive_unpaid_record() {
        let rec = record(SubscriptionStatus::PastDue);
        let unpaid = rec
            .record_payment_failure(true, rec.last_event_at.plus_secs(1))
            .unwrap();
        assert_eq!(unpaid.status, SubscriptionStatus::Unpaid);

        let result = unpaid.record_payment(
            unpaid.current_period_start,
            unpaid.current_period_end,
            unpaid.last_event_at.plus_secs(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn payment_failure_moves_active_to_past_due_without_touching_period() {
        let rec = record(SubscriptionStatus::Active);
        let next = rec
            .record_payment_failure(false, rec.last_event_at.plus_secs(1))
            .unwrap();
        assert_eq!(next.status, SubscriptionStatus::PastDue);
        assert_eq!(next.current_period_start, rec.current_period_start);
        assert_eq!(next.current_period_end, rec.current_period_end);
    }

    #[test]
    fn repeated_payment_failure_stays_past_due_until_final_attempt() {
        let rec = record(SubscriptionStatus::Active);
        let first = rec
            .record_payment_failure(false, rec.last_event_at.plus_secs(1))
            .unwrap();
        let second = first
            .record_payment_failure(false, first.last_event_at.plus_secs(1))
            .unwrap();
        assert_eq!(second.status, SubscriptionStatus::PastDue);

        let exhausted = second
            .record_payment_failure(true, second.last_event_at.plus_secs(1))
            .unwrap();
        assert_eq!(exhausted.status, SubscriptionStatus::Unpaid);
    }

    #[test]
    fn final_attempt_on_active_record_goes_past_due_first() {
        // A lone final-attempt failure against an active record does not jump
        // straight to unpaid; the provider always dunned through past_due.
        let rec = record(SubscriptionStatus::Active);
        let next = rec
            .record_payment_failure(true, rec.last_event_at.plus_secs(1))
            .unwrap();
        assert_eq!(next.status, SubscriptionStatus::PastDue);
    }
}
