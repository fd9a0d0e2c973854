//! In-memory member store for tests and local development.
//!
//! Implements the `MemberStore` port over process-local maps. Writer locks
//! serialize transitions, so the optimistic-concurrency contract holds
//! trivially; the Postgres adapter is the production implementation.
//!
//! # Panics
//!
//! Methods panic if an internal lock is poisoned. Acceptable for test code;
//! do not use this adapter in production.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::billing::{
    check_payer_assignment, BillingError, BillingNote, Member, MemberQuery, SubscriptionRecord,
};
use crate::domain::foundation::MemberId;
use crate::ports::{AppliedTransition, MemberStore, StoreError, TransitionFn};

/// In-memory `MemberStore`.
#[derive(Default)]
pub struct InMemoryMemberStore {
    members: RwLock<HashMap<MemberId, Member>>,
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
    notes: RwLock<Vec<BillingNote>>,
}

impl InMemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Number of stored members.
    pub fn member_count(&self) -> usize {
        self.members
            .read()
            .expect("InMemoryMemberStore: members lock poisoned")
            .len()
    }

    /// Direct record access for assertions.
    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionRecord> {
        self.subscriptions
            .read()
            .expect("InMemoryMemberStore: subscriptions lock poisoned")
            .get(subscription_id)
            .cloned()
    }

    fn check_payer(
        members: &HashMap<MemberId, Member>,
        member: &Member,
    ) -> Result<(), StoreError> {
        if let Some(payer_id) = member.payer_id {
            if !members.contains_key(&payer_id) {
                return Err(StoreError::PayerRule(
                    crate::domain::billing::PayerError::UnknownPayer(payer_id),
                ));
            }
            check_payer_assignment(member.id, payer_id, |id| {
                members.get(id).and_then(|m| m.payer_id)
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl MemberStore for InMemoryMemberStore {
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut members = self
            .members
            .write()
            .expect("InMemoryMemberStore: members lock poisoned");
        if members.contains_key(&member.id) {
            return Err(StoreError::duplicate("member", member.id.to_string()));
        }
        Self::check_payer(&members, member)?;
        members.insert(member.id, member.clone());
        Ok(())
    }

    async fn update_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut members = self
            .members
            .write()
            .expect("InMemoryMemberStore: members lock poisoned");
        if !members.contains_key(&member.id) {
            return Err(StoreError::not_found("member", member.id.to_string()));
        }
        Self::check_payer(&members, member)?;
        members.insert(member.id, member.clone());
        Ok(())
    }

    async fn get_member(&self, id: &MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self
            .members
            .read()
            .expect("InMemoryMemberStore: members lock poisoned")
            .get(id)
            .cloned())
    }

    async fn find_member_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<Member>, StoreError> {
        Ok(self
            .members
            .read()
            .expect("InMemoryMemberStore: members lock poisoned")
            .values()
            .find(|m| m.customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn dependents_of(&self, payer_id: &MemberId) -> Result<Vec<Member>, StoreError> {
        let mut dependents: Vec<Member> = self
            .members
            .read()
            .expect("InMemoryMemberStore: members lock poisoned")
            .values()
            .filter(|m| m.payer_id.as_ref() == Some(payer_id))
            .cloned()
            .collect();
        dependents.sort_by(|a, b| {
            (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name))
        });
        Ok(dependents)
    }

    async fn search(&self, query: &MemberQuery) -> Result<Vec<Member>, StoreError> {
        let members = self
            .members
            .read()
            .expect("InMemoryMemberStore: members lock poisoned");
        let subscriptions = self
            .subscriptions
            .read()
            .expect("InMemoryMemberStore: subscriptions lock poisoned");

        let mut matched: Vec<Member> = members
            .values()
            .filter(|member| {
                let subscription = current_subscription(&subscriptions, &member.id);
                query.matches(member, subscription.as_ref())
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name))
        });
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn attach_subscription(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("InMemoryMemberStore: subscriptions lock poisoned");
        if subscriptions.contains_key(&record.subscription_id) {
            return Err(StoreError::duplicate(
                "subscription",
                record.subscription_id.clone(),
            ));
        }
        subscriptions.insert(record.subscription_id.clone(), record.clone());
        Ok(())
    }

    async fn subscription_of(
        &self,
        member_id: &MemberId,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(current_subscription(
            &self
                .subscriptions
                .read()
                .expect("InMemoryMemberStore: subscriptions lock poisoned"),
            member_id,
        ))
    }

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .expect("InMemoryMemberStore: subscriptions lock poisoned")
            .get(subscription_id)
            .cloned())
    }

    async fn find_subscription_by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .expect("InMemoryMemberStore: subscriptions lock poisoned")
            .values()
            .filter(|r| r.customer_id == customer_id)
            .max_by_key(|r| r.last_event_at.as_unix_secs())
            .cloned())
    }

    async fn apply_transition(
        &self,
        subscription_id: &str,
        transition: TransitionFn<'_>,
    ) -> Result<AppliedTransition, BillingError> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("InMemoryMemberStore: subscriptions lock poisoned");
        let current = subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))?;

        let mut updated = transition(&current)?;
        updated.version = current.version + 1;
        subscriptions.insert(subscription_id.to_string(), updated.clone());
        Ok(AppliedTransition {
            previous: current,
            updated,
        })
    }

    async fn append_billing_note(&self, note: &BillingNote) -> Result<(), StoreError> {
        self.notes
            .write()
            .expect("InMemoryMemberStore: notes lock poisoned")
            .push(note.clone());
        Ok(())
    }

    async fn notes_for(&self, member_id: &MemberId) -> Result<Vec<BillingNote>, StoreError> {
        Ok(self
            .notes
            .read()
            .expect("InMemoryMemberStore: notes lock poisoned")
            .iter()
            .filter(|n| &n.member_id == member_id)
            .cloned()
            .collect())
    }
}

/// A member can accumulate records over time (reactivation issues a new
/// subscription id). The current one is the record granting access, or
/// failing that the most recently touched.
fn current_subscription(
    subscriptions: &HashMap<String, SubscriptionRecord>,
    member_id: &MemberId,
) -> Option<SubscriptionRecord> {
    subscriptions
        .values()
        .filter(|r| &r.member_id == member_id)
        .max_by_key(|r| (r.has_access(), r.last_event_at.as_unix_secs()))
        .cloned()
}
