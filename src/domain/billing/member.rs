//! Members, the payer graph, and billing notes.
//!
//! Members are held in an arena keyed by id; the payer relationship is an id
//! reference into the same arena, never a nested object. Dependents are the
//! derived reverse relation and are never stored redundantly. The no-cycle
//! invariant on the payer graph is enforced at write time, both here and in
//! the persistence adapter.

use crate::domain::foundation::{MemberId, NoteId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A gym member. Identity anchor for billing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    /// When set, this member is a billing dependent of another member.
    pub payer_id: Option<MemberId>,
    /// Provider-assigned customer id, set once the member enters billing.
    pub customer_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Member {
    /// Creates a member with the required name fields.
    pub fn new(
        id: MemberId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let first_name = first_name.into();
        let last_name = last_name.into();
        if first_name.trim().is_empty() {
            return Err(ValidationError::empty_field("first_name"));
        }
        if last_name.trim().is_empty() {
            return Err(ValidationError::empty_field("last_name"));
        }
        let now = Timestamp::now();
        Ok(Self {
            id,
            first_name,
            last_name,
            email: None,
            phone: None,
            photo_url: None,
            payer_id: None,
            customer_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sets contact details.
    pub fn with_contact(mut self, email: Option<String>, phone: Option<String>) -> Self {
        self.email = email;
        self.phone = phone;
        self
    }

    /// Sets the photo reference.
    pub fn with_photo(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }

    /// Full display name.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// True when another member pays this member's bills.
    pub fn is_dependent(&self) -> bool {
        self.payer_id.is_some()
    }
}

/// Errors raised by payer-graph writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayerError {
    #[error("member {0} is not in the roster")]
    UnknownMember(MemberId),

    #[error("payer {0} is not in the roster")]
    UnknownPayer(MemberId),

    #[error("member {0} cannot be their own payer")]
    SelfPayer(MemberId),

    #[error("assigning payer {payer} to member {member} would create a cycle")]
    Cycle { member: MemberId, payer: MemberId },
}

/// Walks the payer chain starting at `proposed_payer`; fails if the chain
/// reaches `member_id`. `lookup` resolves a member's current payer, which
/// lets the in-memory arena and the database adapter share one check.
pub fn check_payer_assignment(
    member_id: MemberId,
    proposed_payer: MemberId,
    lookup: impl Fn(&MemberId) -> Option<MemberId>,
) -> Result<(), PayerError> {
    if proposed_payer == member_id {
        return Err(PayerError::SelfPayer(member_id));
    }
    let mut visited = HashSet::new();
    let mut current = proposed_payer;
    // The visited set bounds the walk even against an already-corrupt chain.
    while visited.insert(current) {
        match lookup(&current) {
            Some(next) if next == member_id => {
                return Err(PayerError::Cycle {
                    member: member_id,
                    payer: proposed_payer,
                })
            }
            Some(next) => current = next,
            None => return Ok(()),
        }
    }
    Err(PayerError::Cycle {
        member: member_id,
        payer: proposed_payer,
    })
}

/// Arena of members indexed by id.
///
/// The roster owns payer-graph mutation: `assign_payer` is the only way to
/// point one member at another, and it rejects self-reference and cycles.
#[derive(Debug, Default, Clone)]
pub struct MemberRoster {
    members: HashMap<MemberId, Member>,
}

impl MemberRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member. Fails if the id is already present.
    pub fn insert(&mut self, member: Member) -> Result<(), ValidationError> {
        if self.members.contains_key(&member.id) {
            return Err(ValidationError::invalid_format(
                "id",
                format!("member {} already in roster", member.id),
            ));
        }
        self.members.insert(member.id, member);
        Ok(())
    }

    pub fn get(&self, id: &MemberId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Assigns (or clears, with `None`) a member's payer.
    ///
    /// Rejects unknown ids, self-payment, and any assignment that would
    /// close a cycle in the payer graph.
    pub fn assign_payer(
        &mut self,
        member_id: MemberId,
        payer_id: Option<MemberId>,
    ) -> Result<(), PayerError> {
        if !self.members.contains_key(&member_id) {
            return Err(PayerError::UnknownMember(member_id));
        }
        if let Some(payer) = payer_id {
            if !self.members.contains_key(&payer) {
                return Err(PayerError::UnknownPayer(payer));
            }
            check_payer_assignment(member_id, payer, |id| {
                self.members.get(id).and_then(|m| m.payer_id)
            })?;
        }
        let member = self
            .members
            .get_mut(&member_id)
            .expect("presence checked above");
        member.payer_id = payer_id;
        member.updated_at = Timestamp::now();
        Ok(())
    }

    /// Members whose payer is `id` (derived reverse relation).
    pub fn dependents_of(&self, id: &MemberId) -> Vec<&Member> {
        self.members
            .values()
            .filter(|m| m.payer_id.as_ref() == Some(id))
            .collect()
    }

    /// Resolves who ultimately pays for `id`: the end of the payer chain,
    /// or the member themselves when independent.
    pub fn billing_anchor(&self, id: &MemberId) -> Option<&Member> {
        let mut current = self.members.get(id)?;
        while let Some(payer_id) = current.payer_id {
            current = self.members.get(&payer_id)?;
        }
        Some(current)
    }
}

/// Kind discriminator for billing notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Refund,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteKind::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "refund" => Ok(NoteKind::Refund),
            other => Err(ValidationError::invalid_format(
                "kind",
                format!("unknown note kind '{}'", other),
            )),
        }
    }
}

/// Append-only audit entry on a member's billing history. Refunds land here
/// rather than mutating subscription status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingNote {
    pub id: NoteId,
    pub member_id: MemberId,
    pub kind: NoteKind,
    pub amount_cents: i64,
    pub currency: String,
    /// Provider reference (refund id, charge id).
    pub reference: String,
    pub detail: Option<String>,
    pub created_at: Timestamp,
}

impl BillingNote {
    /// Creates a refund note.
    pub fn refund(
        member_id: MemberId,
        amount_cents: i64,
        currency: impl Into<String>,
        reference: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: NoteId::new(),
            member_id,
            kind: NoteKind::Refund,
            amount_cents,
            currency: currency.into(),
            reference: reference.into(),
            detail,
            created_at: Timestamp::now(),
        }
    }
}
