//! Member search queries.
//!
//! `MemberQuery` is an immutable description of a search: each `with_*`
//! call returns a new value, and nothing executes until the query is handed
//! to `MemberStore::search`. The in-memory store filters with [`MemberQuery::matches`];
//! the Postgres store translates the same fields to SQL.

use crate::domain::billing::member::Member;
use crate::domain::billing::subscription::{SubscriptionRecord, SubscriptionStatus};
use crate::domain::foundation::MemberId;

/// Largest page a single search returns.
pub const MAX_PAGE_SIZE: usize = 200;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Immutable description of a member search.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberQuery {
    pub name_contains: Option<String>,
    pub email: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub payer_id: Option<MemberId>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for MemberQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberQuery {
    pub fn new() -> Self {
        Self {
            name_contains: None,
            email: None,
            status: None,
            payer_id: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }

    /// Case-insensitive substring match against the member's full name.
    pub fn with_name_contains(self, fragment: impl Into<String>) -> Self {
        Self {
            name_contains: Some(fragment.into()),
            ..self
        }
    }

    /// Exact email match.
    pub fn with_email(self, email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..self
        }
    }

    /// Restrict to members whose subscription is in the given status.
    /// Members without a subscription never match a status filter.
    pub fn with_status(self, status: SubscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }

    /// Restrict to dependents billed by the given payer.
    pub fn with_payer(self, payer_id: MemberId) -> Self {
        Self {
            payer_id: Some(payer_id),
            ..self
        }
    }

    /// Page size, capped at [`MAX_PAGE_SIZE`].
    pub fn with_limit(self, limit: usize) -> Self {
        Self {
            limit: limit.min(MAX_PAGE_SIZE),
            ..self
        }
    }

    pub fn with_offset(self, offset: usize) -> Self {
        Self { offset, ..self }
    }

    /// Evaluates the filter portion of the query against one member and
    /// their subscription, if any. Pagination is applied by the caller.
    pub fn matches(&self, member: &Member, subscription: Option<&SubscriptionRecord>) -> bool {
        if let Some(fragment) = &self.name_contains {
            let haystack = member.full_name().to_lowercase();
            if !haystack.contains(&fragment.to_lowercase()) {
                return false;
            }
        }

        if let Some(email) = &self.email {
            if member.email.as_deref() != Some(email.as_str()) {
                return false;
            }
        }

        if let Some(status) = self.status {
            match subscription {
                Some(record) if record.status == status => {}
                _ => return false,
            }
        }

        if let Some(payer_id) = &self.payer_id {
            if member.payer_id.as_ref() != Some(payer_id) {
                return false;
            }
        }

        true
    }
}
