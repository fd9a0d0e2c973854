//! SearchMembersHandler - query handler over the member roster.

use std::sync::Arc;

use crate::domain::billing::{BillingError, Member, MemberQuery};
use crate::ports::MemberStore;

/// Result page for a member search.
#[derive(Debug, Clone)]
pub struct SearchMembersResult {
    pub members: Vec<Member>,
    /// Echo of the applied limit and offset, for paging clients.
    pub limit: usize,
    pub offset: usize,
}

/// Handler for member searches.
pub struct SearchMembersHandler {
    store: Arc<dyn MemberStore>,
}

impl SearchMembersHandler {
    pub fn new(store: Arc<dyn MemberStore>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, query: MemberQuery) -> Result<SearchMembersResult, BillingError> {
        let members = self
            .store
            .search(&query)
            .await
            .map_err(BillingError::from)?;

        Ok(SearchMembersResult {
            members,
            limit: query.limit,
            offset: query.offset,
        })
    }
}
