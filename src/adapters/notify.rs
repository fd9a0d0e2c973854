//! Log-backed notifier.
//!
//! Emits each notification as a structured log line. Stands in for a real
//! delivery channel (email, push) until one is wired up; the reconciliation
//! engine treats delivery as best effort either way.

use async_trait::async_trait;
use tracing::info;

use crate::ports::{BillingNotification, Notifier, NotifyError};

/// `Notifier` that writes structured log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: BillingNotification) -> Result<(), NotifyError> {
        info!(
            kind = notification.kind(),
            member_id = %notification.member_id(),
            "billing notification"
        );
        Ok(())
    }
}
