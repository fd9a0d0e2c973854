//! Recording notifier for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ports::{BillingNotification, Notifier, NotifyError};

/// `Notifier` double that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<BillingNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent delivery fail.
    pub fn start_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn stop_failing(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Everything delivered so far.
    pub fn sent(&self) -> Vec<BillingNotification> {
        self.sent
            .lock()
            .expect("RecordingNotifier: lock poisoned")
            .clone()
    }

    /// Deliveries of one kind, by its stable name.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<BillingNotification> {
        self.sent()
            .into_iter()
            .filter(|n| n.kind() == kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: BillingNotification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::delivery("recording notifier set to fail"));
        }
        self.sent
            .lock()
            .expect("RecordingNotifier: lock poisoned")
            .push(notification);
        Ok(())
    }
}
