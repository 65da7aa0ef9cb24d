/// Per-(psychologist, date) booking locks
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockKey = (String, NaiveDate);

/// In-process serialization of check-then-write for one calendar day.
///
/// Bookings for different psychologists or different dates never contend.
#[derive(Default)]
pub struct BookingLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl BookingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a psychologist's day
    pub async fn acquire(&self, psychologist_id: &str, date: NaiveDate) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((psychologist_id.to_string(), date))
                .or_default()
                .clone()
        };

        lock.lock_owned().await
    }

    /// Number of days currently tracked
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
