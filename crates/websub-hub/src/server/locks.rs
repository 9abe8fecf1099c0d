//! Per-subscription mutation locks.
//!
//! Verification and store mutation for a given (topic, callback) pair must
//! not interleave: a later request's outcome could otherwise be clobbered
//! by an earlier one still waiting on its callback. Each key gets its own
//! async mutex; independent keys proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

#[derive(Default)]
pub struct SubscriptionLocks {
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl SubscriptionLocks {
    /// Acquire the lock for one (topic, callback) pair, waiting behind any
    /// in-flight verification for the same pair.
    pub async fn lock(&self, topic: &Url, callback: &Url) -> OwnedMutexGuard<()> {
        let key = (topic.to_string(), callback.to_string());
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
