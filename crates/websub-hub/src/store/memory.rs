//! Ephemeral in-process subscription store.
//!
//! Same contract as the libSQL backend, but nothing survives a restart.
//! Used when no database path is configured, and by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{StoreError, SubscriptionRecord, TopicId};

#[derive(Default)]
struct Inner {
    next_topic_id: i64,
    topics: HashMap<String, TopicId>,
    subscriptions: HashMap<(TopicId, String), SubscriptionRecord>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn topic_id(&self, url: &str) -> Result<Option<TopicId>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.topics.get(url).copied())
    }

    pub fn add_topic(&self, url: &str) -> Result<TopicId, StoreError> {
        let mut inner = self.lock()?;
        if let Some(id) = inner.topics.get(url) {
            return Ok(*id);
        }
        inner.next_topic_id += 1;
        let id = TopicId(inner.next_topic_id);
        inner.topics.insert(url.to_string(), id);
        debug!(topic = %url, id = id.0, "topic registered");
        Ok(id)
    }

    pub fn upsert_subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
        secret: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.subscriptions.insert(
            (topic_id, callback.to_string()),
            SubscriptionRecord {
                topic_id,
                callback: callback.to_string(),
                secret: secret.map(str::to_string),
                expires_at,
            },
        );
        debug!(topic_id = topic_id.0, callback = %callback, "subscription stored");
        Ok(())
    }

    pub fn remove_subscription(&self, topic_id: TopicId, callback: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let removed = inner
            .subscriptions
            .remove(&(topic_id, callback.to_string()))
            .is_some();
        debug!(topic_id = topic_id.0, callback = %callback, removed, "subscription removal");
        Ok(())
    }

    pub fn subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .subscriptions
            .get(&(topic_id, callback.to_string()))
            .cloned())
    }

    pub fn subscription_count(&self) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        Ok(inner.subscriptions.len() as u64)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::QueryFailed("store mutex poisoned".to_string()))
    }
}
