//! Topic registry and subscription store.
//!
//! One store abstraction with two interchangeable backends: a durable
//! libSQL-backed store and an ephemeral in-memory store, selected by
//! configuration. The store is the only component that mutates persisted
//! subscription state, and it is only ever called after a successful
//! verification of intent.

mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::DatabaseError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Identifier of a registered topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicId(pub i64);

/// A persisted (topic, callback) subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub topic_id: TopicId,
    pub callback: String,
    pub secret: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Store-specific errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("store query failed: {0}")]
    QueryFailed(String),
}

/// Subscription store with interchangeable backends
pub enum Store {
    /// Durable store backed by libSQL
    Sqlite(SqliteStore),
    /// Ephemeral in-process store
    Memory(MemoryStore),
}

impl Store {
    /// Look up a topic by URL. A miss is a normal outcome, not an error.
    pub async fn topic_id(&self, url: &str) -> Result<Option<TopicId>, StoreError> {
        match self {
            Store::Sqlite(store) => store.topic_id(url).await,
            Store::Memory(store) => store.topic_id(url),
        }
    }

    /// Register a topic URL. Idempotent: re-registering an existing URL
    /// returns the existing id. Provisioning only - the subscription
    /// protocol never creates topics.
    pub async fn add_topic(&self, url: &str) -> Result<TopicId, StoreError> {
        match self {
            Store::Sqlite(store) => store.add_topic(url).await,
            Store::Memory(store) => store.add_topic(url),
        }
    }

    /// Insert a subscription, or overwrite the secret and expiry of an
    /// existing one for the same (topic, callback) in place.
    pub async fn upsert_subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
        secret: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Sqlite(store) => {
                store
                    .upsert_subscription(topic_id, callback, secret, expires_at)
                    .await
            }
            Store::Memory(store) => store.upsert_subscription(topic_id, callback, secret, expires_at),
        }
    }

    /// Delete the subscription for (topic, callback) if present. Deleting
    /// an absent subscription is a no-op, not an error.
    pub async fn remove_subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
    ) -> Result<(), StoreError> {
        match self {
            Store::Sqlite(store) => store.remove_subscription(topic_id, callback).await,
            Store::Memory(store) => store.remove_subscription(topic_id, callback),
        }
    }

    /// Read back the subscription for (topic, callback), if any
    pub async fn subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        match self {
            Store::Sqlite(store) => store.subscription(topic_id, callback).await,
            Store::Memory(store) => store.subscription(topic_id, callback),
        }
    }

    /// Number of stored subscriptions across all topics
    pub async fn subscription_count(&self) -> Result<u64, StoreError> {
        match self {
            Store::Sqlite(store) => store.subscription_count().await,
            Store::Memory(store) => store.subscription_count(),
        }
    }

    /// Check that the backing storage is reachable
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        match self {
            Store::Sqlite(store) => store.health_check().await,
            Store::Memory(_) => Ok(true),
        }
    }
}
