//! libSQL-backed subscription store.
//!
//! All operations go through one serialized connection. Each mutation is a
//! single statement, so a request's store mutation is atomic: it either
//! commits fully or leaves no partial record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::Connection;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{StoreError, SubscriptionRecord, TopicId};
use crate::db::Database;

/// Durable store over a hub database
pub struct SqliteStore {
    db: Database,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a store over an already-migrated database.
    ///
    /// In-memory databases are reached through their shared connection;
    /// file-backed databases get one dedicated connection.
    pub fn new(db: Database) -> Result<Self, StoreError> {
        let conn = match db.persistent_connection() {
            Some(conn) => conn,
            None => Arc::new(Mutex::new(db.connect()?)),
        };
        Ok(Self { db, conn })
    }

    #[instrument(skip(self))]
    pub async fn topic_id(&self, url: &str) -> Result<Option<TopicId>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT id FROM topics WHERE url = ?", libsql::params![url])
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to look up topic: {}", e)))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to read topic row: {}", e)))?
        {
            Some(row) => {
                let id: i64 = row.get(0).map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to get topic id: {}", e))
                })?;
                Ok(Some(TopicId(id)))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn add_topic(&self, url: &str) -> Result<TopicId, StoreError> {
        {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO topics (url) VALUES (?) ON CONFLICT(url) DO NOTHING",
                libsql::params![url],
            )
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to register topic: {}", e)))?;
        }

        match self.topic_id(url).await? {
            Some(id) => {
                debug!(topic = %url, id = id.0, "topic registered");
                Ok(id)
            }
            None => Err(StoreError::QueryFailed(format!(
                "Topic vanished after insert: {}",
                url
            ))),
        }
    }

    #[instrument(skip(self, secret))]
    pub async fn upsert_subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
        secret: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO subscriptions (topic_id, callback, secret, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(topic_id, callback) DO UPDATE SET
                secret = excluded.secret,
                expires_at = excluded.expires_at,
                updated_at = datetime('now')
            "#,
            libsql::params![topic_id.0, callback, secret, expires_at.to_rfc3339()],
        )
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Failed to upsert subscription: {}", e)))?;

        debug!(topic_id = topic_id.0, callback = %callback, "subscription stored");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM subscriptions WHERE topic_id = ? AND callback = ?",
                libsql::params![topic_id.0, callback],
            )
            .await
            .map_err(|e| {
                StoreError::QueryFailed(format!("Failed to remove subscription: {}", e))
            })?;

        debug!(topic_id = topic_id.0, callback = %callback, removed, "subscription removal");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn subscription(
        &self,
        topic_id: TopicId,
        callback: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT secret, expires_at FROM subscriptions WHERE topic_id = ? AND callback = ?",
                libsql::params![topic_id.0, callback],
            )
            .await
            .map_err(|e| {
                StoreError::QueryFailed(format!("Failed to query subscription: {}", e))
            })?;

        let row = match rows.next().await.map_err(|e| {
            StoreError::QueryFailed(format!("Failed to read subscription row: {}", e))
        })? {
            Some(row) => row,
            None => return Ok(None),
        };

        let secret: Option<String> = row.get(0).ok();
        let expires_at_str: String = row.get(1).map_err(|e| {
            StoreError::QueryFailed(format!("Failed to get expires_at: {}", e))
        })?;
        let expires_at = DateTime::parse_from_rfc3339(&expires_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::QueryFailed(format!("Failed to parse expires_at: {}", e)))?;

        Ok(Some(SubscriptionRecord {
            topic_id,
            callback: callback.to_string(),
            secret,
            expires_at,
        }))
    }

    pub async fn subscription_count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM subscriptions", ())
            .await
            .map_err(|e| {
                StoreError::QueryFailed(format!("Failed to count subscriptions: {}", e))
            })?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to read count row: {}", e)))?
        {
            Some(row) => {
                let count: i64 = row.get(0).map_err(|e| {
                    StoreError::QueryFailed(format!("Failed to get count: {}", e))
                })?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }

    pub async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(self.db.health_check().await?)
    }
}
