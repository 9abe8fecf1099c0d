//! Schema migrations for the hub database
//!
//! Migrations are embedded SQL, applied in version order and tracked in a
//! `_migrations` table so that re-running on an existing database is a no-op.

use super::Database;
use super::DatabaseError;
use tracing::{debug, info, instrument};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number (must be unique and incrementing)
    pub version: i64,
    /// Description of what this migration does
    pub description: String,
    /// SQL to execute for the migration
    pub sql: &'static str,
}

/// Hub schema migrations (topics, subscriptions)
pub mod hub {
    use super::Migration;

    /// Initial hub schema - topic registry and subscriptions
    pub const V0001_INITIAL_SCHEMA: &str = r#"
-- Topics the hub brokers. Rows are created by provisioning (config seed),
-- never by the subscription protocol itself.
CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_topics_url ON topics(url);

-- Active subscriptions. At most one row per (topic, callback); a repeated
-- successful subscribe overwrites secret and expiry in place.
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic_id INTEGER NOT NULL,
    callback TEXT NOT NULL,
    secret TEXT,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(topic_id, callback),
    FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_topic_id ON subscriptions(topic_id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_expires_at ON subscriptions(expires_at);
"#;

    /// Get all hub migrations in order
    pub fn all() -> Vec<Migration> {
        vec![Migration {
            version: 1,
            description: "Initial hub schema".to_string(),
            sql: V0001_INITIAL_SCHEMA,
        }]
    }
}

/// Migration runner for applying migrations to a database
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Create a new migration runner with the given migrations
    pub fn new(migrations: Vec<Migration>) -> Self {
        let mut sorted = migrations;
        sorted.sort_by_key(|m| m.version);
        Self { migrations: sorted }
    }

    /// Create a runner for the hub database migrations
    pub fn hub() -> Self {
        Self::new(hub::all())
    }

    /// Run all pending migrations on the database
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn run(&self, db: &Database) -> Result<Vec<i64>, DatabaseError> {
        // In-memory databases must be migrated through their one shared
        // connection or the schema would land in a throwaway database.
        if let Some(persistent) = db.persistent_connection() {
            let conn = persistent.lock().await;
            self.run_with_connection(&conn).await
        } else {
            let conn = db.connect()?;
            self.run_with_connection(&conn).await
        }
    }

    async fn run_with_connection(
        &self,
        conn: &libsql::Connection,
    ) -> Result<Vec<i64>, DatabaseError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to create migrations table: {}", e))
        })?;

        let mut applied: Vec<i64> = Vec::new();
        let mut rows = conn
            .query("SELECT version FROM _migrations ORDER BY version", ())
            .await
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to query migrations: {}", e))
            })?;

        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to read migration row: {}", e))
        })? {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to get version from row: {}", e))
            })?;
            applied.push(version);
        }

        debug!("Already applied migrations: {:?}", applied);

        let mut newly_applied = Vec::new();
        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                debug!("Skipping already applied migration v{}", migration.version);
                continue;
            }

            info!(
                "Applying migration v{}: {}",
                migration.version, migration.description
            );

            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Migration v{} failed: {}",
                    migration.version, e
                ))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (?, ?)",
                (migration.version, migration.description.as_str()),
            )
            .await
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                ))
            })?;

            newly_applied.push(migration.version);
            info!("Applied migration v{}", migration.version);
        }

        if newly_applied.is_empty() {
            debug!("No new migrations to apply");
        }

        Ok(newly_applied)
    }
}
