//! Database layer for the hub.
//!
//! Thin wrapper around libSQL providing:
//! - In-memory or local file-backed databases
//! - Schema migrations with version tracking
//! - Health check capability for the `/health` endpoint
//!
//! In-memory databases keep a single persistent connection, since every
//! fresh connection to `:memory:` would see an empty database.

mod migrations;

use libsql::{Connection, Database as LibSqlDatabase};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub use migrations::{Migration, MigrationRunner};

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Internal database error: {0}")]
    Internal(#[from] libsql::Error),
}

/// Wrapper around a libSQL database handle
#[derive(Clone)]
pub struct Database {
    db: Arc<LibSqlDatabase>,
    /// Held open for the lifetime of in-memory databases.
    persistent: Option<Arc<Mutex<Connection>>>,
    name: String,
}

impl Database {
    /// Create a new in-memory database
    #[instrument(skip_all)]
    pub async fn in_memory(name: &str) -> Result<Self, DatabaseError> {
        debug!("Creating in-memory database: {}", name);
        let db = libsql::Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        Ok(Self {
            db: Arc::new(db),
            persistent: Some(Arc::new(Mutex::new(conn))),
            name: name.to_string(),
        })
    }

    /// Create or open a local file-based database
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_local(name: &str, path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        debug!("Opening local database '{}' at: {:?}", name, path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                ))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await?;

        info!("Opened database '{}' at {:?}", name, path);
        Ok(Self {
            db: Arc::new(db),
            persistent: None,
            name: name.to_string(),
        })
    }

    /// Get a connection to the database
    pub fn connect(&self) -> Result<Connection, DatabaseError> {
        Ok(self.db.connect()?)
    }

    /// The shared connection of an in-memory database, if any
    pub fn persistent_connection(&self) -> Option<Arc<Mutex<Connection>>> {
        self.persistent.clone()
    }

    /// Get the database name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the database is healthy by executing a simple query
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn health_check(&self) -> Result<bool, DatabaseError> {
        let result = if let Some(persistent) = self.persistent_connection() {
            let conn = persistent.lock().await;
            conn.query("SELECT 1", ()).await
        } else {
            let conn = self.connect()?;
            conn.query("SELECT 1", ()).await
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Database health check failed: {}", e);
                Ok(false)
            }
        }
    }
}
