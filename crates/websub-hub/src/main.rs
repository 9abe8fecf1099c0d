use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod config;
mod db;
mod hub;
mod server;
mod store;
mod telemetry;

use config::HubConfig;
use db::{Database, MigrationRunner};
use store::{MemoryStore, SqliteStore, Store};

/// WebSub hub - brokers publish/subscribe relationships between topic
/// publishers and subscriber callbacks
#[derive(Parser)]
#[command(name = "websub-hub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Database file (overrides the config file; in-memory when absent
    /// everywhere)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Topic URL to seed into the registry (repeatable, merged with
    /// configured topics)
    #[arg(short, long = "topic")]
    topics: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let cli = Cli::parse();
    let mut config = HubConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(db) = cli.db {
        config.database.path = Some(db);
    }
    config.topics.extend(cli.topics);

    info!("WebSub hub starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = match &config.database.path {
        Some(path) => {
            let db = Database::open_local("hub", path).await?;
            MigrationRunner::hub()
                .run(&db)
                .await
                .context("Failed to migrate hub database")?;
            Store::Sqlite(SqliteStore::new(db)?)
        }
        None => {
            info!("No database path configured; subscriptions will not survive a restart");
            Store::Memory(MemoryStore::default())
        }
    };

    for topic in &config.topics {
        let id = store
            .add_topic(topic)
            .await
            .with_context(|| format!("Failed to register topic {topic}"))?;
        info!(topic = %topic, id = id.0, "topic available for subscription");
    }

    server::start(&config, store).await?;

    Ok(())
}
