//! Database layer for TenderWatch
//!
//! Provides:
//! - The `Store` persistence boundary
//! - SeaORM entity models and the Postgres `Repository`
//! - An in-memory `MemoryStore` with the same constraints
//! - Connection pool management and migrations

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use store::Store;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Primary for writes and an optional read replica. Reads fall back to the
/// primary, so a single-node deployment needs no extra config.
#[derive(Clone)]
pub struct DbPool {
    pub primary: DatabaseConnection,
    pub replica: Option<DatabaseConnection>,
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections.min(config.max_connections))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(true);
    opts
}

async fn connect(role: &str, url: &str, config: &DatabaseConfig) -> Result<DatabaseConnection> {
    info!(role, "Connecting to database...");
    Database::connect(connect_options(url, config))
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("{} connection failed: {}", role, e),
        })
}

impl DbPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let primary = connect("primary", &config.url, config).await?;
        let replica = match config.read_url.as_deref() {
            Some(url) if url != config.url => Some(connect("replica", url, config).await?),
            _ => None,
        };

        info!(replica = replica.is_some(), "Database connections established");
        Ok(Self { primary, replica })
    }

    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Apply the SQL migrations under `migrations/` on the primary.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::migrate!("../../migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Migration failed: {}", e),
            })?;

        info!("Database migrations applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://tenderwatch@localhost/tenderwatch".into(),
            read_url: None,
            max_connections: 4,
            min_connections: 10,
            connect_timeout_secs: 3,
            idle_timeout_secs: 60,
            run_migrations: false,
        }
    }

    #[test]
    fn test_connect_options_follow_config() {
        let config = config();
        let opts = connect_options(&config.url, &config);
        assert_eq!(opts.get_url(), config.url);
        assert_eq!(opts.get_max_connections(), Some(4));
        // Never more idle connections than the pool may hold
        assert_eq!(opts.get_min_connections(), Some(4));
        assert_eq!(opts.get_connect_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(opts.get_idle_timeout(), Some(Duration::from_secs(60)));
    }
}
