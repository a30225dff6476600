//! Database initialization

use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::Config;

/// Create the Postgres connection pool
pub async fn init_database(config: &Config) -> Result<PgPool> {
    let db = &config.database;
    anyhow::ensure!(!db.url.is_empty(), "database.url is not configured");

    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(Duration::from_secs(db.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(db.idle_timeout_seconds))
        .connect(&db.url)
        .await?;

    info!(
        max_connections = db.max_connections,
        "Database pool initialized"
    );
    Ok(pool)
}
