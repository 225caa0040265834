use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Opens the shared pool and brings the schema up to date.
/// Either failure is fatal for the process.
pub async fn connect(config: &DbConfig) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
        .with_context(|| format!("connect to database at {}", config.redacted()))?;
    info!(database = %config.redacted(), "connected to database");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run database migrations")?;
    info!("database migrations applied");

    Ok(db)
}
