use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Key-space tables for the Postgres-backed store. Expiry lives on
/// `pulse_keys`; hash fields and set members cascade with their key.
const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS pulse_keys (
        key        TEXT PRIMARY KEY,
        kind       TEXT NOT NULL,
        value      TEXT,
        expires_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS pulse_keys_expires_at_idx ON pulse_keys (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS pulse_hash_fields (
        key   TEXT NOT NULL REFERENCES pulse_keys (key) ON DELETE CASCADE,
        field TEXT NOT NULL,
        value BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (key, field)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pulse_set_members (
        key    TEXT NOT NULL REFERENCES pulse_keys (key) ON DELETE CASCADE,
        member TEXT NOT NULL,
        PRIMARY KEY (key, member)
    )
    "#,
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let retry_strategy = ExponentialBackoff::from_millis(250)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(config.connect_retries);

    Retry::spawn(retry_strategy, || async {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Postgres connection attempt failed");
                e
            })
    })
    .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create the store tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
