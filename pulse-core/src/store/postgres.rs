use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;

use super::{KvStore, StoreError};

/// Store backed by the `pulse_keys` tables (see [`crate::db::ensure_schema`]).
///
/// Postgres has no per-key expiry, so every read filters on `expires_at`,
/// every write first drops its key if it has already expired, and
/// `purge_expired` (driven by the server's sweeper) deletes the rest.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn drop_if_expired(tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM pulse_keys WHERE key = $1 AND expires_at IS NOT NULL AND expires_at <= now()")
            .bind(key)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Create the key row for a hash or set if it does not exist, and check
    /// that an existing row holds the same kind.
    async fn ensure_key(tx: &mut Transaction<'_, Postgres>, key: &str, kind: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO pulse_keys (key, kind) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(kind)
            .execute(&mut **tx)
            .await?;

        let existing: String = sqlx::query_scalar("SELECT kind FROM pulse_keys WHERE key = $1")
            .bind(key)
            .fetch_one(&mut **tx)
            .await?;
        if existing != kind {
            return Err(StoreError::WrongType(key.to_string()));
        }
        Ok(())
    }
}

fn ttl_secs(ttl: Duration) -> f64 {
    ttl.as_secs_f64()
}

#[async_trait]
impl KvStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT kind, value FROM pulse_keys
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some((kind, value)) if kind == "string" => Ok(value),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        // The upsert takes the row lock, so concurrent writers to one key
        // queue behind each other and the last commit wins.
        sqlx::query(
            r#"
            INSERT INTO pulse_keys (key, kind, value, expires_at)
            VALUES ($1, 'string', $2, now() + make_interval(secs => $3))
            ON CONFLICT (key)
            DO UPDATE SET kind = 'string', value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .execute(&mut *tx)
        .await?;
        // A key that previously held a hash or set loses its members.
        sqlx::query("DELETE FROM pulse_hash_fields WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pulse_set_members WHERE key = $1")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pulse_keys WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT key FROM pulse_keys
            WHERE left(key, char_length($1)) = $1
              AND (expires_at IS NULL OR expires_at > now())
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::drop_if_expired(&mut tx, key).await?;
        Self::ensure_key(&mut tx, key, "hash").await?;

        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pulse_hash_fields (key, field, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (key, field)
            DO UPDATE SET value = pulse_hash_fields.value + EXCLUDED.value
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT f.field, f.value
            FROM pulse_hash_fields f
            JOIN pulse_keys k ON k.key = f.key
            WHERE f.key = $1 AND (k.expires_at IS NULL OR k.expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::drop_if_expired(&mut tx, key).await?;
        Self::ensure_key(&mut tx, key, "set").await?;

        let result = sqlx::query(
            "INSERT INTO pulse_set_members (key, member) VALUES ($1, $2) ON CONFLICT (key, member) DO NOTHING",
        )
        .bind(key)
        .bind(member)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pulse_set_members WHERE key = $1 AND member = $2")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let members: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT m.member
            FROM pulse_set_members m
            JOIN pulse_keys k ON k.key = m.key
            WHERE m.key = $1 AND (k.expires_at IS NULL OR k.expires_at > now())
            ORDER BY m.member
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pulse_keys
            SET expires_at = now() + make_interval(secs => $2)
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .bind(ttl_secs(ttl))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM pulse_keys WHERE expires_at IS NOT NULL AND expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
