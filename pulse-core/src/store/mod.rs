//! Backing key-value store for sessions and metrics.
//!
//! Provides a `KvStore` trait with implementations for:
//! - **Memory**: in-process map with lazily evaluated per-key expiry
//! - **Postgres**: `pulse_keys` tables with an `expires_at` column; expired
//!   keys are hidden on read and removed by the sweeper

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::{PulseConfig, StoreBackend};
use crate::error::PulseError;

// ============================================================================
// KvStore trait
// ============================================================================

/// TTL-capable key-value store. Single-key operations are atomic; nothing
/// spans keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value with a TTL, replacing whatever the key held.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a key. Absent keys are not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically add `delta` to a hash field, creating key and field as
    /// needed. Returns the new value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// All fields of a hash. Empty when the key is absent or expired.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, i64>, StoreError>;

    /// Add a set member. Returns `true` only if the member was not present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Reset a key's TTL. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Physically remove expired keys. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    /// Connectivity check; returns a backend description.
    async fn ping(&self) -> Result<String, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Run a store operation under a deadline.
pub async fn bounded<T, F>(timeout: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Create the configured store backend. The Postgres backend connects,
/// retrying with backoff, and creates its tables.
pub async fn create_store(
    config: &PulseConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn KvStore>, PulseError> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(clock))),
        StoreBackend::Postgres => {
            let db = config.database.as_ref().ok_or_else(|| {
                PulseError::Other("store.backend = \"postgres\" requires a [database] section".to_string())
            })?;
            let pool = crate::db::create_pool(db).await?;
            crate::db::ensure_schema(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), StoreError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(StoreError::Timeout(d)) => assert_eq!(d, Duration::from_millis(10)),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let result = bounded(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_postgres_backend_requires_database_section() {
        let mut config = PulseConfig::in_memory("/tmp/pulse-test.sock");
        config.store.backend = StoreBackend::Postgres;
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let result = create_store(&config, clock).await;
        assert!(matches!(result, Err(PulseError::Other(_))));
    }
}
