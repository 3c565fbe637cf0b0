//! Metrics aggregator: hourly per-agent counters with sliding retention.
//!
//! Every counter write lands in the bucket for the current UTC hour as two
//! store commands: an atomic field increment, then a TTL refresh on the
//! bucket. They are not transactional. If the refresh is lost the bucket
//! keeps its previous expiry; nothing is retried or queued here.
//!
//! `track_unique_user` couples a set-add with a counter increment the same
//! way. A failure between the two leaves the user in the set without the
//! counter bump, so that user is undercounted for the hour.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::MetricsConfig;
use crate::error::EngineError;
use crate::keys::BucketId;
use crate::models::metrics::{MetricField, MetricsBucket};
use crate::store::{bounded, KvStore};

/// Hours in the seven-day rollup window.
pub const SEVEN_DAYS_HOURS: u32 = 168;

pub struct MetricsAggregator {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    op_timeout: Duration,
}

impl MetricsAggregator {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: &MetricsConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            retention: config.retention(),
            op_timeout,
        }
    }

    fn current_bucket(&self) -> BucketId {
        BucketId::at(self.clock.now())
    }

    /// Add `delta` to `field` in the current hour's bucket and refresh the
    /// bucket's retention. Returns the field's new value.
    pub async fn increment_metric(
        &self,
        agent_id: &str,
        field: MetricField,
        delta: u32,
    ) -> Result<i64, EngineError> {
        let key = self.current_bucket().metrics_key(agent_id);
        self.increment_key(&key, field, delta).await
    }

    async fn increment_key(&self, key: &str, field: MetricField, delta: u32) -> Result<i64, EngineError> {
        let value = bounded(
            self.op_timeout,
            self.store.hincr_by(key, field.as_str(), i64::from(delta)),
        )
        .await?;
        bounded(self.op_timeout, self.store.expire(key, self.retention)).await?;
        Ok(value)
    }

    pub async fn increment_sessions(&self, agent_id: &str) -> Result<i64, EngineError> {
        self.increment_metric(agent_id, MetricField::Sessions, 1).await
    }

    pub async fn increment_utterances(&self, agent_id: &str) -> Result<i64, EngineError> {
        self.increment_metric(agent_id, MetricField::Utterances, 1).await
    }

    pub async fn increment_responses(&self, agent_id: &str) -> Result<i64, EngineError> {
        self.increment_metric(agent_id, MetricField::Responses, 1).await
    }

    pub async fn increment_errors(&self, agent_id: &str) -> Result<i64, EngineError> {
        self.increment_metric(agent_id, MetricField::ErrorCount, 1).await
    }

    pub async fn increment_new_installs(&self, agent_id: &str) -> Result<i64, EngineError> {
        self.increment_metric(agent_id, MetricField::NewInstalls, 1).await
    }

    pub async fn increment_uninstalls(&self, agent_id: &str) -> Result<i64, EngineError> {
        self.increment_metric(agent_id, MetricField::Uninstalls, 1).await
    }

    /// Record `user_id` as seen this hour. Returns `true` when the user was
    /// new to the bucket and the unique-user counter was bumped.
    pub async fn track_unique_user(&self, agent_id: &str, user_id: &str) -> Result<bool, EngineError> {
        let bucket = self.current_bucket();
        let users_key = bucket.users_key(agent_id);

        let added = bounded(self.op_timeout, self.store.sadd(&users_key, user_id)).await?;
        bounded(self.op_timeout, self.store.expire(&users_key, self.retention)).await?;

        if added {
            self.increment_key(&bucket.metrics_key(agent_id), MetricField::UniqueUsers, 1)
                .await?;
        }
        Ok(added)
    }

    /// Accumulate one latency sample into the current bucket.
    pub async fn record_latency(&self, agent_id: &str, latency_ms: u32) -> Result<(), EngineError> {
        let key = self.current_bucket().metrics_key(agent_id);
        bounded(
            self.op_timeout,
            self.store.hincr_by(&key, MetricField::TotalLatencyMs.as_str(), i64::from(latency_ms)),
        )
        .await?;
        bounded(
            self.op_timeout,
            self.store.hincr_by(&key, MetricField::LatencyCount.as_str(), 1),
        )
        .await?;
        bounded(self.op_timeout, self.store.expire(&key, self.retention)).await?;
        Ok(())
    }

    /// Buckets for the last `hours` hours, most recent first. Hours with no
    /// data are skipped, not zero-filled. Any store error aborts the read.
    pub async fn get_metrics(&self, agent_id: &str, hours: u32) -> Result<Vec<MetricsBucket>, EngineError> {
        let now = self.clock.now();
        let mut buckets = Vec::new();

        for i in 0..hours {
            let bucket = BucketId::hours_before(now, i);
            let fields = bounded(self.op_timeout, self.store.hgetall(&bucket.metrics_key(agent_id))).await?;
            if fields.is_empty() {
                continue;
            }
            buckets.push(MetricsBucket::from_fields(agent_id, bucket, &fields));
        }

        tracing::debug!(
            agent_id = %agent_id,
            hours,
            buckets = buckets.len(),
            "Metrics window read"
        );
        Ok(buckets)
    }

    pub async fn get_metrics_for_last_7_days(&self, agent_id: &str) -> Result<Vec<MetricsBucket>, EngineError> {
        self.get_metrics(agent_id, SEVEN_DAYS_HOURS).await
    }
}
