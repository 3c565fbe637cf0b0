use std::sync::Arc;

use crate::clock::Clock;
use crate::config::PulseConfig;
use crate::metrics::MetricsAggregator;
use crate::sessions::SessionRegistry;
use crate::store::KvStore;

/// Session registry and metrics aggregator over one shared store.
pub struct Engine {
    pub sessions: SessionRegistry,
    pub metrics: MetricsAggregator,
    store: Arc<dyn KvStore>,
}

impl Engine {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &PulseConfig) -> Self {
        let op_timeout = config.store.op_timeout();
        Self {
            sessions: SessionRegistry::new(store.clone(), clock.clone(), &config.sessions, op_timeout),
            metrics: MetricsAggregator::new(store.clone(), clock, &config.metrics, op_timeout),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}
