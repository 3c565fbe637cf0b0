pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod keys;
pub mod metrics;
pub mod models;
pub mod sessions;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PulseConfig;
pub use engine::Engine;
pub use error::{EngineError, PulseError};
pub use metrics::MetricsAggregator;
pub use models::metrics::{MetricField, MetricsBucket};
pub use models::session::{Session, SessionStatus};
pub use sessions::SessionRegistry;
pub use store::{create_store, KvStore, MemoryStore, PgStore, StoreError};
