use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct PulseConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

impl ServiceConfig {
    /// Socket path with `~` and environment variables expanded.
    pub fn expanded_socket_path(&self) -> String {
        self.socket_path_with(|| std::env::var("HOME").ok(), |name| std::env::var(name).ok())
    }

    /// Expansion against an explicit home directory and variable lookup.
    /// Unknown variables leave the path as written.
    pub fn socket_path_with<H, V>(&self, home: H, var: V) -> String
    where
        H: FnOnce() -> Option<String>,
        V: Fn(&str) -> Option<String>,
    {
        shellexpand::full_with_context(
            &self.socket_path,
            home,
            |name: &str| Ok::<_, std::convert::Infallible>(var(name)),
        )
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| self.socket_path.clone())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub op_timeout_ms: u64,
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            op_timeout_ms: 2_000,
            sweep_interval_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: usize,
}

fn default_connect_retries() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionIndexMode {
    /// Per-user set of session IDs kept next to each session record.
    #[default]
    UserIndex,
    /// Full scan of the `session:` key space.
    Scan,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub ttl_hours: u64,
    #[serde(default)]
    pub index: SessionIndexMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            index: SessionIndexMode::UserIndex,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub retention_days: u64,
    pub default_window_hours: u32,
    pub max_window_hours: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            default_window_hours: 24,
            max_window_hours: 168,
        }
    }
}

impl MetricsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 86_400)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

/// Agent ownership used when no database-backed directory is configured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DirectoryConfig {
    /// agent_id -> developer user_id
    #[serde(default)]
    pub owners: HashMap<String, String>,
}

impl PulseConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// Minimal in-memory configuration, used by tests and local tooling.
    pub fn in_memory(socket_path: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig {
                socket_path: socket_path.into(),
                log_level: "info".to_string(),
            },
            store: StoreConfig::default(),
            database: None,
            sessions: SessionConfig::default(),
            metrics: MetricsConfig::default(),
            http: HttpConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}
