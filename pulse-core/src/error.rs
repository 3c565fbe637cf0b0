use thiserror::Error;

use crate::models::session::SessionStatus;
use crate::store::StoreError;

/// Errors surfaced by the session registry and metrics aggregator.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid session transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True when the requested session key was absent from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Other error: {0}")]
    Other(String),
}
