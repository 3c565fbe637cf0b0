//! Agent directory: who owns an agent.
//!
//! The relational agent catalogue lives outside this service; the façade only
//! needs one question answered, so the seam is a single-method trait.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Developer user ID owning `agent_id`, or `None` for unknown agents.
    async fn owner_of(&self, agent_id: &str) -> anyhow::Result<Option<String>>;
}

/// Reads `agents(id, developer_id)`.
pub struct PgAgentDirectory {
    pool: PgPool,
}

impl PgAgentDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentDirectory for PgAgentDirectory {
    async fn owner_of(&self, agent_id: &str) -> anyhow::Result<Option<String>> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT developer_id::text FROM agents WHERE id::text = $1")
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(owner)
    }
}

/// Fixed ownership map, from config or tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    owners: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new(owners: HashMap<String, String>) -> Self {
        Self { owners }
    }
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn owner_of(&self, agent_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.owners.get(agent_id).cloned())
    }
}
