//! Session registry: live agent-interaction sessions held in the store.
//!
//! Each session is one serialized record under `session:<id>` with a sliding
//! TTL: every write resets it to the full window, and a session nobody
//! touches for that long simply disappears. Enumeration by user goes through
//! a per-user ID set (`user:<id>:sessions`) or, in scan mode, a walk over
//! every `session:` key.
//!
//! Read-modify-write sequences (`end_session`, `touch_session`) carry no
//! concurrency token: two writers racing on one session resolve last-write-wins.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{SessionConfig, SessionIndexMode};
use crate::error::EngineError;
use crate::keys;
use crate::models::session::{Session, SessionStatus};
use crate::store::{bounded, KvStore};

pub struct SessionRegistry {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    index: SessionIndexMode,
    op_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: &SessionConfig,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            ttl: config.ttl(),
            index: config.index,
            op_timeout,
        }
    }

    /// Store a new session. Assigns an ID if none was given, forces the
    /// status to active and stamps both timestamps. An existing record under
    /// the same ID is overwritten.
    pub async fn create_session(&self, mut session: Session) -> Result<Session, EngineError> {
        if session.id.is_empty() {
            session.id = keys::new_session_id();
        }
        let now = self.clock.now();
        session.status = SessionStatus::Active;
        session.started_at = now;
        session.last_active_at = now;

        self.persist(&session).await?;

        tracing::debug!(
            session_id = %session.id,
            user_id = %session.user_id,
            agent_id = %session.agent_id,
            "Session created"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, EngineError> {
        let key = keys::session_key(session_id);
        let raw = bounded(self.op_timeout, self.store.get(&key)).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(EngineError::NotFound(session_id.to_string())),
        }
    }

    /// Re-stamp `last_active_at` and rewrite the record with a fresh TTL.
    pub async fn update_session(&self, mut session: Session) -> Result<Session, EngineError> {
        session.last_active_at = self.clock.now();
        self.persist(&session).await?;
        Ok(session)
    }

    /// Refresh a live session's expiry without changing anything else.
    pub async fn touch_session(&self, session_id: &str) -> Result<Session, EngineError> {
        let session = self.get_session(session_id).await?;
        self.update_session(session).await
    }

    /// Move a session into a terminal status.
    ///
    /// Ending a session that already holds the requested status is a no-op;
    /// any other transition out of a terminal status, or "ending" into
    /// `Active`, is rejected.
    pub async fn end_session(&self, session_id: &str, status: SessionStatus) -> Result<Session, EngineError> {
        let mut session = self.get_session(session_id).await?;

        if session.status == status && status.is_terminal() {
            return Ok(session);
        }
        if session.status.is_terminal() || !status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id: session_id.to_string(),
                from: session.status,
                to: status,
            });
        }

        session.status = status;
        let session = self.update_session(session).await?;
        tracing::debug!(session_id = %session_id, status = %status, "Session ended");
        Ok(session)
    }

    /// Remove a session. Absent sessions are not an error.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), EngineError> {
        let owner = match self.get_session(session_id).await {
            Ok(session) => Some(session.user_id),
            Err(EngineError::NotFound(_)) => None,
            // A record we cannot decode is still deleted.
            Err(EngineError::Serialization(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Deleting undecodable session record");
                None
            }
            Err(e) => return Err(e),
        };

        bounded(self.op_timeout, self.store.del(&keys::session_key(session_id))).await?;

        if let (Some(user_id), SessionIndexMode::UserIndex) = (owner, self.index) {
            bounded(
                self.op_timeout,
                self.store.srem(&keys::user_sessions_key(&user_id), session_id),
            )
            .await?;
        }
        Ok(())
    }

    /// Sessions for `user_id` whose status is still active.
    pub async fn get_active_sessions(&self, user_id: &str) -> Result<Vec<Session>, EngineError> {
        let sessions = match self.index {
            SessionIndexMode::UserIndex => self.sessions_from_index(user_id).await?,
            SessionIndexMode::Scan => self.sessions_from_scan().await?,
        };

        let mut active: Vec<Session> = sessions
            .into_iter()
            .filter(|s| s.user_id == user_id && s.status == SessionStatus::Active)
            .collect();
        active.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(active)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Write the record, then bring the per-user index along. The two writes
    /// are separate commands: if the second fails the session is stored but
    /// not yet listed, which the next update repairs.
    async fn persist(&self, session: &Session) -> Result<(), EngineError> {
        let raw = serde_json::to_string(session)?;
        bounded(
            self.op_timeout,
            self.store.set_ex(&keys::session_key(&session.id), &raw, self.ttl),
        )
        .await?;

        if self.index == SessionIndexMode::UserIndex {
            let index_key = keys::user_sessions_key(&session.user_id);
            bounded(self.op_timeout, self.store.sadd(&index_key, &session.id)).await?;
            bounded(self.op_timeout, self.store.expire(&index_key, self.ttl)).await?;
        }
        Ok(())
    }

    async fn sessions_from_index(&self, user_id: &str) -> Result<Vec<Session>, EngineError> {
        let index_key = keys::user_sessions_key(user_id);
        let ids = bounded(self.op_timeout, self.store.smembers(&index_key)).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_session(&id).await {
                Ok(session) => sessions.push(session),
                Err(EngineError::NotFound(_)) => {
                    // Expired underneath the index.
                    bounded(self.op_timeout, self.store.srem(&index_key, &id)).await?;
                }
                Err(EngineError::Serialization(e)) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping undecodable session record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    async fn sessions_from_scan(&self) -> Result<Vec<Session>, EngineError> {
        let session_keys = bounded(
            self.op_timeout,
            self.store.keys_with_prefix(keys::SESSION_KEY_PREFIX),
        )
        .await?;

        let mut sessions = Vec::with_capacity(session_keys.len());
        for key in session_keys {
            let Some(raw) = bounded(self.op_timeout, self.store.get(&key)).await? else {
                continue;
            };
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping undecodable session record"),
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn registry(index: SessionIndexMode) -> (Arc<ManualClock>, SessionRegistry) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(clock.clone()));
        let config = SessionConfig {
            ttl_hours: 24,
            index,
        };
        let registry = SessionRegistry::new(store, clock.clone(), &config, Duration::from_secs(1));
        (clock, registry)
    }

    #[tokio::test]
    async fn test_create_assigns_prefixed_id_and_forces_active() {
        let (clock, registry) = registry(SessionIndexMode::UserIndex);
        let mut draft = Session::new("u1", "a1", "conn-1");
        draft.status = SessionStatus::Ended;

        let session = registry.create_session(draft).await.unwrap();
        assert!(session.id.starts_with(keys::SESSION_ID_PREFIX));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.started_at, clock.now());
        assert_eq!(session.last_active_at, clock.now());

        let fetched = registry.get_session(&session.id).await.unwrap();
        assert_eq!(fetched, session);
    }

    #[tokio::test]
    async fn test_caller_supplied_id_is_kept_and_overwrites() {
        let (_clock, registry) = registry(SessionIndexMode::UserIndex);
        registry
            .create_session(Session::new("u1", "a1", "conn-1").with_id("custom-1"))
            .await
            .unwrap();
        registry
            .create_session(Session::new("u1", "a2", "conn-2").with_id("custom-1"))
            .await
            .unwrap();

        let fetched = registry.get_session("custom-1").await.unwrap();
        assert_eq!(fetched.agent_id, "a2");
        assert_eq!(registry.get_active_sessions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_session_is_not_found() {
        let (_clock, registry) = registry(SessionIndexMode::UserIndex);
        let err = registry.get_session("does-not-exist").await.unwrap_err();
        assert!(err.is_not_found(), "expected NotFound, got {:?}", err);
    }

    #[tokio::test]
    async fn test_update_slides_expiry() {
        let (clock, registry) = registry(SessionIndexMode::UserIndex);
        let session = registry.create_session(Session::new("u1", "a1", "c")).await.unwrap();

        clock.advance(chrono::Duration::hours(20));
        registry.touch_session(&session.id).await.unwrap();

        clock.advance(chrono::Duration::hours(20));
        let fetched = registry.get_session(&session.id).await.unwrap();
        assert_eq!(fetched.last_active_at, clock.now() - chrono::Duration::hours(20));

        clock.advance(chrono::Duration::hours(5));
        assert!(registry.get_session(&session.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_end_session_transitions() {
        let (_clock, registry) = registry(SessionIndexMode::UserIndex);
        let session = registry.create_session(Session::new("u1", "a1", "c")).await.unwrap();

        let ended = registry.end_session(&session.id, SessionStatus::Ended).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        // Same terminal status again is a no-op.
        let again = registry.end_session(&session.id, SessionStatus::Ended).await.unwrap();
        assert_eq!(again.status, SessionStatus::Ended);

        let err = registry.end_session(&session.id, SessionStatus::Error).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_end_session_rejects_active_target() {
        let (_clock, registry) = registry(SessionIndexMode::UserIndex);
        let session = registry.create_session(Session::new("u1", "a1", "c")).await.unwrap();
        let err = registry.end_session(&session.id, SessionStatus::Active).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_end_missing_session_is_not_found() {
        let (_clock, registry) = registry(SessionIndexMode::UserIndex);
        let err = registry.end_session("gone", SessionStatus::Ended).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_clock, registry) = registry(SessionIndexMode::UserIndex);
        let session = registry.create_session(Session::new("u1", "a1", "c")).await.unwrap();

        registry.delete_session(&session.id).await.unwrap();
        registry.delete_session(&session.id).await.unwrap();
        assert!(registry.get_session(&session.id).await.unwrap_err().is_not_found());
        assert!(registry.get_active_sessions("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_sessions_filter_user_and_status() {
        for mode in [SessionIndexMode::UserIndex, SessionIndexMode::Scan] {
            let (_clock, registry) = registry(mode);
            let s1 = registry.create_session(Session::new("u1", "a1", "c1")).await.unwrap();
            let s2 = registry.create_session(Session::new("u1", "a2", "c2")).await.unwrap();
            registry.create_session(Session::new("u2", "a1", "c3")).await.unwrap();
            registry.end_session(&s2.id, SessionStatus::Error).await.unwrap();

            let active = registry.get_active_sessions("u1").await.unwrap();
            assert_eq!(active.len(), 1, "mode {:?}", mode);
            assert_eq!(active[0].id, s1.id);
        }
    }

    #[tokio::test]
    async fn test_custom_id_visible_in_both_modes() {
        for mode in [SessionIndexMode::UserIndex, SessionIndexMode::Scan] {
            let (_clock, registry) = registry(mode);
            registry
                .create_session(Session::new("u1", "a1", "c1").with_id("bridge-42"))
                .await
                .unwrap();
            let active = registry.get_active_sessions("u1").await.unwrap();
            assert_eq!(active.len(), 1, "mode {:?}", mode);
            assert_eq!(active[0].id, "bridge-42");
        }
    }

    #[tokio::test]
    async fn test_expired_sessions_drop_out_of_index() {
        let (clock, registry) = registry(SessionIndexMode::UserIndex);
        let old = registry.create_session(Session::new("u1", "a1", "c1")).await.unwrap();

        clock.advance(chrono::Duration::hours(23));
        let fresh = registry.create_session(Session::new("u1", "a1", "c2")).await.unwrap();

        clock.advance(chrono::Duration::hours(2));
        let active = registry.get_active_sessions("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh.id);
        assert!(registry.get_session(&old.id).await.unwrap_err().is_not_found());
    }
}
