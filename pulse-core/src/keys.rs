//! Key layout for the backing store.
//!
//! - `session:<sessionID>`: serialized [`Session`](crate::Session)
//! - `user:<userID>:sessions`: set of session IDs owned by a user
//! - `agent:<agentID>:metrics:<YYYY-MM-DD>:<hour>`: hourly counter hash
//! - `agent:<agentID>:users:<YYYY-MM-DD>:<hour>`: hourly unique-user set

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

pub const SESSION_KEY_PREFIX: &str = "session:";
pub const SESSION_ID_PREFIX: &str = "sess_";

pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

pub fn user_sessions_key(user_id: &str) -> String {
    format!("user:{}:sessions", user_id)
}

/// Fresh session ID, `sess_` followed by a simple-format v4 UUID.
pub fn new_session_id() -> String {
    format!("{}{}", SESSION_ID_PREFIX, uuid::Uuid::new_v4().simple())
}

/// One UTC calendar hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId {
    pub date: NaiveDate,
    pub hour: u32,
}

impl BucketId {
    pub fn at(ts: DateTime<Utc>) -> Self {
        Self {
            date: ts.date_naive(),
            hour: ts.hour(),
        }
    }

    /// Bucket `hours_ago` hours before the one containing `now`.
    pub fn hours_before(now: DateTime<Utc>, hours_ago: u32) -> Self {
        Self::at(now - Duration::hours(i64::from(hours_ago)))
    }

    pub fn start(&self) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.hour, 0, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&self.date.and_time(time))
    }

    pub fn metrics_key(&self, agent_id: &str) -> String {
        format!("agent:{}:metrics:{}:{}", agent_id, self.date.format("%Y-%m-%d"), self.hour)
    }

    pub fn users_key(&self, agent_id: &str) -> String {
        format!("agent:{}:users:{}:{}", agent_id, self.date.format("%Y-%m-%d"), self.hour)
    }
}
