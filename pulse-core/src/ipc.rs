use serde::{Deserialize, Deserializer, Serialize};

use crate::models::session::SessionStatus;

/// Messages accepted on the IPC socket. Writes come from the real-time agent
/// bridge; reads mirror the reporting endpoints.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PulseRequest {
    Ping,
    Health,
    SessionStart {
        user_id: String,
        agent_id: String,
        connection_id: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    SessionEnd {
        session_id: String,
        status: SessionStatus,
    },
    SessionTouch {
        session_id: String,
    },
    SessionDelete {
        session_id: String,
    },
    GetSession {
        session_id: String,
    },
    ActiveSessions {
        user_id: String,
    },
    Utterance {
        agent_id: String,
    },
    Response {
        agent_id: String,
    },
    Error {
        agent_id: String,
    },
    Latency {
        agent_id: String,
        latency_ms: u32,
    },
    UniqueUser {
        agent_id: String,
        user_id: String,
    },
    Install {
        agent_id: String,
    },
    Uninstall {
        agent_id: String,
    },
    Metrics {
        agent_id: String,
        /// Invalid values read as absent so the server default applies.
        #[serde(default, deserialize_with = "lenient_hours")]
        hours: Option<u32>,
    },
    Summary {
        agent_id: String,
    },
}

fn lenient_hours<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let hours = match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(hours)
}

pub const CODE_NOT_FOUND: &str = "not_found";
pub const CODE_INVALID: &str = "invalid";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PulseResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub version: String,
}

impl PulseResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            code: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            code: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagged_by_action() {
        let req: PulseRequest = serde_json::from_value(serde_json::json!({
            "action": "session_end",
            "session_id": "sess_1",
            "status": "ended"
        }))
        .unwrap();
        match req {
            PulseRequest::SessionEnd { session_id, status } => {
                assert_eq!(session_id, "sess_1");
                assert_eq!(status, SessionStatus::Ended);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_session_start_id_optional() {
        let req: PulseRequest = serde_json::from_value(serde_json::json!({
            "action": "session_start",
            "user_id": "u1",
            "agent_id": "a1",
            "connection_id": "c1"
        }))
        .unwrap();
        assert!(matches!(req, PulseRequest::SessionStart { session_id: None, .. }));
    }

    #[test]
    fn test_metrics_hours_is_lenient() {
        let hours = |raw: serde_json::Value| {
            let req: PulseRequest = serde_json::from_value(serde_json::json!({
                "action": "metrics",
                "agent_id": "a1",
                "hours": raw
            }))
            .unwrap();
            match req {
                PulseRequest::Metrics { hours, .. } => hours,
                other => panic!("unexpected request {:?}", other),
            }
        };

        assert_eq!(hours(serde_json::json!(48)), Some(48));
        assert_eq!(hours(serde_json::json!("12")), Some(12));
        assert_eq!(hours(serde_json::json!(-3)), None);
        assert_eq!(hours(serde_json::json!("abc")), None);
        assert_eq!(hours(serde_json::json!(1.5)), None);
        assert_eq!(hours(serde_json::json!([1])), None);
        assert_eq!(hours(serde_json::Value::Null), None);

        let req: PulseRequest =
            serde_json::from_value(serde_json::json!({"action": "metrics", "agent_id": "a1"})).unwrap();
        assert!(matches!(req, PulseRequest::Metrics { hours: None, .. }));
    }

    #[test]
    fn test_not_found_response_carries_code() {
        let resp = PulseResponse::err("Session not found: x").with_code(CODE_NOT_FOUND);
        assert!(!resp.is_ok());
        assert_eq!(resp.code.as_deref(), Some("not_found"));
    }
}
