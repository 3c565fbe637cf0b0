use crate::subsystems::reporting;
use pulse_core::ipc::{PulseRequest, PulseResponse, CODE_INVALID, CODE_NOT_FOUND};
use pulse_core::{Engine, EngineError, PulseConfig, Session};

/// Dispatch one IPC request against the engine.
pub async fn handle_request(request: PulseRequest, engine: &Engine, config: &PulseConfig) -> PulseResponse {
    match request {
        PulseRequest::Ping => PulseResponse::pong(),
        PulseRequest::Health => match engine.store().ping().await {
            Ok(v) => PulseResponse::ok(serde_json::json!({
                "store": engine.store().name(),
                "backend": v,
                "status": "healthy"
            })),
            Err(e) => PulseResponse::err(format!("Store health check failed: {}", e)),
        },
        PulseRequest::SessionStart {
            user_id,
            agent_id,
            connection_id,
            session_id,
        } => {
            let mut draft = Session::new(user_id, agent_id, connection_id);
            if let Some(id) = session_id {
                draft = draft.with_id(id);
            }
            match engine.sessions.create_session(draft).await {
                Ok(session) => {
                    // Counting must never fail the session it counts.
                    if let Err(e) = engine.metrics.increment_sessions(&session.agent_id).await {
                        tracing::warn!(
                            agent_id = %session.agent_id,
                            error = %e,
                            "Session counter write failed"
                        );
                    }
                    session_response(&session)
                }
                Err(e) => engine_error(e),
            }
        }
        PulseRequest::SessionEnd { session_id, status } => {
            match engine.sessions.end_session(&session_id, status).await {
                Ok(session) => session_response(&session),
                Err(e) => engine_error(e),
            }
        }
        PulseRequest::SessionTouch { session_id } => {
            match engine.sessions.touch_session(&session_id).await {
                Ok(session) => session_response(&session),
                Err(e) => engine_error(e),
            }
        }
        PulseRequest::SessionDelete { session_id } => {
            match engine.sessions.delete_session(&session_id).await {
                Ok(()) => PulseResponse::ok(serde_json::json!({"deleted": true, "id": session_id})),
                Err(e) => engine_error(e),
            }
        }
        PulseRequest::GetSession { session_id } => match engine.sessions.get_session(&session_id).await {
            Ok(session) => session_response(&session),
            Err(e) => engine_error(e),
        },
        PulseRequest::ActiveSessions { user_id } => {
            match engine.sessions.get_active_sessions(&user_id).await {
                Ok(sessions) => PulseResponse::ok(serde_json::json!({
                    "sessions": sessions,
                    "count": sessions.len(),
                })),
                Err(e) => engine_error(e),
            }
        }
        PulseRequest::Utterance { agent_id } => {
            counter_response(&agent_id, "utterances", engine.metrics.increment_utterances(&agent_id).await)
        }
        PulseRequest::Response { agent_id } => {
            counter_response(&agent_id, "responses", engine.metrics.increment_responses(&agent_id).await)
        }
        PulseRequest::Error { agent_id } => {
            counter_response(&agent_id, "error_count", engine.metrics.increment_errors(&agent_id).await)
        }
        PulseRequest::Install { agent_id } => counter_response(
            &agent_id,
            "new_installs",
            engine.metrics.increment_new_installs(&agent_id).await,
        ),
        PulseRequest::Uninstall { agent_id } => counter_response(
            &agent_id,
            "uninstalls",
            engine.metrics.increment_uninstalls(&agent_id).await,
        ),
        PulseRequest::Latency { agent_id, latency_ms } => {
            match engine.metrics.record_latency(&agent_id, latency_ms).await {
                Ok(()) => PulseResponse::ok(serde_json::json!({"recorded": true})),
                Err(e) => metrics_write_error(&agent_id, "latency", e),
            }
        }
        PulseRequest::UniqueUser { agent_id, user_id } => {
            match engine.metrics.track_unique_user(&agent_id, &user_id).await {
                Ok(new) => PulseResponse::ok(serde_json::json!({"new_user": new})),
                Err(e) => metrics_write_error(&agent_id, "unique_users", e),
            }
        }
        PulseRequest::Metrics { agent_id, hours } => {
            let hours = reporting::clamp_hours_window(hours, &config.metrics);
            match engine.metrics.get_metrics(&agent_id, hours).await {
                Ok(buckets) => PulseResponse::ok(serde_json::json!({
                    "agent_id": agent_id,
                    "hours": hours,
                    "metrics": buckets,
                })),
                Err(e) => {
                    tracing::error!(agent_id = %agent_id, error = %e, "Metrics read failed");
                    PulseResponse::err("failed to retrieve metrics")
                }
            }
        }
        PulseRequest::Summary { agent_id } => {
            match engine.metrics.get_metrics_for_last_7_days(&agent_id).await {
                Ok(buckets) => match serde_json::to_value(reporting::summarize(&agent_id, &buckets)) {
                    Ok(v) => PulseResponse::ok(v),
                    Err(e) => PulseResponse::err(e.to_string()),
                },
                Err(e) => {
                    tracing::error!(agent_id = %agent_id, error = %e, "Metrics read failed");
                    PulseResponse::err("failed to retrieve metrics")
                }
            }
        }
    }
}

fn session_response(session: &Session) -> PulseResponse {
    match serde_json::to_value(session) {
        Ok(v) => PulseResponse::ok(v),
        Err(e) => PulseResponse::err(e.to_string()),
    }
}

fn counter_response(agent_id: &str, field: &str, result: Result<i64, EngineError>) -> PulseResponse {
    match result {
        Ok(value) => PulseResponse::ok(serde_json::json!({"field": field, "value": value})),
        Err(e) => metrics_write_error(agent_id, field, e),
    }
}

/// Metric writes are reported back but never retried here.
fn metrics_write_error(agent_id: &str, field: &str, e: EngineError) -> PulseResponse {
    tracing::warn!(agent_id = %agent_id, field = %field, error = %e, "Metrics write failed");
    PulseResponse::err(e.to_string())
}

fn engine_error(e: EngineError) -> PulseResponse {
    match e {
        EngineError::NotFound(_) => PulseResponse::err(e.to_string()).with_code(CODE_NOT_FOUND),
        EngineError::InvalidTransition { .. } => PulseResponse::err(e.to_string()).with_code(CODE_INVALID),
        other => {
            tracing::error!(error = %other, "Session operation failed");
            PulseResponse::err(other.to_string())
        }
    }
}
