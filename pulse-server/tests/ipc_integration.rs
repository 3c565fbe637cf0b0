//! IPC integration tests: request dispatch through the router, plus one
//! end-to-end exchange over a real Unix socket.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use pulse_core::ipc::{PulseRequest, PulseResponse, CODE_INVALID, CODE_NOT_FOUND};
use pulse_core::{Engine, KvStore, ManualClock, MemoryStore, PulseConfig, SessionStatus};
use pulse_server::{router, server};
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

fn make_engine() -> (Arc<Engine>, PulseConfig) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 9, 15, 0).unwrap()));
    let config = PulseConfig::in_memory("/tmp/pulse-ipc-integration.sock");
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(clock.clone()));
    (Arc::new(Engine::new(store, clock, &config)), config)
}

fn start(session_id: Option<&str>) -> PulseRequest {
    PulseRequest::SessionStart {
        user_id: "u1".to_string(),
        agent_id: "a1".to_string(),
        connection_id: "conn-1".to_string(),
        session_id: session_id.map(str::to_string),
    }
}

#[tokio::test]
async fn test_session_start_counts_a_session() {
    let (engine, config) = make_engine();

    let resp = router::handle_request(start(None), &engine, &config).await;
    assert!(resp.is_ok());
    let data = resp.data.unwrap();
    assert!(data["id"].as_str().unwrap().starts_with("sess_"));
    assert_eq!(data["status"], "active");

    let buckets = engine.metrics.get_metrics("a1", 1).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].sessions, 1);
}

#[tokio::test]
async fn test_session_end_codes() {
    let (engine, config) = make_engine();
    router::handle_request(start(Some("call-42")), &engine, &config).await;

    let end = |status| PulseRequest::SessionEnd {
        session_id: "call-42".to_string(),
        status,
    };

    let resp = router::handle_request(end(SessionStatus::Ended), &engine, &config).await;
    assert!(resp.is_ok());
    assert_eq!(resp.data.unwrap()["status"], "ended");

    // Repeating the same terminal status is a no-op.
    let resp = router::handle_request(end(SessionStatus::Ended), &engine, &config).await;
    assert!(resp.is_ok());

    let resp = router::handle_request(end(SessionStatus::Error), &engine, &config).await;
    assert!(!resp.is_ok());
    assert_eq!(resp.code.as_deref(), Some(CODE_INVALID));

    let resp = router::handle_request(
        PulseRequest::SessionEnd {
            session_id: "missing".to_string(),
            status: SessionStatus::Ended,
        },
        &engine,
        &config,
    )
    .await;
    assert_eq!(resp.code.as_deref(), Some(CODE_NOT_FOUND));
}

#[tokio::test]
async fn test_counters_and_unique_users() {
    let (engine, config) = make_engine();
    let agent = || "a1".to_string();

    router::handle_request(PulseRequest::Utterance { agent_id: agent() }, &engine, &config).await;
    let resp = router::handle_request(PulseRequest::Utterance { agent_id: agent() }, &engine, &config).await;
    assert_eq!(resp.data.unwrap()["value"], 2);

    let unique = |user: &str| PulseRequest::UniqueUser {
        agent_id: agent(),
        user_id: user.to_string(),
    };
    let resp = router::handle_request(unique("u1"), &engine, &config).await;
    assert_eq!(resp.data.unwrap()["new_user"], true);
    let resp = router::handle_request(unique("u1"), &engine, &config).await;
    assert_eq!(resp.data.unwrap()["new_user"], false);

    router::handle_request(
        PulseRequest::Latency {
            agent_id: agent(),
            latency_ms: 120,
        },
        &engine,
        &config,
    )
    .await;

    let resp = router::handle_request(
        PulseRequest::Metrics {
            agent_id: agent(),
            hours: Some(500),
        },
        &engine,
        &config,
    )
    .await;
    let data = resp.data.unwrap();
    assert_eq!(data["hours"], 24);
    let bucket = &data["metrics"][0];
    assert_eq!(bucket["utterances"], 2);
    assert_eq!(bucket["unique_users"], 1);
    assert_eq!(bucket["avg_latency_ms"], 120);
}

#[tokio::test]
async fn test_metrics_bad_hours_falls_back_to_default() {
    let (engine, config) = make_engine();
    engine.metrics.increment_sessions("a1").await.unwrap();

    for bad in [serde_json::json!(-3), serde_json::json!("abc"), serde_json::json!(0)] {
        let raw = serde_json::json!({"action": "metrics", "agent_id": "a1", "hours": bad});
        let frame = rmp_serde::to_vec_named(&raw).unwrap();
        let request: PulseRequest = rmp_serde::from_slice(&frame).unwrap();

        let resp = router::handle_request(request, &engine, &config).await;
        assert!(resp.is_ok(), "hours {} was rejected", raw["hours"]);
        let data = resp.data.unwrap();
        assert_eq!(data["hours"], 24);
        assert_eq!(data["metrics"][0]["sessions"], 1);
    }
}

#[tokio::test]
async fn test_active_sessions_and_delete() {
    let (engine, config) = make_engine();
    router::handle_request(start(Some("s-1")), &engine, &config).await;

    let active = || PulseRequest::ActiveSessions {
        user_id: "u1".to_string(),
    };
    let resp = router::handle_request(active(), &engine, &config).await;
    assert_eq!(resp.data.unwrap()["count"], 1);

    let resp = router::handle_request(
        PulseRequest::SessionDelete {
            session_id: "s-1".to_string(),
        },
        &engine,
        &config,
    )
    .await;
    assert!(resp.is_ok());

    let resp = router::handle_request(active(), &engine, &config).await;
    assert_eq!(resp.data.unwrap()["count"], 0);

    let resp = router::handle_request(
        PulseRequest::GetSession {
            session_id: "s-1".to_string(),
        },
        &engine,
        &config,
    )
    .await;
    assert_eq!(resp.code.as_deref(), Some(CODE_NOT_FOUND));
}

#[tokio::test]
async fn test_unix_socket_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("pulse.sock");
    let socket_str = socket_path.to_string_lossy().to_string();

    let (engine, config) = make_engine();
    let (tx, rx) = broadcast::channel(1);

    let server_path = socket_str.clone();
    let handle = tokio::spawn(async move { server::run_unix_server(&server_path, engine, config, rx).await });

    // Wait for the listener to bind.
    for _ in 0..50 {
        if socket_path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let stream = UnixStream::connect(&socket_path).await.unwrap();
    let codec = LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed = Framed::new(stream, codec);

    let ping = rmp_serde::to_vec_named(&PulseRequest::Ping).unwrap();
    framed.send(Bytes::from(ping)).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let resp: PulseResponse = rmp_serde::from_slice(&frame).unwrap();
    assert!(resp.is_ok());

    // Garbage payloads get an error frame and the connection stays usable.
    framed.send(Bytes::from_static(b"\xc1not-msgpack")).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let resp: PulseResponse = rmp_serde::from_slice(&frame).unwrap();
    assert!(!resp.is_ok());
    assert!(resp.error.unwrap().contains("Deserialization error"));

    let req = rmp_serde::to_vec_named(&start(None)).unwrap();
    framed.send(Bytes::from(req)).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let resp: PulseResponse = rmp_serde::from_slice(&frame).unwrap();
    assert!(resp.is_ok());

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!socket_path.exists(), "socket file is removed on shutdown");
}
