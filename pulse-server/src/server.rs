use crate::router;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pulse_core::ipc::{PulseRequest, PulseResponse};
use pulse_core::{Engine, PulseConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Accept agent-bridge connections on a Unix socket until shutdown.
///
/// Wire format: 4-byte little-endian length prefix + MessagePack payload,
/// one response frame per request frame.
pub async fn run_unix_server(
    socket_path: &str,
    engine: Arc<Engine>,
    config: PulseConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let path = Path::new(socket_path);
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!("Pulse IPC listening on {}", socket_path);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                tokio::spawn(serve_connection(stream, engine.clone(), config.clone()));
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Request/response loop for one client. Undecodable frames get an error
/// reply and the connection stays open; transport errors close it.
async fn serve_connection(stream: UnixStream, engine: Arc<Engine>, config: PulseConfig) {
    let codec = LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed = Framed::new(stream, codec);

    while let Some(frame) = framed.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                return;
            }
        };

        let response = match rmp_serde::from_slice::<PulseRequest>(&payload) {
            Ok(request) => router::handle_request(request, &engine, &config).await,
            Err(e) => {
                tracing::debug!("Rejecting undecodable IPC frame: {}", e);
                PulseResponse::err(format!("Deserialization error: {}", e))
            }
        };

        let encoded = match rmp_serde::to_vec_named(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                return;
            }
        };
        if let Err(e) = framed.send(Bytes::from(encoded)).await {
            tracing::error!("Failed to send response: {}", e);
            return;
        }
    }
}
