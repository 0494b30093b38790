use crate::router;
use crate::state::BotState;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use somnus_core::{BotEvent, EventAck};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Gateway-facing event socket. Frames are a 4-byte little-endian length
/// prefix followed by a MessagePack `BotEvent`; each is answered with an
/// `EventAck` frame. Connections are served concurrently.
pub async fn run_unix_server(
    socket_path: &str,
    state: Arc<BotState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("Event socket listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let state = state.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
                    let mut framed_read = FramedRead::new(read, le_codec());
                    let mut framed_write = FramedWrite::new(write, le_codec());

                    while let Some(frame) = framed_read.next().await {
                        let bytes_mut = match frame {
                            Ok(b) => b,
                            Err(e) => {
                                tracing::error!("Frame error: {}", e);
                                break;
                            }
                        };

                        let ack = match rmp_serde::from_slice::<BotEvent>(&bytes_mut) {
                            Ok(event) => router::handle_event(&state, event).await,
                            Err(e) => EventAck::err(format!("Deserialization error: {}", e)),
                        };

                        match rmp_serde::to_vec_named(&ack) {
                            Ok(ack_bytes) => {
                                if let Err(e) = framed_write.send(Bytes::from(ack_bytes)).await {
                                    tracing::error!("Failed to send ack: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to serialize ack: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down event socket...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}
