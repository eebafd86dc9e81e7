//! Long-lived dashboard connections.
//!
//! After the `subscribe` acknowledgement the socket carries broadcast frames
//! from the daemon, one JSON object per line, and accepts [`ClientMessage`]
//! lines (`resync`, `equip`, `unequip`) from the dashboard.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use pitwall_core::{FrameSink, PitwallEngine, SinkError};
use pitwall_protocol::{ClientMessage, Response, MAX_REQUEST_BYTES};

use crate::ipc::{read_line, write_response};

/// Writes frames to the socket as newline-delimited JSON.
struct SocketSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl FrameSink for SocketSink {
    async fn send_frame(&mut self, frame: String) -> Result<(), SinkError> {
        let mut line = frame.into_bytes();
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }
}

pub async fn serve(
    id: Option<String>,
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    engine: Arc<PitwallEngine>,
) {
    let ack = Response::ok(id, json!({ "subscribed": true }));
    if write_response(&mut writer, &ack).await.is_err() {
        return;
    }

    let client = engine.subscribe(SocketSink { writer });
    debug!(client_id = client, "Subscriber connected");

    loop {
        let line = match read_line(&mut reader, MAX_REQUEST_BYTES).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                engine
                    .broadcaster()
                    .send_error(client, &err.code, err.message);
                break;
            }
        };
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match serde_json::from_slice::<ClientMessage>(&line) {
            Ok(message) => {
                debug!(client_id = client, message = ?message, "Client message");
                engine.handle_client_message(client, message);
            }
            Err(err) => {
                engine.broadcaster().send_error(
                    client,
                    "invalid_message",
                    format!("message was not understood: {}", err),
                );
            }
        }
    }

    engine.unsubscribe(client);
    debug!(client_id = client, "Subscriber disconnected");
}
