//! Request/response handling for the daemon socket.
//!
//! Every connection sends one newline-terminated JSON [`Request`] and gets one
//! newline-terminated [`Response`]. `subscribe` is the exception: the
//! connection stays open and is handed to [`crate::subscriber`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use pitwall_core::{Event, PitwallEngine};
use pitwall_protocol::{
    parse_params, validate_session, EquipParams, ErrorInfo, Method, PushSessionsParams,
    RemoveSessionsParams, Request, Response, SourceHealthParams, UnequipParams,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn handle_connection(stream: UnixStream, engine: Arc<PitwallEngine>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = match read_request(&mut reader).await {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut write_half, &response).await;
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Daemon request received");

    if request.protocol_version != PROTOCOL_VERSION {
        let response = Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
        let _ = write_response(&mut write_half, &response).await;
        return;
    }

    if request.method == Method::Subscribe {
        crate::subscriber::serve(request.id, reader, write_half, engine).await;
        return;
    }

    let response = handle_request(request, &engine).await;
    let _ = write_response(&mut write_half, &response).await;
}

/// Reads one newline-terminated line of at most `limit` bytes. Returns
/// `Ok(None)` at end of stream. The trailing newline is stripped.
pub async fn read_line<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, ErrorInfo>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_until(b'\n', &mut buffer)
        .await
        .map_err(|err| ErrorInfo::new("read_error", format!("failed to read request: {}", err)))?;

    if read == 0 {
        return Ok(None);
    }
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
    } else if buffer.len() > limit {
        return Err(ErrorInfo::new(
            "request_too_large",
            "request exceeded maximum size",
        ));
    }
    Ok(Some(buffer))
}

async fn read_request<R>(reader: &mut R) -> Result<Request, ErrorInfo>
where
    R: AsyncBufRead + Unpin,
{
    let line = tokio::time::timeout(READ_TIMEOUT, read_line(reader, MAX_REQUEST_BYTES))
        .await
        .map_err(|_| ErrorInfo::new("read_timeout", "request timed out"))??;

    let line = match line {
        Some(line) if !line.iter().all(|b| b.is_ascii_whitespace()) => line,
        _ => return Err(ErrorInfo::new("empty_request", "request body was empty")),
    };

    serde_json::from_slice(&line).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

pub async fn write_response<W>(writer: &mut W, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(response)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

fn respond<T: Serialize>(id: Option<String>, what: &str, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

pub async fn handle_request(request: Request, engine: &PitwallEngine) -> Response {
    let id = request.id;
    match request.method {
        Method::GetHealth => respond(id, "health", &engine.health()),
        Method::GetSessions => {
            let sessions = engine.sessions();
            debug!(sessions = sessions.sessions.len(), "Sessions snapshot");
            respond(id, "sessions", &sessions)
        }
        Method::GetStats => respond(id, "stats", &engine.stats()),
        Method::GetAchievements => respond(id, "achievements", &engine.achievements()),
        Method::GetChallenges => respond(id, "challenges", &engine.challenges()),
        Method::Equip => {
            let params: EquipParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            match engine.equip(&params.reward_id, &params.slot) {
                Ok(payload) => respond(id, "loadout", &payload),
                Err(err) => Response::error_with_info(id, err.into()),
            }
        }
        Method::Unequip => {
            let params: UnequipParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            match engine.unequip(&params.slot) {
                Ok(payload) => respond(id, "loadout", &payload),
                Err(err) => Response::error_with_info(id, err.into()),
            }
        }
        Method::PushSessions => {
            let params: PushSessionsParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            if let Err(err) = params.sessions.iter().try_for_each(validate_session) {
                return Response::error_with_info(id, err);
            }
            let accepted = engine.push_sessions(params.sessions).len();
            debug!(accepted, "Sessions pushed");
            Response::ok(id, json!({ "accepted": accepted }))
        }
        Method::RemoveSessions => {
            let params: RemoveSessionsParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let removed = engine.remove_sessions(&params.session_ids);
            Response::ok(id, json!({ "removed": removed }))
        }
        Method::PushEvent => {
            let event: Event = match parse_params(request.params) {
                Ok(event) => event,
                Err(err) => return Response::error_with_info(id, err),
            };
            if let Err(err) = validate_session(&event.state) {
                return Response::error_with_info(id, err);
            }
            info!(
                event_type = ?event.kind,
                session_id = %event.session_id(),
                activity = event.state.activity.as_str(),
                "Received event"
            );
            match engine.push_event(event).await {
                Ok(()) => Response::ok(id, json!({ "accepted": true })),
                Err(err) => Response::error(id, "shutting_down", err.to_string()),
            }
        }
        Method::SetSourceHealth => {
            let params: SourceHealthParams = match parse_params(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            engine.set_source_health(params.sources);
            Response::ok(id, json!({ "accepted": true }))
        }
        Method::Subscribe => Response::error(
            id,
            "invalid_method",
            "subscribe must be the first request on a connection",
        ),
    }
}
