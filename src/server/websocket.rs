//! WebSocket upgrade and connection lifecycle
//!
//! Authentication happens before the upgrade: a missing or invalid token is
//! refused with 401 and never touches the engine. Each accepted socket gets
//! one connection worker task; outbound events flow through a per-connection
//! channel drained by a writer task, which preserves per-sender delivery
//! order.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::engine::registry::ConnId;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::server::http::{bad_request_response, error_response, AppState};
use crate::store::UserRecord;
use crate::types::SwitchboardError;

/// Handle WebSocket upgrade for `GET /ws?token=...`
pub async fn handle_ws_upgrade(
    state: Arc<AppState>,
    req: Request<Incoming>,
    addr: SocketAddr,
) -> Response<Full<Bytes>> {
    if state.engine.registry().connection_count() >= state.args.max_clients() {
        warn!("at capacity, rejecting {}", addr);
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Server at capacity");
    }

    // Authenticate before upgrading; a refused connection never enters the
    // engine
    let record = match authenticate(&state, &req).await {
        Ok(record) => record,
        Err(err @ SwitchboardError::AuthenticationFailed(_)) => {
            warn!("refusing connection from {}: {}", addr, err);
            return error_response(StatusCode::UNAUTHORIZED, &err.to_string());
        }
        Err(e) => {
            error!("directory unavailable during auth: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => handle_connection(state, ws, record).await,
                    Err(e) => error!("WebSocket upgrade failed for {}: {:?}", addr, e),
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error for {}: {:?}", addr, e);
            bad_request_response(&format!("WebSocket upgrade failed: {e}"))
        }
    }
}

/// Drive an established connection until it closes
async fn handle_connection(
    state: Arc<AppState>,
    ws: hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>,
    record: UserRecord,
) {
    let conn = ConnId::new();
    let username = record.username.clone();
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Writer task: drain the event queue into the socket. Ends when the
    // registry lets go of the sender (release or takeover) or the socket
    // dies.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to encode event: {}", e);
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    if let Err(e) = state.engine.connect(conn, record, tx).await {
        warn!("rejecting connection for {}: {}", username, e);
        writer.abort();
        return;
    }

    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!("read error on {}: {}", conn, e);
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => state.engine.handle_event(conn, event).await,
                Err(e) => {
                    warn!("malformed frame from {} ({}): {}", username, conn, e);
                    state.engine.notify_invalid_payload(conn, &e.to_string());
                }
            },
            Message::Close(_) => break,
            // Pings are answered on the shared protocol context
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => continue,
        }
    }

    info!("connection {} for {} closed", conn, username);
    Arc::clone(&state.engine).disconnect(conn).await;
}

/// Resolve the connection's token to a directory record.
///
/// A missing or unknown token fails with `AuthenticationFailed` before any
/// engine state is touched.
async fn authenticate(
    state: &AppState,
    req: &Request<Incoming>,
) -> crate::types::Result<UserRecord> {
    let token = extract_token_from_query(req.uri().query())
        .or_else(|| extract_bearer_token(req))
        .ok_or_else(|| {
            SwitchboardError::AuthenticationFailed("missing auth token".to_string())
        })?;

    state
        .directory
        .find_by_token(&token)
        .await?
        .ok_or_else(|| SwitchboardError::AuthenticationFailed("invalid token".to_string()))
}

/// Extract token from query string (`?token=...`)
fn extract_token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            if key == "token" {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Extract token from an `Authorization: Bearer ...` header
fn extract_bearer_token(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_extraction_from_query() {
        assert_eq!(
            extract_token_from_query(Some("token=abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_token_from_query(Some("foo=bar&token=abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(extract_token_from_query(Some("foo=bar")), None);
        assert_eq!(extract_token_from_query(None), None);
    }
}
