//! HTTP server implementation
//!
//! hyper http1 with TokioIo and upgrade support. Routes:
//! - `POST /register` - create an identity, returns its auth token
//! - `GET /ws?token=...` - WebSocket upgrade into the relay
//! - `GET /health` - liveness probe
//! - `OPTIONS *` - CORS preflight

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::engine::Engine;
use crate::server::websocket;
use crate::store::UserDirectory;
use crate::types::{Result, SwitchboardError};

pub(crate) type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub engine: Arc<Engine>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(args: Args, engine: Arc<Engine>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            args,
            engine,
            directory,
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Switchboard listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") => health_check(&state),

        (Method::POST, "/register") => handle_register(&state, req).await,

        (Method::GET, "/ws") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                websocket::handle_ws_upgrade(state, req, addr).await
            } else {
                bad_request_response("The /ws endpoint requires a WebSocket upgrade")
            }
        }

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Liveness probe with live connection count
fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "nodeId": state.args.node_id.to_string(),
        "connections": state.engine.registry().connection_count(),
        "mode": if state.args.dev_mode { "development" } else { "production" },
    });
    json_response(StatusCode::OK, body)
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Validate a registration body: a non-blank username is required, a
/// caller-supplied stable id is optional
fn parse_register_request(body: &[u8]) -> std::result::Result<(String, Option<String>), String> {
    let request: RegisterRequest =
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {}", e))?;

    match request.username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok((name.to_string(), request.user_id)),
        _ => Err("A username is required".to_string()),
    }
}

/// Handle `POST /register`: create an identity and mint its token
async fn handle_register(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("register request body error: {}", e);
            return bad_request_response("Failed to read request body");
        }
    };

    let (username, user_id) = match parse_register_request(&body) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!("register request rejected: {}", reason);
            return bad_request_response(&reason);
        }
    };

    match state.directory.insert(&username, user_id.as_deref()).await {
        Ok(record) => {
            info!("registered user {} ({})", record.username, record.id);
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "message": "user registered",
                    "userId": record.id,
                    "token": record.token,
                }),
            )
        }
        Err(SwitchboardError::DuplicateUser(_)) => error_response(
            StatusCode::CONFLICT,
            &format!("username {} is already taken", username),
        ),
        Err(e) => {
            error!("registration failed for {}: {}", username, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Convert a Full<Bytes> body to BoxBody
pub(crate) fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// JSON response with CORS headers
fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// JSON error response
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, serde_json::json!({ "error": message }))
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "POST /register to get a token, then connect to /ws?token=...",
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Bad request response
pub(crate) fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    error_response(StatusCode::BAD_REQUEST, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_requires_a_username() {
        assert!(parse_register_request(b"{}").is_err());
        assert!(parse_register_request(br#"{"username": ""}"#).is_err());
        assert!(parse_register_request(br#"{"username": "   "}"#).is_err());
        assert!(parse_register_request(b"not json").is_err());
    }

    #[test]
    fn test_register_accepts_username_with_optional_id() {
        let (username, user_id) =
            parse_register_request(br#"{"username": "alice"}"#).unwrap();
        assert_eq!(username, "alice");
        assert_eq!(user_id, None);

        let (username, user_id) =
            parse_register_request(br#"{"username": " bob ", "userId": "abc123"}"#).unwrap();
        assert_eq!(username, "bob");
        assert_eq!(user_id, Some("abc123".to_string()));
    }
}
