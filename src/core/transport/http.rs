//! HTTP transport implementation.
//!
//! Each POST to the frame endpoint carries exactly one client frame. The
//! response body is the matching server frames as newline-delimited JSON,
//! streamed as they are produced. Dropping the response abandons the call.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use super::{TransportError, TransportResult, config::HttpConfig};
use crate::core::{CallState, ToolServer};
use crate::core::protocol::{
    ClientMessage, ErrorCode, ServerMessage, ToolCallChunk, decode_request, encode_response,
    salvage_call_id,
};

/// Content type of streamed frame bodies.
pub const NDJSON: &str = "application/x-ndjson";

/// HTTP transport handler.
pub struct HttpTransport {
    config: HttpConfig,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given config.
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Run the HTTP transport.
    pub async fn run(self, server: ToolServer) -> TransportResult<()> {
        let addr = self.address();
        let app = router(server, &self.config);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!("Ready - listening on {} (CORS {})", addr, cors_status);
        info!("  → Frames: POST {}", self.config.rpc_path);
        info!("  → Health: GET /health");

        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::http(e.to_string()))?;

        Ok(())
    }
}

/// Build the axum router serving `server`.
///
/// Request bodies are capped at the server's `max_frame_bytes`.
pub fn router(server: ToolServer, config: &HttpConfig) -> Router {
    let body_limit = DefaultBodyLimit::max(server.config().max_frame_bytes);
    let mut app = Router::new()
        .route(&config.rpc_path, post(handle_frame))
        .route("/health", get(health_check))
        .route("/", get(root_handler))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(server);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }
    app
}

/// Root handler - describes the server.
async fn root_handler(State(server): State<ToolServer>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": server.name(),
        "version": server.version(),
        "transport": "HTTP",
        "tools": server.registry().tool_names(),
    }))
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Aborts a call when the response streaming its frames is dropped.
struct AbortOnDrop(JoinHandle<CallState>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle one client frame.
#[instrument(skip_all)]
async fn handle_frame(State(server): State<ToolServer>, body: Bytes) -> Response {
    match decode_request(&body) {
        Ok(ClientMessage::ListTools { request_id }) => {
            let tools = server.list_tools();
            ndjson(StatusCode::OK, &[ServerMessage::Tools { request_id, tools }])
        }
        Ok(ClientMessage::Call(request)) => {
            info!(call_id = %request.call_id, tool = %request.tool, "call over HTTP");
            let (tx, rx) = mpsc::channel(server.config().outbound_buffer.max(1));
            let call = AbortOnDrop(server.spawn_call(request, tx));

            let frames = futures::stream::unfold((rx, call), |(mut rx, call)| async move {
                let message = rx.recv().await?;
                Some((encode_response(&message), (rx, call)))
            });
            ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(frames)).into_response()
        }
        Ok(ClientMessage::Cancel { .. }) => {
            let message = "cancel is not supported over HTTP; drop the response instead";
            ndjson(
                StatusCode::BAD_REQUEST,
                &[ServerMessage::ProtocolError { message: message.to_string() }],
            )
        }
        Err(e) => {
            warn!("Rejecting malformed frame: {}", e);
            let reply = match salvage_call_id(&body) {
                Some(call_id) => ServerMessage::Chunk(ToolCallChunk::error(
                    call_id,
                    0,
                    ErrorCode::InvalidRequest,
                    e.to_string(),
                )),
                None => ServerMessage::ProtocolError { message: e.to_string() },
            };
            ndjson(StatusCode::BAD_REQUEST, &[reply])
        }
    }
}

/// A complete NDJSON response made of `messages`.
fn ndjson(status: StatusCode, messages: &[ServerMessage]) -> Response {
    let mut body = Vec::new();
    for message in messages {
        match encode_response(message) {
            Ok(frame) => body.extend_from_slice(&frame),
            Err(e) => {
                warn!("Failed to encode response: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    (status, [(header::CONTENT_TYPE, NDJSON)], body).into_response()
}
