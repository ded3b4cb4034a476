//! Streamable HTTP server transport
//!
//! The 2025-03-26 transport: one endpoint accepts POST (client-to-server
//! frames; the response is JSON, or 202 Accepted for notifications), GET
//! (the pure server-to-client SSE stream), and DELETE (session
//! termination). The session id travels in the `Mcp-Session-Id` header
//! and is echoed on every response. The Origin header is validated when
//! an allowlist is configured.

use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response, Sse, sse::Event, sse::KeepAlive},
    routing::post,
};
use futures::Stream;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::core::error::{McpError, McpResult};
use crate::protocol::version::ProtocolVersion;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
    SessionEndHandler, TransportShared,
};

/// Session header name for HTTP-family transports
pub const MCP_SESSION_HEADER: &str = "Mcp-Session-Id";

/// Header prefix mapped into the session environment
pub const MCP_ENV_HEADER_PREFIX: &str = "mcp-env-";

const STREAM_BUFFER: usize = 256;

type StreamMap = Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>;

#[derive(Clone)]
struct HttpState {
    shared: Arc<TransportShared>,
    streams: StreamMap,
    allowed_origins: Arc<Vec<String>>,
}

/// Streamable HTTP transport for MCP servers
pub struct StreamableHttpServerTransport {
    shared: Arc<TransportShared>,
    bind_addr: String,
    streams: StreamMap,
    allowed_origins: Vec<String>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
    listener: Mutex<Option<tokio::net::TcpListener>>,
}

impl StreamableHttpServerTransport {
    /// Create a transport bound to `addr` on start
    pub fn new(addr: String) -> Self {
        Self {
            shared: Arc::new(TransportShared::new()),
            bind_addr: addr,
            streams: Arc::new(Mutex::new(HashMap::new())),
            allowed_origins: Vec::new(),
            local_addr: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Restrict accepted Origin header values
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// The locally bound address, once initialized
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }

    fn router(&self) -> Router {
        let state = HttpState {
            shared: self.shared.clone(),
            streams: self.streams.clone(),
            allowed_origins: Arc::new(self.allowed_origins.clone()),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route(
                "/mcp",
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .with_state(state)
            .layer(ServiceBuilder::new().layer(cors).into_inner())
    }
}

/// Extract `Mcp-Env-*` headers into session environment entries
fn env_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            let suffix = name
                .to_ascii_lowercase()
                .strip_prefix(MCP_ENV_HEADER_PREFIX)
                .map(|s| s.to_string())?;
            let value = value.to_str().ok()?;
            Some((suffix.to_uppercase().replace('-', "_"), value.to_string()))
        })
        .collect()
}

fn session_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => true,
    }
}

async fn stream_sender(streams: &StreamMap, session_id: &str) -> broadcast::Sender<String> {
    let mut streams = streams.lock().await;
    streams
        .entry(session_id.to_string())
        .or_insert_with(|| broadcast::channel(STREAM_BUFFER).0)
        .clone()
}

async fn handle_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !origin_allowed(&headers, &state.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let envelope = IncomingEnvelope {
        payload: body,
        session_id: session_of(&headers),
        env: env_from_headers(&headers),
    };

    match state.shared.dispatch(envelope).await {
        Some(reply) => {
            let mut response = (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                reply.payload,
            )
                .into_response();
            if let Some(session_id) = reply.session_id {
                if let Ok(value) = session_id.parse() {
                    response
                        .headers_mut()
                        .insert(MCP_SESSION_HEADER, value);
                }
            }
            response
        }
        // Notifications produce no response frame
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn handle_get(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    if !origin_allowed(&headers, &state.allowed_origins) {
        return Err(StatusCode::FORBIDDEN);
    }
    let session_id = session_of(&headers).ok_or(StatusCode::BAD_REQUEST)?;

    let receiver = stream_sender(&state.streams, &session_id).await.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|frame| match frame {
        Ok(payload) => Some(Ok(Event::default().data(payload))),
        Err(_) => None,
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn handle_delete(State(state): State<HttpState>, headers: HeaderMap) -> StatusCode {
    let Some(session_id) = session_of(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    {
        let mut streams = state.streams.lock().await;
        streams.remove(&session_id);
    }
    state.shared.session_ended(session_id);
    StatusCode::OK
}

#[async_trait]
impl ServerTransport for StreamableHttpServerTransport {
    async fn initialize(&self) -> McpResult<()> {
        if self.listener.lock().await.is_some() {
            return Ok(());
        }
        let listener = tokio::net::TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| McpError::Http(format!("Failed to bind {}: {e}", self.bind_addr)))?;
        *self.local_addr.lock().await = listener.local_addr().ok();
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn start(&self) -> McpResult<()> {
        if self.listener.lock().await.is_none() {
            self.initialize().await?;
        }
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| McpError::Http("HTTP listener not bound".to_string()))?;

        tracing::info!(addr = %self.bind_addr, "streamable HTTP transport listening");
        self.shared.set_running(true);

        let stop = self.shared.stop_token();
        let app = self.router();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await });

        let result = served
            .await
            .map_err(|e| McpError::Http(format!("HTTP server error: {e}")));
        self.shared.set_running(false);
        result
    }

    async fn stop(&self) -> McpResult<()> {
        self.shared.trigger_stop();
        Ok(())
    }

    async fn send(&self, envelope: OutboundEnvelope) -> McpResult<()> {
        match &envelope.session_id {
            Some(session_id) => {
                let sender = stream_sender(&self.streams, session_id).await;
                // No receiver yet just means no GET stream is open
                let _ = sender.send(envelope.payload);
                Ok(())
            }
            None => {
                let streams = self.streams.lock().await;
                for sender in streams.values() {
                    let _ = sender.send(envelope.payload.clone());
                }
                Ok(())
            }
        }
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        self.shared.set_handler(handler);
    }

    fn set_protocol_version(&self, version: ProtocolVersion) {
        self.shared.set_version(version);
    }

    fn set_debug_handler(&self, handler: DebugHandler) {
        self.shared.set_debug(handler);
    }

    fn set_session_end_handler(&self, handler: SessionEndHandler) {
        self.shared.set_session_end(handler);
    }

    fn evicts_idle_sessions(&self) -> bool {
        true
    }

    fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    fn transport_info(&self) -> String {
        format!("streamable HTTP transport ({})", self.bind_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_env_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Mcp-Env-Api-Key", HeaderValue::from_static("secret"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let env = env_from_headers(&headers);
        assert_eq!(env.get("API_KEY").map(String::as_str), Some("secret"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_origin_allowlist() {
        let mut headers = HeaderMap::new();
        assert!(origin_allowed(&headers, &[]));

        headers.insert(header::ORIGIN, HeaderValue::from_static("https://ok.dev"));
        assert!(origin_allowed(&headers, &["https://ok.dev".to_string()]));
        assert!(!origin_allowed(&headers, &["https://other.dev".to_string()]));
    }

    #[test]
    fn test_session_header_extraction() {
        let mut headers = HeaderMap::new();
        assert!(session_of(&headers).is_none());
        headers.insert(MCP_SESSION_HEADER, HeaderValue::from_static("abc123"));
        assert_eq!(session_of(&headers).as_deref(), Some("abc123"));
    }
}
