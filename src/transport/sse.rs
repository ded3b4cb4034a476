//! Legacy HTTP+SSE server transport
//!
//! The pre-streamable pairing: clients open an SSE stream whose first
//! event is named `endpoint` and carries the POST path they must submit
//! requests to; every subsequent event is named `message` and carries a
//! JSON-RPC frame. Correlated responses travel back on the SSE stream,
//! so the POST itself always answers 202 Accepted.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response, Sse, sse::Event, sse::KeepAlive},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};

use crate::core::error::{McpError, McpResult};
use crate::protocol::version::ProtocolVersion;
use crate::server::session::generate_session_id;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
    SessionEndHandler, TransportShared,
};

const STREAM_BUFFER: usize = 256;
const SSE_PATH: &str = "/sse";
const MESSAGES_PATH: &str = "/messages";

type StreamMap = Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>;

#[derive(Clone)]
struct SseState {
    shared: Arc<TransportShared>,
    streams: StreamMap,
}

/// Legacy HTTP+SSE transport for MCP servers
pub struct SseServerTransport {
    shared: Arc<TransportShared>,
    bind_addr: String,
    streams: StreamMap,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
    listener: Mutex<Option<tokio::net::TcpListener>>,
}

impl SseServerTransport {
    /// Create a transport bound to `addr` on start
    pub fn new(addr: String) -> Self {
        Self {
            shared: Arc::new(TransportShared::new()),
            bind_addr: addr,
            streams: Arc::new(Mutex::new(HashMap::new())),
            local_addr: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// The locally bound address, once initialized
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }

    fn router(&self) -> Router {
        let state = SseState {
            shared: self.shared.clone(),
            streams: self.streams.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route(SSE_PATH, get(handle_sse))
            .route(MESSAGES_PATH, post(handle_message))
            .with_state(state)
            .layer(cors)
    }
}

async fn handle_sse(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = generate_session_id();
    let sender = {
        let mut streams = state.streams.lock().await;
        let sender = broadcast::channel(STREAM_BUFFER).0;
        streams.insert(session_id.clone(), sender.clone());
        sender
    };

    let endpoint = format!("{MESSAGES_PATH}?sessionId={session_id}");
    let first = futures::stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });
    let rest = BroadcastStream::new(sender.subscribe()).filter_map(|frame| async move {
        match frame {
            Ok(payload) => Some(Ok(Event::default().event("message").data(payload))),
            Err(_) => None,
        }
    });

    Sse::new(first.chain(rest)).keep_alive(KeepAlive::default())
}

async fn handle_message(
    State(state): State<SseState>,
    Query(query): Query<HashMap<String, String>>,
    _headers: HeaderMap,
    body: String,
) -> Response {
    let Some(session_id) = query.get("sessionId").cloned() else {
        return (StatusCode::BAD_REQUEST, "missing sessionId").into_response();
    };

    let known = {
        let streams = state.streams.lock().await;
        streams.contains_key(&session_id)
    };
    if !known {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }

    let envelope = IncomingEnvelope {
        payload: body,
        session_id: Some(session_id.clone()),
        env: HashMap::new(),
    };

    let shared = state.shared.clone();
    let streams = state.streams.clone();
    tokio::spawn(async move {
        if let Some(reply) = shared.dispatch(envelope).await {
            let streams = streams.lock().await;
            if let Some(sender) = streams.get(&session_id) {
                let _ = sender.send(reply.payload);
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

#[async_trait]
impl ServerTransport for SseServerTransport {
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
            .ok_or_else(|| McpError::Http("SSE listener not bound".to_string()))?;

        tracing::info!(addr = %self.bind_addr, "HTTP+SSE transport listening");
        self.shared.set_running(true);

        let stop = self.shared.stop_token();
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { stop.cancelled().await });

        let result = served
            .await
            .map_err(|e| McpError::Http(format!("SSE server error: {e}")));
        self.shared.set_running(false);
        result
    }

    async fn stop(&self) -> McpResult<()> {
        self.shared.trigger_stop();
        Ok(())
    }

    async fn send(&self, envelope: OutboundEnvelope) -> McpResult<()> {
        let streams = self.streams.lock().await;
        match &envelope.session_id {
            Some(session_id) => {
                let sender = streams.get(session_id).ok_or_else(|| {
                    McpError::connection(format!("No SSE stream for session {session_id}"))
                })?;
                let _ = sender.send(envelope.payload);
                Ok(())
            }
            None => {
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
        format!("HTTP+SSE transport ({})", self.bind_addr)
    }
}
