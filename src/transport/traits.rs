//! Transport layer traits and abstractions
//!
//! The engine treats all transports uniformly: a server transport is
//! started and stopped, pushes inbound frames through a message-handler
//! callback (whose return value is the outbound response frame, or nothing
//! for notifications), accepts outbound frames via `send`, and is tagged
//! with the negotiated protocol version so framing decisions can branch.
//! Per-transport behaviors (session-id header plumbing, fragmentation,
//! stream management) stay behind this surface.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

use crate::core::error::{McpError, McpResult};
use crate::protocol::batch::ResponseFrame;
use crate::protocol::types::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::protocol::version::ProtocolVersion;

/// An inbound frame plus the transport context it arrived with
#[derive(Debug, Clone, Default)]
pub struct IncomingEnvelope {
    /// Raw frame text
    pub payload: String,
    /// Session binding: header value for HTTP-family transports, the
    /// connection-scoped id elsewhere
    pub session_id: Option<String>,
    /// Environment entries extracted by the transport (process env for
    /// stdio, `Mcp-Env-*` headers for HTTP)
    pub env: HashMap<String, String>,
}

/// An outbound frame plus its session routing
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    /// Raw frame text
    pub payload: String,
    /// Target session; None means the transport's single peer
    pub session_id: Option<String>,
}

/// Callback invoked for every inbound frame.
///
/// Returns the outbound response envelope, or None when the frame was a
/// notification (or a cancelled request) and nothing must be sent.
pub type MessageHandler =
    Arc<dyn Fn(IncomingEnvelope) -> BoxFuture<'static, Option<OutboundEnvelope>> + Send + Sync>;

/// Debug hook fed with discarded input and transport diagnostics
pub type DebugHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Hook invoked when a transport-level session ends (DELETE on the
/// streamable HTTP endpoint, peer disconnect elsewhere)
pub type SessionEndHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Transport trait for MCP servers
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Prepare the transport (bind sockets, allocate state).
    ///
    /// Called once before `start`.
    async fn initialize(&self) -> McpResult<()> {
        Ok(())
    }

    /// Serve until the peer disconnects or `stop` is called
    async fn start(&self) -> McpResult<()>;

    /// Stop serving and release resources
    async fn stop(&self) -> McpResult<()>;

    /// Send an outbound frame (notification or server-initiated request)
    async fn send(&self, envelope: OutboundEnvelope) -> McpResult<()>;

    /// Install the inbound message handler
    fn set_message_handler(&self, handler: MessageHandler);

    /// Tag the transport with the negotiated protocol version
    fn set_protocol_version(&self, version: ProtocolVersion);

    /// Install the debug hook
    fn set_debug_handler(&self, handler: DebugHandler);

    /// Install the session-end hook
    fn set_session_end_handler(&self, _handler: SessionEndHandler) {}

    /// Whether the engine should evict idle sessions.
    ///
    /// Transports that accept new connections return true; single-session
    /// transports (stdio, embedded) keep their session for the process
    /// lifetime.
    fn evicts_idle_sessions(&self) -> bool {
        false
    }

    /// Whether the transport is serving
    fn is_running(&self) -> bool {
        true
    }

    /// Transport description for diagnostics
    fn transport_info(&self) -> String {
        "unknown server transport".to_string()
    }
}

/// Transport trait for MCP clients
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the correlated response frame
    async fn send_request(&mut self, request: JsonRpcRequest) -> McpResult<ResponseFrame>;

    /// Send a notification (no response expected)
    async fn send_notification(&mut self, notification: JsonRpcNotification) -> McpResult<()>;

    /// Poll for a pending server notification (non-blocking)
    async fn receive_notification(&mut self) -> McpResult<Option<JsonRpcNotification>>;

    /// Poll for a pending server-initiated request (non-blocking)
    async fn receive_server_request(&mut self) -> McpResult<Option<JsonRpcRequest>> {
        Ok(None)
    }

    /// Answer a server-initiated request
    async fn send_response(&mut self, _response: JsonRpcResponse) -> McpResult<()> {
        Err(McpError::transport(
            "Bidirectional communication not supported by this transport",
        ))
    }

    /// Answer a server-initiated request with an error
    async fn send_error(&mut self, _error: JsonRpcError) -> McpResult<()> {
        Err(McpError::transport(
            "Bidirectional communication not supported by this transport",
        ))
    }

    /// Close the transport connection
    async fn close(&mut self) -> McpResult<()>;

    /// Whether the transport is connected
    fn is_connected(&self) -> bool {
        true
    }

    /// Connection description for diagnostics
    fn connection_info(&self) -> String {
        "unknown transport".to_string()
    }
}

/// Transport configuration options
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Read timeout in milliseconds
    pub read_timeout_ms: Option<u64>,
    /// Maximum message size in bytes
    pub max_message_size: Option<usize>,
    /// Custom headers for HTTP-based transports
    pub headers: HashMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: Some(60_000),
            max_message_size: Some(16 * 1024 * 1024), // 16 MB
            headers: HashMap::new(),
        }
    }
}

/// Shared mutable slots every server transport carries: handler hooks,
/// version tag, running flag, and the stop signal.
#[derive(Default)]
pub struct TransportShared {
    handler: StdRwLock<Option<MessageHandler>>,
    debug: StdRwLock<Option<DebugHandler>>,
    session_end: StdRwLock<Option<SessionEndHandler>>,
    version: StdRwLock<ProtocolVersion>,
    running: AtomicBool,
    stop: StdRwLock<CancellationToken>,
}

impl TransportShared {
    /// Fresh shared state
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the message handler
    pub fn set_handler(&self, handler: MessageHandler) {
        *self.handler.write().expect("handler lock") = Some(handler);
    }

    /// The installed message handler
    pub fn handler(&self) -> Option<MessageHandler> {
        self.handler.read().expect("handler lock").clone()
    }

    /// Install the debug hook
    pub fn set_debug(&self, handler: DebugHandler) {
        *self.debug.write().expect("debug lock") = Some(handler);
    }

    /// Feed a line to the debug hook, if installed
    pub fn debug(&self, line: &str) {
        if let Some(hook) = self.debug.read().expect("debug lock").clone() {
            hook(line);
        }
    }

    /// Install the session-end hook
    pub fn set_session_end(&self, handler: SessionEndHandler) {
        *self.session_end.write().expect("session end lock") = Some(handler);
    }

    /// Report a transport-level session end
    pub fn session_ended(&self, session_id: String) {
        if let Some(hook) = self
            .session_end
            .read()
            .expect("session end lock")
            .clone()
        {
            hook(session_id);
        }
    }

    /// Tag the negotiated protocol version
    pub fn set_version(&self, version: ProtocolVersion) {
        *self.version.write().expect("version lock") = version;
    }

    /// The tagged protocol version
    pub fn version(&self) -> ProtocolVersion {
        *self.version.read().expect("version lock")
    }

    /// Mark the transport running or stopped
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Whether the transport is serving
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The current stop signal
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.read().expect("stop lock").clone()
    }

    /// Trigger the stop signal and arm a fresh one for restart
    pub fn trigger_stop(&self) {
        let mut stop = self.stop.write().expect("stop lock");
        stop.cancel();
        *stop = CancellationToken::new();
    }

    /// Run the installed handler for an inbound envelope
    pub async fn dispatch(&self, envelope: IncomingEnvelope) -> Option<OutboundEnvelope> {
        let handler = self.handler()?;
        handler(envelope).await
    }
}

impl std::fmt::Debug for TransportShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportShared")
            .field("running", &self.is_running())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.read_timeout_ms, Some(60_000));
        assert_eq!(config.max_message_size, Some(16 * 1024 * 1024));
    }

    #[tokio::test]
    async fn test_shared_dispatch() {
        let shared = TransportShared::new();
        assert!(shared.dispatch(IncomingEnvelope::default()).await.is_none());

        shared.set_handler(Arc::new(|envelope: IncomingEnvelope| {
            Box::pin(async move {
                Some(OutboundEnvelope {
                    payload: format!("echo:{}", envelope.payload),
                    session_id: envelope.session_id,
                })
            })
        }));

        let reply = shared
            .dispatch(IncomingEnvelope {
                payload: "hi".to_string(),
                session_id: Some("s".to_string()),
                env: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(reply.payload, "echo:hi");
        assert_eq!(reply.session_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_shared_version_tagging() {
        let shared = TransportShared::new();
        assert_eq!(shared.version(), ProtocolVersion::default());
        shared.set_version(ProtocolVersion::Draft);
        assert_eq!(shared.version(), ProtocolVersion::Draft);
    }

    #[test]
    fn test_stop_token_rearms() {
        let shared = TransportShared::new();
        let first = shared.stop_token();
        shared.trigger_stop();
        assert!(first.is_cancelled());
        assert!(!shared.stop_token().is_cancelled());
    }
}
