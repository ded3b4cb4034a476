//! WebSocket server transport
//!
//! Full-duplex text frames over an accepted TCP connection. Each
//! connection is bound to its own connection-scoped session; binary,
//! ping, and pong frames are handled at the protocol layer and never
//! reach the dispatcher.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::core::error::{McpError, McpResult};
use crate::protocol::batch::is_jsonrpc_envelope;
use crate::protocol::version::ProtocolVersion;
use crate::server::session::generate_session_id;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
    SessionEndHandler, TransportShared,
};

type ConnectionMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>;

/// WebSocket transport for MCP servers
pub struct WebSocketServerTransport {
    shared: Arc<TransportShared>,
    bind_addr: String,
    connections: ConnectionMap,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
    listener: Mutex<Option<TcpListener>>,
}

impl WebSocketServerTransport {
    /// Create a transport bound to `addr` on start
    pub fn new(addr: String) -> Self {
        Self {
            shared: Arc::new(TransportShared::new()),
            bind_addr: addr,
            connections: Arc::new(Mutex::new(HashMap::new())),
            local_addr: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// The locally bound address, once initialized
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }

    async fn serve_connection(
        stream: TcpStream,
        shared: Arc<TransportShared>,
        connections: ConnectionMap,
    ) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!("websocket handshake failed: {e}");
                return;
            }
        };

        let session_id = generate_session_id();
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        {
            let mut connections = connections.lock().await;
            connections.insert(session_id.clone(), out_tx.clone());
        }

        let writer = tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if !is_jsonrpc_envelope(trimmed) {
                        shared.debug(trimmed);
                        continue;
                    }

                    let shared = shared.clone();
                    let out_tx = out_tx.clone();
                    let envelope = IncomingEnvelope {
                        payload: trimmed.to_string(),
                        session_id: Some(session_id.clone()),
                        env: HashMap::new(),
                    };
                    tokio::spawn(async move {
                        if let Some(reply) = shared.dispatch(envelope).await {
                            let _ = out_tx.send(reply.payload);
                        }
                    });
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Handled by tungstenite
                }
                Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {
                    tracing::trace!("ignoring non-text websocket frame");
                }
                Err(e) => {
                    tracing::debug!("websocket receive failed: {e}");
                    break;
                }
            }
        }

        writer.abort();
        {
            let mut connections = connections.lock().await;
            connections.remove(&session_id);
        }
        shared.session_ended(session_id);
    }
}

#[async_trait]
impl ServerTransport for WebSocketServerTransport {
    async fn initialize(&self) -> McpResult<()> {
        if self.listener.lock().await.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| McpError::WebSocket(format!("Failed to bind {}: {e}", self.bind_addr)))?;
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
            .ok_or_else(|| McpError::WebSocket("WebSocket listener not bound".to_string()))?;

        tracing::info!(addr = %self.bind_addr, "websocket transport listening");
        self.shared.set_running(true);

        let stop = self.shared.stop_token();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(Self::serve_connection(
                                stream,
                                self.shared.clone(),
                                self.connections.clone(),
                            ));
                        }
                        Err(e) => tracing::warn!("websocket accept failed: {e}"),
                    }
                }
                _ = stop.cancelled() => break,
            }
        }

        self.shared.set_running(false);
        Ok(())
    }

    async fn stop(&self) -> McpResult<()> {
        self.shared.trigger_stop();
        Ok(())
    }

    async fn send(&self, envelope: OutboundEnvelope) -> McpResult<()> {
        let connections = self.connections.lock().await;
        match &envelope.session_id {
            Some(session_id) => {
                let sender = connections.get(session_id).ok_or_else(|| {
                    McpError::connection(format!("No connection for session {session_id}"))
                })?;
                sender
                    .send(envelope.payload)
                    .map_err(|_| McpError::connection("Connection closed"))
            }
            None => {
                for sender in connections.values() {
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
        format!("websocket transport ({})", self.bind_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{JsonRpcRequest, JsonRpcResponse, RequestId};
    use serde_json::{Value, json};
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let transport = Arc::new(WebSocketServerTransport::new("127.0.0.1:0".to_string()));
        transport.set_message_handler(Arc::new(|envelope: IncomingEnvelope| {
            Box::pin(async move {
                let request: JsonRpcRequest = serde_json::from_str(&envelope.payload).ok()?;
                let response = JsonRpcResponse::success(request.id, json!({"via": "ws"}));
                Some(OutboundEnvelope {
                    payload: serde_json::to_string(&response).ok()?,
                    session_id: envelope.session_id,
                })
            })
        }));

        transport.initialize().await.unwrap();
        let addr = transport.local_addr().await.unwrap();
        let serve = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.start().await })
        };

        let (mut socket, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let request =
            JsonRpcRequest::new(RequestId::Number(1), "ping", None::<Value>).unwrap();
        socket
            .send(Message::Text(
                serde_json::to_string(&request).unwrap().into(),
            ))
            .await
            .unwrap();

        let reply = loop {
            match socket.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["result"]["via"], json!("ws"));

        transport.stop().await.unwrap();
        serve.await.unwrap().unwrap();
    }
}
