//! Unix domain socket transport
//!
//! Framing is identical to stdio: newline-delimited JSON-RPC frames,
//! non-envelope lines fed to the debug hook and dropped. Each accepted
//! connection is bound to its own connection-scoped session.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc};

use crate::core::error::{McpError, McpResult};
use crate::protocol::batch::is_jsonrpc_envelope;
use crate::protocol::version::ProtocolVersion;
use crate::server::session::generate_session_id;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
    SessionEndHandler, TransportShared,
};

type ConnectionMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<String>>>>;

/// Unix domain socket transport for MCP servers
pub struct UnixServerTransport {
    shared: Arc<TransportShared>,
    path: PathBuf,
    connections: ConnectionMap,
}

impl UnixServerTransport {
    /// Create a transport serving at the given socket path
    pub fn new(path: PathBuf) -> Self {
        Self {
            shared: Arc::new(TransportShared::new()),
            path,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn serve_connection(
        stream: UnixStream,
        shared: Arc<TransportShared>,
        connections: ConnectionMap,
    ) {
        let session_id = generate_session_id();
        let (read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        {
            let mut connections = connections.lock().await;
            connections.insert(session_id.clone(), out_tx.clone());
        }

        let writer = tokio::spawn(async move {
            while let Some(payload) = out_rx.recv().await {
                if write_half.write_all(payload.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
                if write_half.flush().await.is_err() {
                    break;
                }
            }
        });

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
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
                Err(e) => {
                    tracing::debug!("unix socket read failed: {e}");
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
impl ServerTransport for UnixServerTransport {
    async fn start(&self) -> McpResult<()> {
        // A stale socket file from a previous run refuses the bind
        let _ = std::fs::remove_file(&self.path);
        let listener = UnixListener::bind(&self.path)
            .map_err(|e| McpError::transport(format!("Failed to bind unix socket: {e}")))?;
        tracing::debug!(path = %self.path.display(), "unix transport listening");
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
                        Err(e) => {
                            tracing::warn!("unix accept failed: {e}");
                        }
                    }
                }
                _ = stop.cancelled() => break,
            }
        }

        self.shared.set_running(false);
        let _ = std::fs::remove_file(&self.path);
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
        format!("unix socket transport ({})", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{JsonRpcRequest, JsonRpcResponse, RequestId};
    use serde_json::{Value, json};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_unix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.sock");
        let transport = Arc::new(UnixServerTransport::new(path.clone()));

        transport.set_message_handler(Arc::new(|envelope: IncomingEnvelope| {
            Box::pin(async move {
                let request: JsonRpcRequest = serde_json::from_str(&envelope.payload).ok()?;
                let response = JsonRpcResponse::success(request.id, json!({"via": "unix"}));
                Some(OutboundEnvelope {
                    payload: serde_json::to_string(&response).ok()?,
                    session_id: envelope.session_id,
                })
            })
        }));

        let serve = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.start().await })
        };

        // Wait for the socket file to appear
        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let request =
            JsonRpcRequest::new(RequestId::Number(1), "ping", None::<Value>).unwrap();
        let payload = format!("{}\n", serde_json::to_string(&request).unwrap());
        stream.write_all(payload.as_bytes()).await.unwrap();

        let mut buffer = vec![0u8; 4096];
        let read = stream.read(&mut buffer).await.unwrap();
        let reply: Value = serde_json::from_slice(&buffer[..read]).unwrap();
        assert_eq!(reply["result"]["via"], json!("unix"));

        transport.stop().await.unwrap();
        serve.await.unwrap().unwrap();
    }
}
