//! STDIO transport
//!
//! Frames are newline-delimited. Inbound lines that are not well-formed
//! JSON-RPC envelopes are handed to the debug hook and discarded, so a
//! child process may emit stray log lines on stdout without crashing the
//! peer. Server diagnostics go to stderr via `tracing`, never stdout.
//!
//! There is exactly one implicit session per process; its environment is
//! snapshotted from the OS environment at transport construction.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Duration, timeout};

use crate::core::error::{McpError, McpResult};
use crate::protocol::batch::{ResponseFrame, is_jsonrpc_envelope};
use crate::protocol::types::{
    ErrorObject, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::protocol::version::ProtocolVersion;
use crate::server::session::generate_session_id;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport, Transport,
    TransportConfig, TransportShared,
};

/// STDIO transport for MCP servers
pub struct StdioServerTransport {
    shared: Arc<TransportShared>,
    session_id: String,
    env: HashMap<String, String>,
    writer: Arc<Mutex<BufWriter<tokio::io::Stdout>>>,
}

impl StdioServerTransport {
    /// Create a new STDIO server transport
    pub fn new() -> Self {
        Self {
            shared: Arc::new(TransportShared::new()),
            session_id: generate_session_id(),
            env: std::env::vars().collect(),
            writer: Arc::new(Mutex::new(BufWriter::new(tokio::io::stdout()))),
        }
    }

    async fn write_line(
        writer: &Mutex<BufWriter<tokio::io::Stdout>>,
        payload: &str,
    ) -> McpResult<()> {
        let mut writer = writer.lock().await;
        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| McpError::transport(format!("Failed to write frame: {e}")))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::transport(format!("Failed to write newline: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("Failed to flush: {e}")))
    }
}

impl Default for StdioServerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerTransport for StdioServerTransport {
    async fn start(&self) -> McpResult<()> {
        tracing::debug!("starting STDIO server transport");
        let mut reader = BufReader::new(tokio::io::stdin());
        self.shared.set_running(true);

        let stop = self.shared.stop_token();
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                _ = stop.cancelled() => break,
            };

            match read {
                Ok(0) => {
                    tracing::debug!("stdin closed, stopping");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if !is_jsonrpc_envelope(trimmed) {
                        self.shared.debug(trimmed);
                        continue;
                    }

                    let shared = self.shared.clone();
                    let writer = self.writer.clone();
                    let envelope = IncomingEnvelope {
                        payload: trimmed.to_string(),
                        session_id: Some(self.session_id.clone()),
                        env: self.env.clone(),
                    };
                    // A slow handler must not block the read loop
                    tokio::spawn(async move {
                        if let Some(reply) = shared.dispatch(envelope).await {
                            if let Err(e) = Self::write_line(&writer, &reply.payload).await {
                                tracing::error!("stdio write failed: {e}");
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("error reading stdin: {e}");
                    self.shared.set_running(false);
                    return Err(McpError::io(e));
                }
            }
        }

        self.shared.set_running(false);
        Ok(())
    }

    async fn stop(&self) -> McpResult<()> {
        tracing::debug!("stopping STDIO server transport");
        self.shared.trigger_stop();
        Ok(())
    }

    async fn send(&self, envelope: OutboundEnvelope) -> McpResult<()> {
        Self::write_line(&self.writer, &envelope.payload).await
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

    fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    fn transport_info(&self) -> String {
        format!("stdio transport (running: {})", self.is_running())
    }
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseFrame>>>>;

/// STDIO transport for MCP clients: spawns the server as a child process
/// and speaks newline-delimited frames over its pipes
pub struct StdioClientTransport {
    child: Option<Child>,
    stdin_writer: Option<BufWriter<tokio::process::ChildStdin>>,
    pending: PendingMap,
    notifications: Option<mpsc::UnboundedReceiver<JsonRpcNotification>>,
    server_requests: Option<mpsc::UnboundedReceiver<JsonRpcRequest>>,
    config: TransportConfig,
    connected: bool,
}

impl StdioClientTransport {
    /// Spawn `command args` and connect to its stdio
    pub async fn new<S: AsRef<str>>(command: S, args: Vec<S>) -> McpResult<Self> {
        Self::with_config(command, args, TransportConfig::default()).await
    }

    /// Spawn with custom transport configuration
    pub async fn with_config<S: AsRef<str>>(
        command: S,
        args: Vec<S>,
        config: TransportConfig,
    ) -> McpResult<Self> {
        let command_str = command.as_ref();
        let args_str: Vec<&str> = args.iter().map(|s| s.as_ref()).collect();

        tracing::debug!("starting MCP server: {} {:?}", command_str, args_str);

        let mut child = Command::new(command_str)
            .args(&args_str)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| McpError::transport(format!("Failed to start server process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::transport("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::transport("Failed to get stdout handle"))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notification_tx, notifications) = mpsc::unbounded_channel();
        let (request_tx, server_requests) = mpsc::unbounded_channel();

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            Self::read_loop(
                BufReader::new(stdout),
                reader_pending,
                notification_tx,
                request_tx,
            )
            .await;
        });

        Ok(Self {
            child: Some(child),
            stdin_writer: Some(BufWriter::new(stdin)),
            pending,
            notifications: Some(notifications),
            server_requests: Some(server_requests),
            config,
            connected: true,
        })
    }

    async fn read_loop(
        mut reader: BufReader<tokio::process::ChildStdout>,
        pending: PendingMap,
        notifications: mpsc::UnboundedSender<JsonRpcNotification>,
        requests: mpsc::UnboundedSender<JsonRpcRequest>,
    ) {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tracing::debug!("server stdout reached EOF");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if !is_jsonrpc_envelope(trimmed) {
                        // Child processes may log on stdout; ignore
                        tracing::trace!("non-envelope line dropped: {trimmed}");
                        continue;
                    }
                    Self::route_line(trimmed, &pending, &notifications, &requests).await;
                }
                Err(e) => {
                    tracing::error!("error reading server stdout: {e}");
                    break;
                }
            }
        }
    }

    async fn route_line(
        line: &str,
        pending: &PendingMap,
        notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
        requests: &mpsc::UnboundedSender<JsonRpcRequest>,
    ) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            return;
        };
        let Some(obj) = value.as_object() else { return };

        if obj.contains_key("method") {
            if obj.contains_key("id") {
                if let Ok(request) = serde_json::from_value::<JsonRpcRequest>(value.clone()) {
                    let _ = requests.send(request);
                }
            } else if let Ok(notification) =
                serde_json::from_value::<JsonRpcNotification>(value.clone())
            {
                let _ = notifications.send(notification);
            }
            return;
        }

        let Some(id) = obj
            .get("id")
            .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok())
        else {
            return;
        };
        let frame = ResponseFrame {
            id: id.clone(),
            result: obj.get("result").cloned(),
            error: obj
                .get("error")
                .and_then(|e| serde_json::from_value::<ErrorObject>(e.clone()).ok()),
        };
        let sender = pending.lock().await.remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => tracing::warn!("response for unknown request id {id}"),
        }
    }

    async fn write_line(&mut self, payload: &str) -> McpResult<()> {
        let writer = self
            .stdin_writer
            .as_mut()
            .ok_or_else(|| McpError::transport("Transport not connected"))?;
        writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| McpError::transport(format!("Failed to write frame: {e}")))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::transport(format!("Failed to write newline: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::transport(format!("Failed to flush: {e}")))
    }
}

#[async_trait]
impl Transport for StdioClientTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> McpResult<ResponseFrame> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request.id.clone(), tx);
        }

        let payload = serde_json::to_string(&request).map_err(McpError::serialization)?;
        self.write_line(&payload).await?;

        let wait = Duration::from_millis(self.config.read_timeout_ms.unwrap_or(60_000));
        match timeout(wait, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(McpError::transport("Response channel closed")),
            Err(_) => {
                self.pending.lock().await.remove(&request.id);
                Err(McpError::timeout("Request timeout"))
            }
        }
    }

    async fn send_notification(&mut self, notification: JsonRpcNotification) -> McpResult<()> {
        let payload = serde_json::to_string(&notification).map_err(McpError::serialization)?;
        self.write_line(&payload).await
    }

    async fn receive_notification(&mut self) -> McpResult<Option<JsonRpcNotification>> {
        let Some(receiver) = self.notifications.as_mut() else {
            return Ok(None);
        };
        match receiver.try_recv() {
            Ok(notification) => Ok(Some(notification)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(McpError::transport("Notification channel disconnected"))
            }
        }
    }

    async fn receive_server_request(&mut self) -> McpResult<Option<JsonRpcRequest>> {
        let Some(receiver) = self.server_requests.as_mut() else {
            return Ok(None);
        };
        match receiver.try_recv() {
            Ok(request) => Ok(Some(request)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(McpError::transport("Request channel disconnected"))
            }
        }
    }

    async fn send_response(&mut self, response: JsonRpcResponse) -> McpResult<()> {
        let payload = serde_json::to_string(&response).map_err(McpError::serialization)?;
        self.write_line(&payload).await
    }

    async fn send_error(&mut self, error: crate::protocol::types::JsonRpcError) -> McpResult<()> {
        let payload = serde_json::to_string(&error).map_err(McpError::serialization)?;
        self.write_line(&payload).await
    }

    async fn close(&mut self) -> McpResult<()> {
        tracing::debug!("closing STDIO transport");
        self.connected = false;

        if let Some(mut writer) = self.stdin_writer.take() {
            let _ = writer.shutdown().await;
        }

        if let Some(mut child) = self.child.take() {
            match timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("server process exited with status: {status}");
                }
                Ok(Err(e)) => {
                    tracing::warn!("error waiting for server process: {e}");
                }
                Err(_) => {
                    tracing::warn!("timeout waiting for server process, killing it");
                    let _ = child.kill().await;
                }
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_info(&self) -> String {
        format!("stdio transport (connected: {})", self.connected)
    }
}

impl Drop for StdioClientTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_transport_creation() {
        let transport = StdioServerTransport::new();
        assert!(!transport.is_running());
        assert!(!transport.session_id.is_empty());
    }

    #[tokio::test]
    async fn test_client_spawn_failure() {
        let result = StdioClientTransport::new("/nonexistent/command", vec!["arg1"]).await;
        assert!(matches!(result, Err(McpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_client_send_when_disconnected() {
        let mut transport = StdioClientTransport {
            child: None,
            stdin_writer: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            notifications: None,
            server_requests: None,
            config: TransportConfig::default(),
            connected: false,
        };

        let request = JsonRpcRequest::new(
            RequestId::Number(1),
            "ping",
            None::<serde_json::Value>,
        )
        .unwrap();
        assert!(matches!(
            transport.send_request(request).await,
            Err(McpError::Transport(_))
        ));
    }
}
