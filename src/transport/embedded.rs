//! Embedded (in-process) transport
//!
//! A channel pair for library use: the server half feeds inbound frames
//! through the dispatcher exactly like a network transport would, and the
//! client half implements the client-side [`Transport`] trait with full
//! bidirectional support. One implicit session spans the pair's lifetime.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Duration, timeout};

use crate::core::error::{McpError, McpResult};
use crate::protocol::batch::ResponseFrame;
use crate::protocol::types::{
    ErrorObject, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::protocol::version::ProtocolVersion;
use crate::server::session::generate_session_id;
use crate::transport::traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport, Transport,
    TransportConfig, TransportShared,
};

/// Server half of the in-process channel pair
pub struct EmbeddedServerTransport {
    shared: Arc<TransportShared>,
    session_id: String,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl EmbeddedServerTransport {
    /// Create a connected pair: the server half and the client half
    pub fn pair() -> (EmbeddedServerTransport, EmbeddedClientTransport) {
        let (client_tx, server_rx) = mpsc::unbounded_channel::<String>();
        let (server_tx, client_rx) = mpsc::unbounded_channel::<String>();

        let server = EmbeddedServerTransport {
            shared: Arc::new(TransportShared::new()),
            session_id: generate_session_id(),
            inbound: Mutex::new(Some(server_rx)),
            outbound: server_tx,
        };
        let client = EmbeddedClientTransport::new(client_tx, client_rx);
        (server, client)
    }

    /// Session id bound to this pair
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl ServerTransport for EmbeddedServerTransport {
    async fn start(&self) -> McpResult<()> {
        let mut inbound = self
            .inbound
            .lock()
            .await
            .take()
            .ok_or_else(|| McpError::transport("Embedded transport already started"))?;

        self.shared.set_running(true);
        let stop = self.shared.stop_token();
        let shared = self.shared.clone();
        let outbound = self.outbound.clone();
        let session_id = self.session_id.clone();

        loop {
            tokio::select! {
                received = inbound.recv() => {
                    let Some(payload) = received else { break };
                    let shared = shared.clone();
                    let outbound = outbound.clone();
                    let session_id = session_id.clone();
                    tokio::spawn(async move {
                        let envelope = IncomingEnvelope {
                            payload,
                            session_id: Some(session_id),
                            env: HashMap::new(),
                        };
                        if let Some(reply) = shared.dispatch(envelope).await {
                            let _ = outbound.send(reply.payload);
                        }
                    });
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
        self.outbound
            .send(envelope.payload)
            .map_err(|_| McpError::transport("Embedded peer disconnected"))
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
        format!("embedded transport (session {})", self.session_id)
    }
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ResponseFrame>>>>;

/// Client half of the in-process channel pair
pub struct EmbeddedClientTransport {
    to_server: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    notifications: mpsc::UnboundedReceiver<JsonRpcNotification>,
    server_requests: mpsc::UnboundedReceiver<JsonRpcRequest>,
    config: TransportConfig,
    connected: bool,
}

impl EmbeddedClientTransport {
    fn new(
        to_server: mpsc::UnboundedSender<String>,
        mut from_server: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notification_tx, notifications) = mpsc::unbounded_channel();
        let (request_tx, server_requests) = mpsc::unbounded_channel();

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(line) = from_server.recv().await {
                route_frame(&line, &reader_pending, &notification_tx, &request_tx).await;
            }
        });

        Self {
            to_server,
            pending,
            notifications,
            server_requests,
            config: TransportConfig::default(),
            connected: true,
        }
    }
}

/// Route one server-to-client frame: responses to their waiters,
/// notifications and server-initiated requests to their queues.
async fn route_frame(
    line: &str,
    pending: &PendingMap,
    notifications: &mpsc::UnboundedSender<JsonRpcNotification>,
    requests: &mpsc::UnboundedSender<JsonRpcRequest>,
) {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        tracing::debug!("embedded client dropping unparseable frame");
        return;
    };
    let Some(obj) = value.as_object() else {
        return;
    };

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
        None => tracing::debug!("embedded client got response for unknown id {id}"),
    }
}

#[async_trait]
impl Transport for EmbeddedClientTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> McpResult<ResponseFrame> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request.id.clone(), tx);
        }

        let payload = serde_json::to_string(&request).map_err(McpError::serialization)?;
        self.to_server
            .send(payload)
            .map_err(|_| McpError::transport("Embedded server disconnected"))?;

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
        self.to_server
            .send(payload)
            .map_err(|_| McpError::transport("Embedded server disconnected"))
    }

    async fn receive_notification(&mut self) -> McpResult<Option<JsonRpcNotification>> {
        match self.notifications.try_recv() {
            Ok(notification) => Ok(Some(notification)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(McpError::transport("Notification channel disconnected"))
            }
        }
    }

    async fn receive_server_request(&mut self) -> McpResult<Option<JsonRpcRequest>> {
        match self.server_requests.try_recv() {
            Ok(request) => Ok(Some(request)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(McpError::transport("Request channel disconnected"))
            }
        }
    }

    async fn send_response(&mut self, response: JsonRpcResponse) -> McpResult<()> {
        let payload = serde_json::to_string(&response).map_err(McpError::serialization)?;
        self.to_server
            .send(payload)
            .map_err(|_| McpError::transport("Embedded server disconnected"))
    }

    async fn send_error(&mut self, error: crate::protocol::types::JsonRpcError) -> McpResult<()> {
        let payload = serde_json::to_string(&error).map_err(McpError::serialization)?;
        self.to_server
            .send(payload)
            .map_err(|_| McpError::transport("Embedded server disconnected"))
    }

    async fn close(&mut self) -> McpResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connection_info(&self) -> String {
        "embedded transport".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (server, mut client) = EmbeddedServerTransport::pair();
        server.set_message_handler(Arc::new(|envelope: IncomingEnvelope| {
            Box::pin(async move {
                let request: JsonRpcRequest = serde_json::from_str(&envelope.payload).ok()?;
                let response = JsonRpcResponse::success(request.id, json!({"echo": true}));
                Some(OutboundEnvelope {
                    payload: serde_json::to_string(&response).ok()?,
                    session_id: envelope.session_id,
                })
            })
        }));

        let server = Arc::new(server);
        let serve = {
            let server = server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let request =
            JsonRpcRequest::new(RequestId::Number(1), "ping", None::<Value>).unwrap();
        let frame = client.send_request(request).await.unwrap();
        assert_eq!(frame.result, Some(json!({"echo": true})));

        server.stop().await.unwrap();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_push_notification() {
        let (server, mut client) = EmbeddedServerTransport::pair();
        let notification = JsonRpcNotification::new(
            "notifications/tools/list_changed",
            None::<Value>,
        )
        .unwrap();
        server
            .send(OutboundEnvelope {
                payload: serde_json::to_string(&notification).unwrap(),
                session_id: None,
            })
            .await
            .unwrap();

        // The router task needs a tick to deliver
        tokio::time::sleep(Duration::from_millis(20)).await;
        let received = client.receive_notification().await.unwrap().unwrap();
        assert_eq!(received.method, "notifications/tools/list_changed");
    }
}
