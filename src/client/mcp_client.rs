//! MCP client implementation
//!
//! Connects over a client [`Transport`], performs the initialize
//! handshake (including version negotiation), and exposes typed wrappers
//! for every server operation. Server-initiated requests are answered by
//! the installed [`ClientRequestHandler`] when the application pumps
//! `process_server_requests`.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::client::request_handler::ClientRequestHandler;
use crate::core::error::{McpError, McpResult};
use crate::core::logging::LoggingLevel;
use crate::protocol::content::{normalize_raw_content, parse_resource_contents};
use crate::protocol::messages::*;
use crate::protocol::methods;
use crate::protocol::types::{
    ClientCapabilities, ClientInfo, ContentItem, ErrorObject, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, ResourceContents, ServerCapabilities, ServerInfo,
    error_codes,
};
use crate::protocol::version::ProtocolVersion;
use crate::transport::traits::Transport;

/// Tool call outcome with version differences normalized away
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    /// Content items
    pub content: Vec<ContentItem>,
    /// Whether the tool reported a domain error
    pub is_error: bool,
}

/// Main MCP client
pub struct McpClient {
    info: ClientInfo,
    capabilities: ClientCapabilities,
    requested_version: String,
    transport: Mutex<Option<Box<dyn Transport>>>,
    request_handler: RwLock<Option<Arc<dyn ClientRequestHandler>>>,
    server_info: RwLock<Option<ServerInfo>>,
    server_capabilities: RwLock<Option<ServerCapabilities>>,
    negotiated_version: RwLock<Option<ProtocolVersion>>,
    next_id: AtomicI64,
}

impl McpClient {
    /// Create a client with the given identity
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ClientInfo {
                name: name.into(),
                version: version.into(),
                roots: None,
            },
            capabilities: ClientCapabilities::default(),
            requested_version: ProtocolVersion::default().as_str().to_string(),
            transport: Mutex::new(None),
            request_handler: RwLock::new(None),
            server_info: RwLock::new(None),
            server_capabilities: RwLock::new(None),
            negotiated_version: RwLock::new(None),
            next_id: AtomicI64::new(0),
        }
    }

    /// Set the capabilities announced at initialize
    pub fn set_capabilities(&mut self, capabilities: ClientCapabilities) {
        self.capabilities = capabilities;
    }

    /// Set the protocol version requested at initialize (`latest` allowed)
    pub fn set_requested_version(&mut self, version: impl Into<String>) {
        self.requested_version = version.into();
    }

    /// Announce initial workspace roots in the client info
    pub fn set_roots(&mut self, roots: Vec<crate::protocol::types::Root>) {
        self.info.roots = Some(roots);
    }

    /// Install the handler answering server-initiated requests
    pub async fn set_request_handler<H>(&self, handler: H)
    where
        H: ClientRequestHandler + 'static,
    {
        let mut slot = self.request_handler.write().await;
        *slot = Some(Arc::new(handler));
    }

    /// Server identity, after connect
    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    /// Server capabilities, after connect
    pub async fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.read().await.clone()
    }

    /// Negotiated protocol version, after connect
    pub async fn protocol_version(&self) -> Option<ProtocolVersion> {
        *self.negotiated_version.read().await
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect over a transport: initialize, then announce initialized
    pub async fn connect<T>(&self, transport: T) -> McpResult<InitializeResult>
    where
        T: Transport + 'static,
    {
        {
            let mut slot = self.transport.lock().await;
            *slot = Some(Box::new(transport));
        }

        let params = InitializeParams {
            protocol_version: self.requested_version.clone(),
            capabilities: self.capabilities.clone(),
            client_info: self.info.clone(),
        };
        let result = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        let version: ProtocolVersion = result.protocol_version.parse()?;
        {
            *self.negotiated_version.write().await = Some(version);
            *self.server_info.write().await = Some(result.server_info.clone());
            *self.server_capabilities.write().await = Some(result.capabilities.clone());
        }

        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    /// Close the transport
    pub async fn disconnect(&self) -> McpResult<()> {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.as_mut() {
            transport.close().await?;
        }
        *slot = None;
        Ok(())
    }

    /// Whether a transport is connected
    pub async fn is_connected(&self) -> bool {
        let slot = self.transport.lock().await;
        slot.as_ref().is_some_and(|t| t.is_connected())
    }

    // ========================================================================
    // Request plumbing
    // ========================================================================

    fn allocate_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.allocate_id(),
            method: method.to_string(),
            params,
        };

        let frame = {
            let mut slot = self.transport.lock().await;
            let transport = slot
                .as_mut()
                .ok_or_else(|| McpError::connection("Client not connected"))?;
            transport.send_request(request).await?
        };

        if let Some(error) = frame.error {
            return Err(error_from_object(method, error));
        }
        frame
            .result
            .ok_or_else(|| McpError::protocol(format!("{method} response carried no result")))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        let mut slot = self.transport.lock().await;
        let transport = slot
            .as_mut()
            .ok_or_else(|| McpError::connection("Client not connected"))?;
        transport.send_notification(notification).await
    }

    // ========================================================================
    // Server operations
    // ========================================================================

    /// Issue an arbitrary request and return its raw result.
    ///
    /// Escape hatch for methods the typed wrappers do not cover, and for
    /// callers that need to attach `_meta` entries such as progress
    /// tokens.
    pub async fn request_raw(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.request(method, params).await
    }

    /// `ping`
    pub async fn ping(&self) -> McpResult<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// `shutdown`
    pub async fn shutdown(&self) -> McpResult<()> {
        self.request(methods::SHUTDOWN, None).await.map(|_| ())
    }

    /// `tools/list`
    pub async fn list_tools(&self, cursor: Option<String>) -> McpResult<ListToolsResult> {
        let params = serde_json::to_value(ListToolsParams { cursor })?;
        let result = self.request(methods::TOOLS_LIST, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `tools/call`
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
    ) -> McpResult<ToolCallOutcome> {
        let params = serde_json::to_value(CallToolParams {
            name: name.into(),
            arguments,
        })?;
        let result = self.request(methods::TOOLS_CALL, Some(params)).await?;
        Ok(ToolCallOutcome {
            content: result
                .get("content")
                .and_then(Value::as_array)
                .map(|items| normalize_raw_content(items))
                .unwrap_or_default(),
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// `resources/list`
    pub async fn list_resources(&self, cursor: Option<String>) -> McpResult<ListResourcesResult> {
        let params = serde_json::to_value(ListResourcesParams { cursor })?;
        let result = self.request(methods::RESOURCES_LIST, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `resources/templates/list`
    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> McpResult<ListResourceTemplatesResult> {
        let params = serde_json::to_value(ListResourcesParams { cursor })?;
        let result = self
            .request(methods::RESOURCES_TEMPLATES_LIST, Some(params))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `resources/read`
    pub async fn read_resource(&self, uri: impl Into<String>) -> McpResult<ResourceContents> {
        let params = serde_json::to_value(ReadResourceParams {
            uri: uri.into(),
            arguments: None,
        })?;
        let result = self.request(methods::RESOURCES_READ, Some(params)).await?;
        Ok(parse_resource_contents(&result))
    }

    /// `resources/subscribe`
    pub async fn subscribe_resource(&self, uri: impl Into<String>) -> McpResult<()> {
        let params = serde_json::to_value(ResourceSubscriptionParams { uri: uri.into() })?;
        self.request(methods::RESOURCES_SUBSCRIBE, Some(params))
            .await
            .map(|_| ())
    }

    /// `resources/unsubscribe`
    pub async fn unsubscribe_resource(&self, uri: impl Into<String>) -> McpResult<()> {
        let params = serde_json::to_value(ResourceSubscriptionParams { uri: uri.into() })?;
        self.request(methods::RESOURCES_UNSUBSCRIBE, Some(params))
            .await
            .map(|_| ())
    }

    /// `prompts/list`
    pub async fn list_prompts(&self, cursor: Option<String>) -> McpResult<ListPromptsResult> {
        let params = serde_json::to_value(ListPromptsParams { cursor })?;
        let result = self.request(methods::PROMPTS_LIST, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `prompts/get`
    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
    ) -> McpResult<GetPromptResult> {
        let params = serde_json::to_value(GetPromptParams {
            name: name.into(),
            arguments,
        })?;
        let result = self.request(methods::PROMPTS_GET, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// `logging/setLevel`
    pub async fn set_logging_level(&self, level: LoggingLevel) -> McpResult<()> {
        let params = serde_json::to_value(SetLevelParams { level })?;
        self.request(methods::LOGGING_SET_LEVEL, Some(params))
            .await
            .map(|_| ())
    }

    /// `completion/complete`
    pub async fn complete(
        &self,
        reference: CompletionReference,
        argument: CompletionArgument,
    ) -> McpResult<CompleteResult> {
        let params = serde_json::to_value(CompleteParams {
            reference,
            argument,
        })?;
        let result = self
            .request(methods::COMPLETION_COMPLETE, Some(params))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send `notifications/cancelled` for an in-flight request
    pub async fn cancel_request(
        &self,
        request_id: RequestId,
        reason: Option<String>,
    ) -> McpResult<()> {
        let params = serde_json::to_value(CancelledParams { request_id, reason })?;
        self.notify(methods::CANCELLED, Some(params)).await
    }

    /// Send `notifications/progress` for a token this client owns
    pub async fn send_progress(
        &self,
        token: Value,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> McpResult<()> {
        let params = serde_json::to_value(ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        })?;
        self.notify(methods::PROGRESS, Some(params)).await
    }

    /// Poll for a pending server notification
    pub async fn receive_notification(&self) -> McpResult<Option<JsonRpcNotification>> {
        let mut slot = self.transport.lock().await;
        let transport = slot
            .as_mut()
            .ok_or_else(|| McpError::connection("Client not connected"))?;
        transport.receive_notification().await
    }

    // ========================================================================
    // Server-initiated requests
    // ========================================================================

    /// Answer all pending server-initiated requests.
    ///
    /// Returns the number of requests answered. Applications pump this
    /// between their own operations, or from a background task.
    pub async fn process_server_requests(&self) -> McpResult<usize> {
        let mut answered = 0;
        loop {
            let request = {
                let mut slot = self.transport.lock().await;
                let transport = slot
                    .as_mut()
                    .ok_or_else(|| McpError::connection("Client not connected"))?;
                transport.receive_server_request().await?
            };
            let Some(request) = request else {
                return Ok(answered);
            };

            let answer = self.answer_server_request(request).await;
            {
                let mut slot = self.transport.lock().await;
                let transport = slot
                    .as_mut()
                    .ok_or_else(|| McpError::connection("Client not connected"))?;
                match answer {
                    Ok(response) => transport.send_response(response).await?,
                    Err(error) => transport.send_error(error).await?,
                }
            }
            answered += 1;
        }
    }

    async fn answer_server_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, crate::protocol::types::JsonRpcError> {
        let handler = self.request_handler.read().await.clone();
        let result: McpResult<Value> = async {
            let Some(handler) = handler else {
                return Err(McpError::MethodNotFound(format!(
                    "no handler for server request {}",
                    request.method
                )));
            };
            match request.method.as_str() {
                methods::ROOTS_LIST => {
                    Ok(serde_json::to_value(handler.list_roots().await?)?)
                }
                methods::SAMPLING_CREATE_MESSAGE => {
                    let params: CreateMessageParams = serde_json::from_value(
                        request.params.clone().unwrap_or(Value::Null),
                    )
                    .map_err(|e| {
                        McpError::invalid_params(format!("sampling params: {e}"))
                    })?;
                    Ok(serde_json::to_value(handler.create_message(params).await?)?)
                }
                other => Err(McpError::MethodNotFound(other.to_string())),
            }
        }
        .await;

        match result {
            Ok(value) => Ok(JsonRpcResponse::success(request.id, value)),
            Err(e) => {
                tracing::debug!("server request {} failed: {e}", request.method);
                Err(crate::protocol::types::JsonRpcError::new(
                    Some(request.id),
                    e.jsonrpc_code(),
                    e.to_string(),
                ))
            }
        }
    }
}

fn error_from_object(method: &str, error: ErrorObject) -> McpError {
    match error.code {
        error_codes::METHOD_NOT_FOUND => McpError::MethodNotFound(error.message),
        error_codes::INVALID_PARAMS => McpError::InvalidParams(error.message),
        error_codes::INVALID_REQUEST => McpError::InvalidRequest(error.message),
        error_codes::PARSE_ERROR => McpError::Parse(error.message),
        _ => McpError::Protocol(format!("{method} failed ({}): {}", error.code, error.message)),
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.info.name)
            .field("version", &self.info.version)
            .finish_non_exhaustive()
    }
}

/// Builder for [`McpClient`]
#[derive(Debug)]
pub struct McpClientBuilder {
    client: McpClient,
}

impl McpClientBuilder {
    /// Start building a client with the given identity
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client: McpClient::new(name, version),
        }
    }

    /// Capabilities announced at initialize
    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.client.set_capabilities(capabilities);
        self
    }

    /// Protocol version requested at initialize
    pub fn requested_version(mut self, version: impl Into<String>) -> Self {
        self.client.set_requested_version(version);
        self
    }

    /// Initial workspace roots announced in the client info
    pub fn roots(mut self, roots: Vec<crate::protocol::types::Root>) -> Self {
        self.client.set_roots(roots);
        self
    }

    /// Build the client
    pub fn build(self) -> McpClient {
        self.client
    }
}
