//! MCP server implementation
//!
//! The programmatic surface: construct a server with a name and version,
//! register tools, resources, and prompts, select a transport with an
//! `as_*` call, and `run` to block until shutdown. Registration is allowed
//! at any time; changes made while clients are connected emit list-changed
//! notifications (queued per session until that session has sent
//! `notifications/initialized`).

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::core::completion::CompletionHandler;
use crate::core::error::{McpError, McpResult};
use crate::core::logging::LoggingLevel;
use crate::core::prompt::{Prompt, PromptTemplate};
use crate::core::resource::{Resource, ResourceHandler};
use crate::core::tool::{IntoToolResult, Tool, ToolHandler};
use crate::core::RequestContext;
use crate::protocol::messages::{
    CreateMessageParams, CreateMessageResult, ToolAnnotations,
};
use crate::protocol::types::{ResourceContents, ServerInfo};
use crate::server::capabilities::Category;
use crate::server::dispatch::Dispatcher;
use crate::server::session::{DEFAULT_SESSION_TTL, Session};
use crate::transport::traits::{IncomingEnvelope, ServerTransport};
use crate::utils::cursor::DEFAULT_PAGE_SIZE;

/// Configuration for the MCP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Entries per list page
    pub page_size: usize,
    /// Wait for client responses to server-initiated requests
    pub client_call_timeout: Duration,
    /// Idle window after which transports may evict sessions
    pub session_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            client_call_timeout: Duration::from_secs(10),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

/// Internal server state
#[derive(Debug, Clone, PartialEq)]
enum ServerState {
    Idle,
    Running,
    Stopped,
}

/// Main MCP server
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    transport: Mutex<Option<Arc<dyn ServerTransport>>>,
    state: RwLock<ServerState>,
}

impl McpServer {
    /// Create a server with the given name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_config(name, version, ServerConfig::default())
    }

    /// Create a server with custom configuration
    pub fn with_config(
        name: impl Into<String>,
        version: impl Into<String>,
        config: ServerConfig,
    ) -> Self {
        let info = ServerInfo::new(name.into(), version.into());
        Self {
            dispatcher: Dispatcher::new(info, config),
            transport: Mutex::new(None),
            state: RwLock::new(ServerState::Idle),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a tool with a typed argument struct.
    ///
    /// The input schema is derived from `A` at registration time; incoming
    /// arguments are validated and coerced against it before the handler
    /// runs.
    pub async fn tool<A, F, Fut, R>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> McpResult<()>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
        R: IntoToolResult + Send + 'static,
    {
        self.tool_with_annotations(name, description, None, handler)
            .await
    }

    /// Register a typed tool with behavior annotations
    pub async fn tool_with_annotations<A, F, Fut, R>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        annotations: Option<ToolAnnotations>,
        handler: F,
    ) -> McpResult<()>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
        R: IntoToolResult + Send + 'static,
    {
        self.dispatcher
            .tools
            .register_typed(name, description.into(), annotations, handler)
            .await?;
        self.dispatcher.notify_list_changed(Category::Tools)?;
        Ok(())
    }

    /// Register a tool with an explicit schema and raw handler
    pub async fn tool_raw<H>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: H,
    ) -> McpResult<()>
    where
        H: ToolHandler + 'static,
    {
        self.dispatcher
            .tools
            .register(Tool::new(
                name,
                Some(description.into()),
                input_schema,
                None,
                handler,
            ))
            .await;
        self.dispatcher.notify_list_changed(Category::Tools)?;
        Ok(())
    }

    /// Remove a tool; returns whether it existed
    pub async fn remove_tool(&self, name: &str) -> McpResult<bool> {
        let removed = self.dispatcher.tools.unregister(name).await;
        if removed {
            self.dispatcher.notify_list_changed(Category::Tools)?;
        }
        Ok(removed)
    }

    /// Register a resource from a URI pattern and raw handler.
    ///
    /// A pattern containing `{variable}` expressions registers a template
    /// resource; templates are listed by `resources/templates/list` and
    /// matched with path-variable extraction on read.
    pub async fn resource<H>(
        &self,
        uri_pattern: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mime_type: Option<String>,
        handler: H,
    ) -> McpResult<()>
    where
        H: ResourceHandler + 'static,
    {
        self.dispatcher
            .resources
            .register(Resource::new(
                uri_pattern,
                name,
                Some(description.into()),
                mime_type,
                handler,
            )?)
            .await;
        self.dispatcher.notify_list_changed(Category::Resources)?;
        Ok(())
    }

    /// Register a resource whose handler takes a typed argument struct
    pub async fn resource_typed<A, F, Fut>(
        &self,
        uri_pattern: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mime_type: Option<String>,
        handler: F,
    ) -> McpResult<()>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(RequestContext, String, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<ResourceContents>> + Send + 'static,
    {
        self.dispatcher
            .resources
            .register_typed(uri_pattern, name, description.into(), mime_type, handler)
            .await?;
        self.dispatcher.notify_list_changed(Category::Resources)?;
        Ok(())
    }

    /// Remove a resource by pattern; returns whether it existed
    pub async fn remove_resource(&self, uri_pattern: &str) -> McpResult<bool> {
        let removed = self.dispatcher.resources.unregister(uri_pattern).await;
        if removed {
            self.dispatcher.notify_list_changed(Category::Resources)?;
        }
        Ok(removed)
    }

    /// Register a prompt from role-tagged templates.
    ///
    /// `{{variable}}` placeholders are scanned into the argument list;
    /// every discovered argument is required by default.
    pub async fn prompt(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        templates: Vec<PromptTemplate>,
    ) -> McpResult<()> {
        self.dispatcher
            .prompts
            .register(Prompt::new(name, Some(description.into()), templates))
            .await;
        self.dispatcher.notify_list_changed(Category::Prompts)?;
        Ok(())
    }

    /// Remove a prompt; returns whether it existed
    pub async fn remove_prompt(&self, name: &str) -> McpResult<bool> {
        let removed = self.dispatcher.prompts.unregister(name).await;
        if removed {
            self.dispatcher.notify_list_changed(Category::Prompts)?;
        }
        Ok(removed)
    }

    /// Install the completion handler answering `completion/complete`
    pub async fn completion_handler<H>(&self, handler: H)
    where
        H: CompletionHandler + 'static,
    {
        let mut slot = self.dispatcher.completion.write().await;
        *slot = Some(Arc::new(handler));
    }

    // ========================================================================
    // Transport selection
    // ========================================================================

    /// Serve over stdio (newline-delimited frames, logs on stderr)
    #[cfg(feature = "stdio")]
    pub async fn as_stdio(&self) -> &Self {
        self.select_transport(Arc::new(
            crate::transport::stdio::StdioServerTransport::new(),
        ))
        .await
    }

    /// Serve over a Unix domain socket at `path`
    #[cfg(feature = "unix")]
    pub async fn as_unix(&self, path: impl Into<std::path::PathBuf>) -> &Self {
        self.select_transport(Arc::new(
            crate::transport::unix::UnixServerTransport::new(path.into()),
        ))
        .await
    }

    /// Serve over UDP bound to `addr`
    #[cfg(feature = "udp")]
    pub async fn as_udp(&self, addr: impl Into<String>) -> &Self {
        self.select_transport(Arc::new(crate::transport::udp::UdpServerTransport::new(
            addr.into(),
        )))
        .await
    }

    /// Serve streamable HTTP on `addr` (single endpoint, SSE streams,
    /// DELETE-for-termination)
    #[cfg(feature = "http")]
    pub async fn as_http(&self, addr: impl Into<String>) -> &Self {
        self.select_transport(Arc::new(
            crate::transport::http::StreamableHttpServerTransport::new(addr.into()),
        ))
        .await
    }

    /// Serve the legacy HTTP+SSE pairing on `addr`
    #[cfg(feature = "http")]
    pub async fn as_http_sse(&self, addr: impl Into<String>) -> &Self {
        self.select_transport(Arc::new(crate::transport::sse::SseServerTransport::new(
            addr.into(),
        )))
        .await
    }

    /// Serve WebSocket connections on `addr`
    #[cfg(feature = "websocket")]
    pub async fn as_websocket(&self, addr: impl Into<String>) -> &Self {
        self.select_transport(Arc::new(
            crate::transport::websocket::WebSocketServerTransport::new(addr.into()),
        ))
        .await
    }

    /// Serve in-process; returns the client half of the channel pair
    pub async fn as_embedded(&self) -> crate::transport::embedded::EmbeddedClientTransport {
        let (server_half, client_half) =
            crate::transport::embedded::EmbeddedServerTransport::pair();
        self.select_transport(Arc::new(server_half)).await;
        client_half
    }

    /// Install an arbitrary transport
    pub async fn select_transport(&self, transport: Arc<dyn ServerTransport>) -> &Self {
        let mut slot = self.transport.lock().await;
        *slot = Some(transport);
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Serve until the client disconnects, a `shutdown` request arrives,
    /// or the process receives Ctrl-C.
    pub async fn run(&self) -> McpResult<()> {
        let transport = {
            let slot = self.transport.lock().await;
            slot.clone()
                .ok_or_else(|| McpError::protocol("No transport selected; call as_* first"))?
        };

        {
            let mut state = self.state.write().await;
            if *state == ServerState::Running {
                return Err(McpError::protocol("Server is already running"));
            }
            *state = ServerState::Running;
        }

        transport.initialize().await?;
        self.dispatcher.attach_transport(transport.clone()).await;

        let shutdown = self.dispatcher.shutdown_token();
        tracing::info!(transport = %transport.transport_info(), "server running");

        let result = tokio::select! {
            served = transport.start() => served,
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested");
                transport.stop().await
            }
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|e| McpError::internal(format!("signal handling: {e}")))?;
                tracing::info!("interrupt received, stopping");
                transport.stop().await
            }
        };

        {
            let mut state = self.state.write().await;
            *state = ServerState::Stopped;
        }
        result
    }

    /// Stop a running server
    pub async fn stop(&self) -> McpResult<()> {
        self.dispatcher.shutdown_token().cancel();
        let transport = self.transport.lock().await.clone();
        if let Some(transport) = transport {
            transport.stop().await?;
        }
        let mut state = self.state.write().await;
        *state = ServerState::Stopped;
        Ok(())
    }

    /// Whether the server is currently serving
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == ServerState::Running
    }

    // ========================================================================
    // Direct dispatch & server-initiated operations
    // ========================================================================

    /// Feed one raw payload through the dispatcher.
    ///
    /// Intended for library embedding and tests; transports call the same
    /// path. The return value is the response frame, if the payload
    /// produced one.
    pub async fn handle_message(
        &self,
        payload: impl Into<String>,
        session_id: Option<String>,
    ) -> Option<String> {
        self.dispatcher
            .handle_envelope(IncomingEnvelope {
                payload: payload.into(),
                session_id,
                env: Default::default(),
            })
            .await
            .map(|envelope| envelope.payload)
    }

    /// Request an LLM completion from a session's client
    pub async fn request_sampling(
        &self,
        session_id: Option<String>,
        params: CreateMessageParams,
    ) -> McpResult<CreateMessageResult> {
        self.dispatcher.request_sampling(session_id, params).await
    }

    /// Re-query a session's workspace roots and merge the result
    pub async fn refresh_roots(&self, session_id: &str) -> McpResult<()> {
        self.dispatcher.refresh_roots(session_id).await
    }

    /// Tell subscribers that a resource's contents changed
    pub async fn notify_resource_updated(&self, uri: &str) -> McpResult<()> {
        self.dispatcher.notify_resource_updated(uri).await
    }

    /// Emit an MCP log message to a session, honoring its level threshold
    pub fn log(
        &self,
        session_id: &str,
        level: LoggingLevel,
        logger: Option<String>,
        data: Value,
    ) -> McpResult<()> {
        self.dispatcher
            .log_to_session(session_id, level, logger, data)
    }

    /// Access a live session by id
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.dispatcher.session(session_id)
    }

    /// All live sessions
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.dispatcher.sessions.all()
    }

    /// Tear down a session and everything bound to it
    pub async fn drop_session(&self, session_id: &str) {
        self.dispatcher.drop_session(session_id).await;
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer").finish_non_exhaustive()
    }
}

/// Builder for [`McpServer`]
#[derive(Debug, Default)]
pub struct McpServerBuilder {
    name: Option<String>,
    version: Option<String>,
    config: ServerConfig,
}

impl McpServerBuilder {
    /// Start building a server
    pub fn new() -> Self {
        Self::default()
    }

    /// Server name announced in the initialize result
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Server version announced in the initialize result
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Entries per list page
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Wait for client responses to server-initiated requests
    pub fn client_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.client_call_timeout = timeout;
        self
    }

    /// Build the server
    pub fn build(self) -> McpServer {
        McpServer::with_config(
            self.name.unwrap_or_else(|| "mcp-server".to_string()),
            self.version.unwrap_or_else(|| "0.0.0".to_string()),
            self.config,
        )
    }
}

impl McpServer {
    /// Start building a server
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }
}
