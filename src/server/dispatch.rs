//! Framing and dispatch core
//!
//! Accepts raw frames from transports, classifies them (request,
//! notification, response, batch), and routes them: requests go to the
//! per-method processors, responses are correlated to pending
//! server-initiated calls, notifications feed the initialization,
//! cancellation, and progress machinery.
//!
//! Batch elements are processed concurrently and their responses collected
//! into an array; notifications contribute nothing to it. A request whose
//! handler is cancelled produces no response frame at all.

use serde_json::{Value, json};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::core::completion::{CompletionHandler, into_completion_values};
use crate::core::context::{QueuedNotification, RequestContext};
use crate::core::error::{McpError, McpResult};
use crate::core::logging::LoggingLevel;
use crate::core::prompt::PromptRegistry;
use crate::core::resource::ResourceRegistry;
use crate::core::tool::ToolRegistry;
use crate::protocol::batch::{Classified, DecodedPayload, decode_payload};
use crate::protocol::content::{format_resource_contents, format_tool_result};
use crate::protocol::messages::*;
use crate::protocol::methods;
use crate::protocol::types::{
    CompletionsCapability, JsonRpcError, JsonRpcNotification, JsonRpcRequest, LoggingCapability,
    PromptsCapability, RequestId, ResourcesCapability, ServerCapabilities, ServerInfo,
    ToolResult, ToolsCapability,
};
use crate::protocol::version::{ProtocolVersion, negotiate};
use crate::server::capabilities::{CapabilityCache, Category};
use crate::server::mcp_server::ServerConfig;
use crate::server::progress::{InflightTable, ProgressRouter};
use crate::server::session::{Session, SessionManager};
use crate::server::tracker::RequestTracker;
use crate::transport::traits::{
    IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
};
use tokio_util::sync::CancellationToken;

/// One outbound reply frame plus the session it belongs to
pub(crate) struct Reply {
    pub payload: String,
    pub session_id: Option<String>,
}

/// The dispatch core shared by the server and its transports
pub(crate) struct Dispatcher {
    server_info: ServerInfo,
    config: ServerConfig,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) resources: Arc<ResourceRegistry>,
    pub(crate) prompts: Arc<PromptRegistry>,
    pub(crate) completion: RwLock<Option<Arc<dyn CompletionHandler>>>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) capabilities: Arc<CapabilityCache>,
    pub(crate) tracker: Arc<RequestTracker>,
    pub(crate) progress: Arc<ProgressRouter>,
    pub(crate) inflight: Arc<InflightTable>,
    transport: RwLock<Option<Arc<dyn ServerTransport>>>,
    notifications_tx: mpsc::UnboundedSender<QueuedNotification>,
    notifications_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedNotification>>>,
    shutdown: CancellationToken,
    weak_self: Weak<Dispatcher>,
}

impl Dispatcher {
    pub(crate) fn new(server_info: ServerInfo, config: ServerConfig) -> Arc<Self> {
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak_self| Self {
            server_info,
            config,
            tools: Arc::new(ToolRegistry::new()),
            resources: Arc::new(ResourceRegistry::new()),
            prompts: Arc::new(PromptRegistry::new()),
            completion: RwLock::new(None),
            sessions: Arc::new(SessionManager::new()),
            capabilities: Arc::new(CapabilityCache::new()),
            tracker: Arc::new(RequestTracker::new()),
            progress: Arc::new(ProgressRouter::new()),
            inflight: Arc::new(InflightTable::new()),
            transport: RwLock::new(None),
            notifications_tx,
            notifications_rx: Mutex::new(Some(notifications_rx)),
            shutdown: CancellationToken::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Strong handle to this dispatcher for task spawning
    fn arc(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("dispatcher dropped")
    }

    /// Signal observed by the serving loop to tear down
    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Build the message-handler callback installed on transports
    pub(crate) fn message_handler(&self) -> MessageHandler {
        let dispatcher = self.arc();
        Arc::new(move |envelope| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatcher.handle_envelope(envelope).await })
        })
    }

    /// Attach a transport: install handlers and start the notification
    /// forwarder that preserves submission order per transport.
    pub(crate) async fn attach_transport(&self, transport: Arc<dyn ServerTransport>) {
        transport.set_message_handler(self.message_handler());
        {
            let dispatcher = self.arc();
            transport.set_session_end_handler(Arc::new(move |session_id: String| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.drop_session(&session_id).await;
                });
            }));
        }
        {
            let mut slot = self.transport.write().await;
            *slot = Some(transport.clone());
        }

        if transport.evicts_idle_sessions() {
            let dispatcher = self.arc();
            let ttl = self.config.session_ttl;
            tokio::spawn(async move {
                let mut sweep = tokio::time::interval(ttl);
                sweep.tick().await;
                loop {
                    sweep.tick().await;
                    for session_id in dispatcher.sessions.evict_stale(ttl) {
                        tracing::debug!(session = %session_id, "evicting idle session");
                        dispatcher.drop_session(&session_id).await;
                    }
                }
            });
        }

        let dispatcher = self.arc();
        let mut rx = self
            .notifications_rx
            .lock()
            .await
            .take()
            .expect("notification forwarder started twice");
        tokio::spawn(async move {
            while let Some((session_id, notification)) = rx.recv().await {
                let Ok(payload) = serde_json::to_string(&notification) else {
                    continue;
                };
                if let Err(e) = dispatcher.send_raw(session_id, payload).await {
                    tracing::debug!("dropping outbound notification: {e}");
                }
            }
        });
    }

    async fn current_transport(&self) -> Option<Arc<dyn ServerTransport>> {
        self.transport.read().await.clone()
    }

    async fn send_raw(&self, session_id: Option<String>, payload: String) -> McpResult<()> {
        let transport = self
            .current_transport()
            .await
            .ok_or_else(|| McpError::connection("No transport attached"))?;
        transport
            .send(OutboundEnvelope {
                payload,
                session_id,
            })
            .await
    }

    // ========================================================================
    // Inbound path
    // ========================================================================

    /// Handle one raw inbound payload; the return value is the frame the
    /// transport must send back, if any.
    pub(crate) async fn handle_envelope(
        &self,
        envelope: IncomingEnvelope,
    ) -> Option<OutboundEnvelope> {
        match decode_payload(&envelope.payload) {
            DecodedPayload::Single(classified) => self
                .handle_classified(classified, &envelope)
                .await
                .map(|reply| OutboundEnvelope {
                    payload: reply.payload,
                    session_id: reply.session_id.or_else(|| envelope.session_id.clone()),
                }),
            DecodedPayload::Batch(items) => {
                let futures = items
                    .into_iter()
                    .map(|classified| self.handle_classified(classified, &envelope));
                let replies: Vec<String> = futures::future::join_all(futures)
                    .await
                    .into_iter()
                    .flatten()
                    .map(|reply| reply.payload)
                    .collect();

                if replies.is_empty() {
                    return None;
                }
                Some(OutboundEnvelope {
                    payload: format!("[{}]", replies.join(",")),
                    session_id: envelope.session_id.clone(),
                })
            }
        }
    }

    async fn handle_classified(
        &self,
        classified: Classified,
        envelope: &IncomingEnvelope,
    ) -> Option<Reply> {
        match classified {
            Classified::Invalid(error) => Some(Reply {
                payload: serde_json::to_string(&error).ok()?,
                session_id: None,
            }),
            Classified::Response(frame) => {
                if !self.tracker.deliver(frame) {
                    tracing::debug!("response for unknown outbound request id ignored");
                }
                None
            }
            Classified::Notification(notification) => {
                self.handle_notification(notification, envelope).await;
                None
            }
            Classified::Request(request) => self.handle_request(request, envelope).await,
        }
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        envelope: &IncomingEnvelope,
    ) -> Option<Reply> {
        if request.method == methods::INITIALIZE {
            return Some(self.handle_initialize(request, envelope).await);
        }

        let (session_id, version) = self.resolve_session(envelope);
        let raw_params = request.params.clone();
        let request_id = request.id.clone();

        let result: McpResult<Option<Value>> = match request.method.as_str() {
            methods::PING => Ok(Some(json!({}))),
            methods::SHUTDOWN => {
                // Let the response frame flush before tearing down
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    shutdown.cancel();
                });
                Ok(Some(json!({})))
            }
            methods::TOOLS_LIST => self.handle_tools_list(raw_params).await.map(Some),
            methods::TOOLS_CALL => {
                self.handle_tools_call(&request_id, raw_params, &session_id, version)
                    .await
            }
            methods::RESOURCES_LIST => self.handle_resources_list(raw_params).await.map(Some),
            methods::RESOURCES_TEMPLATES_LIST => {
                self.handle_resource_templates_list(raw_params).await.map(Some)
            }
            methods::RESOURCES_READ => {
                self.handle_resources_read(&request_id, raw_params, &session_id, version)
                    .await
            }
            methods::RESOURCES_SUBSCRIBE => self
                .handle_resources_subscribe(raw_params, &session_id, true)
                .await
                .map(Some),
            methods::RESOURCES_UNSUBSCRIBE => self
                .handle_resources_subscribe(raw_params, &session_id, false)
                .await
                .map(Some),
            methods::PROMPTS_LIST => self.handle_prompts_list(raw_params).await.map(Some),
            methods::PROMPTS_GET => self.handle_prompts_get(raw_params).await.map(Some),
            methods::LOGGING_SET_LEVEL => self
                .handle_logging_set_level(raw_params, &session_id)
                .await
                .map(Some),
            methods::COMPLETION_COMPLETE => {
                self.handle_completion_complete(raw_params).await.map(Some)
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        match result {
            Ok(Some(value)) => {
                let response =
                    crate::protocol::types::JsonRpcResponse::success(request.id, value);
                Some(Reply {
                    payload: serde_json::to_string(&response).ok()?,
                    session_id: None,
                })
            }
            // Cancelled before a response was produced: nothing goes out
            Ok(None) => None,
            Err(error) => {
                let frame = JsonRpcError::new(
                    Some(request.id),
                    error.jsonrpc_code(),
                    error.to_string(),
                );
                Some(Reply {
                    payload: serde_json::to_string(&frame).ok()?,
                    session_id: None,
                })
            }
        }
    }

    fn resolve_session(&self, envelope: &IncomingEnvelope) -> (String, ProtocolVersion) {
        match envelope
            .session_id
            .as_ref()
            .and_then(|id| self.sessions.get(id))
        {
            Some(session) => (session.id().to_string(), session.protocol_version()),
            None => (
                envelope.session_id.clone().unwrap_or_default(),
                ProtocolVersion::default(),
            ),
        }
    }

    // ========================================================================
    // Initialization lifecycle
    // ========================================================================

    async fn handle_initialize(
        &self,
        request: JsonRpcRequest,
        envelope: &IncomingEnvelope,
    ) -> Reply {
        let request_id = request.id.clone();
        match self.initialize_session(request, envelope).await {
            Ok((result, session_id)) => {
                let response =
                    crate::protocol::types::JsonRpcResponse::success(request_id, result);
                Reply {
                    payload: serde_json::to_string(&response).unwrap_or_default(),
                    session_id: Some(session_id),
                }
            }
            Err(error) => {
                let supported: Vec<&str> = crate::protocol::version::SUPPORTED_VERSIONS
                    .iter()
                    .map(|v| v.as_str())
                    .collect();
                let frame = JsonRpcError::with_data(
                    Some(request_id),
                    error.jsonrpc_code(),
                    error.to_string(),
                    json!({ "supported": supported }),
                );
                Reply {
                    payload: serde_json::to_string(&frame).unwrap_or_default(),
                    session_id: None,
                }
            }
        }
    }

    async fn initialize_session(
        &self,
        request: JsonRpcRequest,
        envelope: &IncomingEnvelope,
    ) -> McpResult<(Value, String)> {
        let params: InitializeParams = required_params(request.params, "initialize")?;
        let version = negotiate(&params.protocol_version)?;

        let session = self.sessions.create(
            envelope.session_id.clone(),
            version,
            &params.client_info,
            &params.capabilities,
            envelope.env.clone(),
        );

        if let Some(transport) = self.current_transport().await {
            transport.set_protocol_version(version);
        }

        tracing::debug!(
            session = session.id(),
            version = version.as_str(),
            client = %params.client_info.name,
            "session initialized"
        );

        let result = InitializeResult {
            protocol_version: version.as_str().to_string(),
            capabilities: self.announced_capabilities().await,
            server_info: self.server_info.clone(),
        };
        Ok((serde_json::to_value(result)?, session.id().to_string()))
    }

    /// Capabilities derived from registry state: category keys appear only
    /// when the registry is non-empty; logging is always announced.
    async fn announced_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: (!self.tools.is_empty().await).then(|| ToolsCapability {
                list_changed: Some(true),
            }),
            resources: (!self.resources.is_empty().await).then(|| ResourcesCapability {
                subscribe: Some(true),
                list_changed: Some(true),
            }),
            prompts: (!self.prompts.is_empty().await).then(|| PromptsCapability {
                list_changed: Some(true),
            }),
            logging: Some(LoggingCapability::default()),
            completions: self
                .completion
                .read()
                .await
                .is_some()
                .then(CompletionsCapability::default),
        }
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    async fn handle_notification(
        &self,
        notification: JsonRpcNotification,
        envelope: &IncomingEnvelope,
    ) {
        let (session_id, _) = self.resolve_session(envelope);

        match notification.method.as_str() {
            methods::INITIALIZED => {
                let Some(session) = self.sessions.get(&session_id) else {
                    tracing::debug!("initialized notification without a session ignored");
                    return;
                };
                session.mark_initialized();

                // Flush queued list-changed notifications in insertion order
                for queued in self.capabilities.drain(session.id()) {
                    let _ = self
                        .notifications_tx
                        .send((Some(session.id().to_string()), queued));
                }

                if session.supports_roots_listing() {
                    let dispatcher = self.arc();
                    let session_id = session.id().to_string();
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.refresh_roots(&session_id).await {
                            tracing::debug!("roots/list refresh failed: {e}");
                        }
                    });
                }
            }
            methods::CANCELLED => {
                let Ok(params) =
                    serde_json::from_value::<CancelledParams>(
                        notification.params.unwrap_or(Value::Null),
                    )
                else {
                    return;
                };
                self.inflight.cancel(&session_id, &params.request_id);
            }
            methods::PROGRESS => {
                let Ok(params) = serde_json::from_value::<ProgressParams>(
                    notification.params.unwrap_or(Value::Null),
                ) else {
                    return;
                };
                self.progress.deliver(params);
            }
            other if other.starts_with(methods::NOTIFICATION_PREFIX) => {
                tracing::trace!("dropping unhandled notification {other}");
            }
            other => {
                tracing::trace!("dropping notification with unknown method {other}");
            }
        }
    }

    // ========================================================================
    // Tools
    // ========================================================================

    async fn handle_tools_list(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ListToolsParams = optional_params(params)?;
        let descriptors = self.tools.descriptors().await;
        let (tools, next_cursor) = crate::utils::paginate(
            &descriptors,
            params.cursor.as_deref(),
            self.config.page_size,
        )?;
        Ok(serde_json::to_value(ListToolsResult { tools, next_cursor })?)
    }

    async fn handle_tools_call(
        &self,
        request_id: &RequestId,
        params: Option<Value>,
        session_id: &str,
        version: ProtocolVersion,
    ) -> McpResult<Option<Value>> {
        let progress_token = progress_token_of(params.as_ref());
        let params: CallToolParams = required_params(params, "tools/call")?;
        let tool = self
            .tools
            .get(&params.name)
            .await
            .ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;

        let cancel = self.inflight.insert(session_id, request_id);
        let outcome = async {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let mut args = params.arguments.unwrap_or_default();
            tool.validate_args(&mut args)
                .map_err(|e| McpError::validation(format!("tools/call {}: {e}", params.name)))?;

            // Cancellation during argument validation aborts with no response
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let ctx = RequestContext::new(
                session_id.to_string(),
                version,
                Some(request_id.clone()),
                cancel.clone(),
                progress_token.clone(),
                Some(self.notifications_tx.clone()),
            );

            // The handler runs in its own task; the winner of handler
            // completion vs. cancellation decides the outcome.
            let handler = tool.handler();
            let mut task = tokio::spawn(async move { handler.call(ctx, args).await });
            tokio::select! {
                joined = &mut task => match joined {
                    Ok(Ok(result)) => Ok(Some(format_tool_result(version, result))),
                    Ok(Err(e)) if matches!(e, McpError::Validation(_) | McpError::InvalidParams(_)) => {
                        Err(e)
                    }
                    // Tool-domain failures are content, not JSON-RPC errors
                    Ok(Err(e)) => Ok(Some(format_tool_result(
                        version,
                        ToolResult::error(e.to_string()),
                    ))),
                    Err(join_error) => Err(McpError::internal(format!(
                        "tool handler panicked: {join_error}"
                    ))),
                },
                _ = cancel.cancelled() => Ok(None),
            }
        }
        .await;

        self.inflight.remove(session_id, request_id);
        if let Some(token) = &progress_token {
            self.progress.release(token);
        }
        outcome
    }

    // ========================================================================
    // Resources
    // ========================================================================

    async fn handle_resources_list(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ListResourcesParams = optional_params(params)?;
        let descriptors = self.resources.descriptors().await;
        let (resources, next_cursor) = crate::utils::paginate(
            &descriptors,
            params.cursor.as_deref(),
            self.config.page_size,
        )?;
        Ok(serde_json::to_value(ListResourcesResult {
            resources,
            next_cursor,
        })?)
    }

    async fn handle_resource_templates_list(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ListResourcesParams = optional_params(params)?;
        let descriptors = self.resources.template_descriptors().await;
        let (resource_templates, next_cursor) = crate::utils::paginate(
            &descriptors,
            params.cursor.as_deref(),
            self.config.page_size,
        )?;
        Ok(serde_json::to_value(ListResourceTemplatesResult {
            resource_templates,
            next_cursor,
        })?)
    }

    async fn handle_resources_read(
        &self,
        request_id: &RequestId,
        params: Option<Value>,
        session_id: &str,
        version: ProtocolVersion,
    ) -> McpResult<Option<Value>> {
        let progress_token = progress_token_of(params.as_ref());
        let params: ReadResourceParams = required_params(params, "resources/read")?;
        let (resource, path_vars) = self
            .resources
            .lookup(&params.uri)
            .await
            .ok_or_else(|| McpError::ResourceNotFound(params.uri.clone()))?;

        // Body arguments first, then path variables; path variables win
        let mut args = params.arguments.unwrap_or_default();
        for (name, value) in path_vars {
            args.insert(name, Value::String(value));
        }

        let cancel = self.inflight.insert(session_id, request_id);
        let outcome = async {
            resource
                .validate_args(&mut args)
                .map_err(|e| McpError::validation(format!("resources/read {}: {e}", params.uri)))?;

            if cancel.is_cancelled() {
                return Ok(None);
            }

            let ctx = RequestContext::new(
                session_id.to_string(),
                version,
                Some(request_id.clone()),
                cancel.clone(),
                progress_token.clone(),
                Some(self.notifications_tx.clone()),
            );

            let uri = params.uri.clone();
            let resource = resource.clone();
            let mut task =
                tokio::spawn(async move { resource.read(ctx, &uri, args).await });
            tokio::select! {
                joined = &mut task => match joined {
                    Ok(Ok(contents)) => {
                        Ok(Some(format_resource_contents(version, contents)))
                    }
                    Ok(Err(e)) => Err(e),
                    Err(join_error) => Err(McpError::internal(format!(
                        "resource handler panicked: {join_error}"
                    ))),
                },
                _ = cancel.cancelled() => Ok(None),
            }
        }
        .await;

        self.inflight.remove(session_id, request_id);
        if let Some(token) = &progress_token {
            self.progress.release(token);
        }
        outcome
    }

    async fn handle_resources_subscribe(
        &self,
        params: Option<Value>,
        session_id: &str,
        subscribe: bool,
    ) -> McpResult<Value> {
        let params: ResourceSubscriptionParams =
            required_params(params, "resources/subscribe")?;
        if subscribe {
            self.resources.subscribe(&params.uri, session_id).await?;
        } else {
            self.resources.unsubscribe(&params.uri, session_id).await?;
        }
        Ok(json!({}))
    }

    // ========================================================================
    // Prompts
    // ========================================================================

    async fn handle_prompts_list(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ListPromptsParams = optional_params(params)?;
        let descriptors = self.prompts.descriptors().await;
        let (prompts, next_cursor) = crate::utils::paginate(
            &descriptors,
            params.cursor.as_deref(),
            self.config.page_size,
        )?;
        Ok(serde_json::to_value(ListPromptsResult {
            prompts,
            next_cursor,
        })?)
    }

    async fn handle_prompts_get(&self, params: Option<Value>) -> McpResult<Value> {
        let params: GetPromptParams = required_params(params, "prompts/get")?;
        let prompt = self
            .prompts
            .get(&params.name)
            .await
            .ok_or_else(|| McpError::PromptNotFound(params.name.clone()))?;
        let result = prompt.render(params.arguments.as_ref())?;
        Ok(serde_json::to_value(result)?)
    }

    // ========================================================================
    // Logging & completion
    // ========================================================================

    async fn handle_logging_set_level(
        &self,
        params: Option<Value>,
        session_id: &str,
    ) -> McpResult<Value> {
        let params: SetLevelParams = required_params(params, "logging/setLevel")?;
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| McpError::invalid_params("logging/setLevel requires a session"))?;
        session.set_logging_level(params.level);
        Ok(json!({}))
    }

    async fn handle_completion_complete(&self, params: Option<Value>) -> McpResult<Value> {
        let params: CompleteParams = required_params(params, "completion/complete")?;
        let handler = self.completion.read().await.clone();
        let values = match handler {
            Some(handler) => {
                handler
                    .complete(&params.reference, &params.argument)
                    .await?
            }
            None => Vec::new(),
        };
        Ok(serde_json::to_value(CompleteResult {
            completion: into_completion_values(values),
        })?)
    }

    // ========================================================================
    // Outbound: notifications & server-initiated requests
    // ========================================================================

    /// Mark a category changed and emit (or queue) its list-changed
    /// notification for every live session.
    pub(crate) fn notify_list_changed(&self, category: Category) -> McpResult<()> {
        self.capabilities.mark_changed(category);
        let notification = CapabilityCache::list_changed_notification(category)?;
        for session in self.sessions.all() {
            if let Some(pass) = self.capabilities.gate(&session, notification.clone()) {
                let _ = self
                    .notifications_tx
                    .send((Some(session.id().to_string()), pass));
            }
        }
        Ok(())
    }

    /// Forward a `notifications/resources/updated` frame to subscribers
    pub(crate) async fn notify_resource_updated(&self, uri: &str) -> McpResult<()> {
        let notification = JsonRpcNotification::new(
            methods::RESOURCES_UPDATED,
            Some(ResourceUpdatedParams {
                uri: uri.to_string(),
            }),
        )?;
        for session_id in self.resources.subscribers(uri).await {
            let _ = self
                .notifications_tx
                .send((Some(session_id), notification.clone()));
        }
        Ok(())
    }

    /// Emit an MCP log message to a session, honoring its level threshold
    pub(crate) fn log_to_session(
        &self,
        session_id: &str,
        level: LoggingLevel,
        logger: Option<String>,
        data: Value,
    ) -> McpResult<()> {
        let Some(session) = self.sessions.get(session_id) else {
            return Ok(());
        };
        if !session.logging_level().allows(level) {
            return Ok(());
        }
        let notification = crate::core::logging::log_message(level, logger, data)?;
        let _ = self
            .notifications_tx
            .send((Some(session_id.to_string()), notification));
        Ok(())
    }

    /// Issue a server-initiated request and wait for the client's response
    pub(crate) async fn request_client<T: serde::Serialize>(
        &self,
        session_id: Option<String>,
        method: &str,
        params: Option<T>,
    ) -> McpResult<Value> {
        let id = self.tracker.allocate_id();
        let receiver = self.tracker.register(id.clone());
        let request = JsonRpcRequest::new(id.clone(), method, params)?;
        self.send_raw(session_id, serde_json::to_string(&request)?)
            .await?;

        let frame = self
            .tracker
            .wait(id, receiver, self.config.client_call_timeout)
            .await?;

        if let Some(error) = frame.error {
            return Err(McpError::protocol(format!(
                "client answered {method} with error {}: {}",
                error.code, error.message
            )));
        }
        frame
            .result
            .ok_or_else(|| McpError::protocol(format!("client answered {method} with no result")))
    }

    /// Issue `roots/list` and merge the response into the session
    pub(crate) async fn refresh_roots(&self, session_id: &str) -> McpResult<()> {
        let result = self
            .request_client(
                Some(session_id.to_string()),
                methods::ROOTS_LIST,
                None::<Value>,
            )
            .await?;
        let roots: ListRootsResult = serde_json::from_value(result)?;
        let paths: Vec<String> = roots
            .roots
            .iter()
            .filter_map(|r| crate::utils::uri::root_uri_to_path(&r.uri).ok())
            .collect();

        if let Some(session) = self.sessions.get(session_id) {
            session.merge_roots(paths);
        }
        Ok(())
    }

    /// Issue `sampling/createMessage` against a session's client
    pub(crate) async fn request_sampling(
        &self,
        session_id: Option<String>,
        params: CreateMessageParams,
    ) -> McpResult<CreateMessageResult> {
        if let Some(id) = &session_id {
            if let Some(session) = self.sessions.get(id) {
                if !session.sampling_capabilities().supported {
                    return Err(McpError::protocol(
                        "client did not advertise sampling support",
                    ));
                }
            }
        }
        let result = self
            .request_client(session_id, methods::SAMPLING_CREATE_MESSAGE, Some(params))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Tear down a session: cancel its in-flight work and drop its queues
    pub(crate) async fn drop_session(&self, session_id: &str) {
        self.inflight.cancel_session(session_id);
        self.capabilities.drop_session(session_id);
        self.resources.drop_session(session_id).await;
        self.sessions.remove(session_id);
    }

    /// Access a live session by id
    pub(crate) fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id)
    }
}

/// Deserialize required request parameters, mapping absence and shape
/// errors to invalid-params
fn required_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
    method: &str,
) -> McpResult<T> {
    match params {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| McpError::invalid_params(format!("Invalid {method} parameters: {e}"))),
        None => Err(McpError::invalid_params(format!(
            "Missing {method} parameters"
        ))),
    }
}

/// Deserialize optional request parameters, defaulting when absent
fn optional_params<T: serde::de::DeserializeOwned + Default>(
    params: Option<Value>,
) -> McpResult<T> {
    match params {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {e}"))),
        None => Ok(T::default()),
    }
}
