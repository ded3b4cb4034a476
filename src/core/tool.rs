//! Tool system
//!
//! Tools are named callables exposed to clients. A tool is registered with
//! a typed argument struct; the registry derives the input schema from that
//! type at registration time, validates and coerces incoming argument maps
//! against it, and normalizes handler return values into the MCP content
//! envelope.
//!
//! Error classes are kept apart: schema validation failures surface as
//! JSON-RPC invalid-params errors, while failures inside the handler body
//! become successful responses with `isError: true` (tool-domain errors are
//! content, protocol errors are JSON-RPC errors).

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::context::RequestContext;
use crate::core::error::{McpError, McpResult};
use crate::core::schema::{
    SchemaValidator, bind_arguments, ensure_structured_schema, generate_schema,
};
use crate::protocol::messages::{ToolAnnotations, ToolDescriptor};
use crate::protocol::types::{ContentItem, ToolResult};

/// Trait for implementing tool handlers
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given context and argument map
    async fn call(&self, ctx: RequestContext, args: Map<String, Value>) -> McpResult<ToolResult>;
}

/// Conversion of handler return values into the MCP content envelope
pub trait IntoToolResult {
    /// Normalize into a tool result
    fn into_tool_result(self) -> ToolResult;
}

impl IntoToolResult for ToolResult {
    fn into_tool_result(self) -> ToolResult {
        self
    }
}

impl IntoToolResult for String {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::text(self)
    }
}

impl IntoToolResult for &str {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::text(self)
    }
}

impl IntoToolResult for ContentItem {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::new(vec![self])
    }
}

impl IntoToolResult for Vec<ContentItem> {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::new(self)
    }
}

impl IntoToolResult for () {
    fn into_tool_result(self) -> ToolResult {
        ToolResult::new(vec![])
    }
}

impl IntoToolResult for Value {
    fn into_tool_result(self) -> ToolResult {
        match self {
            Value::String(s) => ToolResult::text(s),
            other => ToolResult::text(other.to_string()),
        }
    }
}

/// A registered tool: descriptor, validator, and handler
pub struct Tool {
    /// Descriptor listed to clients
    pub descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
    validator: SchemaValidator,
}

impl Tool {
    /// Create a tool from an explicit schema and a raw handler
    pub fn new<H>(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Value,
        annotations: Option<ToolAnnotations>,
        handler: H,
    ) -> Self
    where
        H: ToolHandler + 'static,
    {
        Self {
            descriptor: ToolDescriptor {
                name: name.into(),
                description,
                input_schema: input_schema.clone(),
                annotations,
            },
            handler: Arc::new(handler),
            validator: SchemaValidator::new(input_schema),
        }
    }

    /// Validate and coerce an argument map against the tool's schema
    pub fn validate_args(&self, args: &mut Map<String, Value>) -> McpResult<()> {
        self.validator.validate_and_coerce(args)
    }

    /// Invoke the handler; arguments should already be validated
    pub async fn call(
        &self,
        ctx: RequestContext,
        args: Map<String, Value>,
    ) -> McpResult<ToolResult> {
        self.handler.call(ctx, args).await
    }

    /// Handler reference for task-spawned execution
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.descriptor.name)
            .field("description", &self.descriptor.description)
            .finish()
    }
}

/// Adapter wrapping a typed async closure into a [`ToolHandler`].
///
/// Binding failures surface as validation errors so the dispatcher answers
/// them with invalid-params rather than a domain error envelope.
struct TypedToolHandler<A, F> {
    func: F,
    validator: SchemaValidator,
    _args: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, F, Fut, R> ToolHandler for TypedToolHandler<A, F>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<R>> + Send + 'static,
    R: IntoToolResult + Send + 'static,
{
    async fn call(&self, ctx: RequestContext, args: Map<String, Value>) -> McpResult<ToolResult> {
        let typed: A = bind_arguments(&self.validator, args)?;
        let result = (self.func)(ctx, typed).await?;
        Ok(result.into_tool_result())
    }
}

/// Registry of tools, keyed by name.
///
/// Registration replaces any existing tool of the same name; tools are
/// listed in name order so pagination cursors stay stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with a typed argument struct.
    ///
    /// The input schema is generated from `A`; loose key-value-map argument
    /// types are rejected.
    pub async fn register_typed<A, F, Fut, R>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        annotations: Option<ToolAnnotations>,
        func: F,
    ) -> McpResult<()>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(RequestContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<R>> + Send + 'static,
        R: IntoToolResult + Send + 'static,
    {
        let schema = generate_schema::<A>()?;
        ensure_structured_schema(&schema)?;

        let handler = TypedToolHandler::<A, F> {
            func,
            validator: SchemaValidator::new(schema.clone()),
            _args: PhantomData,
        };
        self.register(Tool::new(
            name,
            Some(description.into()),
            schema,
            annotations,
            handler,
        ))
        .await;
        Ok(())
    }

    /// Register a tool with an explicit schema and raw handler
    pub async fn register(&self, tool: Tool) {
        let mut tools = self.tools.write().await;
        tools.insert(tool.descriptor.name.clone(), Arc::new(tool));
    }

    /// Remove a tool; returns whether it existed
    pub async fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().await;
        tools.remove(name).is_some()
    }

    /// Look up a tool by name
    pub async fn get(&self, name: &str) -> Option<Arc<Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Whether any tool is registered
    pub async fn is_empty(&self) -> bool {
        let tools = self.tools.read().await;
        tools.is_empty()
    }

    /// Descriptors of all registered tools, in name order
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().await;
        tools.values().map(|t| t.descriptor.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoArgs {
        message: String,
    }

    #[tokio::test]
    async fn test_typed_registration_and_call() {
        let registry = ToolRegistry::new();
        registry
            .register_typed(
                "echo",
                "Echo a message",
                None,
                |_ctx, args: EchoArgs| async move { Ok(args.message) },
            )
            .await
            .unwrap();

        let tool = registry.get("echo").await.unwrap();
        let mut args = Map::new();
        args.insert("message".to_string(), json!("hello"));
        tool.validate_args(&mut args).unwrap();

        let result = tool.call(RequestContext::detached(), args).await.unwrap();
        assert_eq!(result, ToolResult::text("hello"));
    }

    #[tokio::test]
    async fn test_schema_generated_from_type() {
        let registry = ToolRegistry::new();
        registry
            .register_typed(
                "echo",
                "Echo a message",
                None,
                |_ctx, args: EchoArgs| async move { Ok(args.message) },
            )
            .await
            .unwrap();

        let descriptors = registry.descriptors().await;
        assert_eq!(descriptors.len(), 1);
        let schema = &descriptors[0].input_schema;
        assert_eq!(schema["type"], json!("object"));
        assert!(schema["properties"]["message"].is_object());
    }

    #[tokio::test]
    async fn test_map_arguments_rejected() {
        let registry = ToolRegistry::new();
        let result = registry
            .register_typed(
                "bad",
                "Loose map args",
                None,
                |_ctx, args: std::collections::HashMap<String, Value>| async move {
                    Ok(format!("{}", args.len()))
                },
            )
            .await;
        assert!(matches!(result, Err(McpError::Validation(_))));
    }

    #[tokio::test]
    async fn test_validation_failure_is_validation_error() {
        let registry = ToolRegistry::new();
        registry
            .register_typed(
                "echo",
                "Echo a message",
                None,
                |_ctx, args: EchoArgs| async move { Ok(args.message) },
            )
            .await
            .unwrap();

        let tool = registry.get("echo").await.unwrap();
        let mut args = Map::new();
        args.insert("message".to_string(), json!(42));
        let err = tool.validate_args(&mut args).unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let registry = ToolRegistry::new();
        for reply in ["first", "second"] {
            let reply = reply.to_string();
            registry
                .register_typed(
                    "greet",
                    "Greeting",
                    None,
                    move |_ctx, _args: EchoArgs| {
                        let reply = reply.clone();
                        async move { Ok(reply) }
                    },
                )
                .await
                .unwrap();
        }

        let tool = registry.get("greet").await.unwrap();
        let mut args = Map::new();
        args.insert("message".to_string(), json!("x"));
        let result = tool.call(RequestContext::detached(), args).await.unwrap();
        assert_eq!(result, ToolResult::text("second"));
        assert_eq!(registry.descriptors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_result_normalization() {
        assert_eq!("hi".into_tool_result(), ToolResult::text("hi"));
        assert_eq!(().into_tool_result().content.len(), 0);
        assert_eq!(
            json!({"k": 1}).into_tool_result(),
            ToolResult::text("{\"k\":1}")
        );
    }
}
