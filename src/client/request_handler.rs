//! Handlers for server-initiated requests
//!
//! Servers may call back into the client: `roots/list` asks for the
//! workspace roots, `sampling/createMessage` asks for an LLM completion.
//! Applications install a [`ClientRequestHandler`] to answer them.

use async_trait::async_trait;

use crate::core::error::{McpError, McpResult};
use crate::protocol::messages::{CreateMessageParams, CreateMessageResult, ListRootsResult};
use crate::protocol::types::Root;

/// Trait answering server-initiated requests
#[async_trait]
pub trait ClientRequestHandler: Send + Sync {
    /// Answer `roots/list`
    async fn list_roots(&self) -> McpResult<ListRootsResult> {
        Ok(ListRootsResult::default())
    }

    /// Answer `sampling/createMessage`
    async fn create_message(&self, _params: CreateMessageParams) -> McpResult<CreateMessageResult> {
        Err(McpError::MethodNotFound(
            "sampling/createMessage not supported by this client".to_string(),
        ))
    }
}

/// Handler exposing a fixed set of workspace roots
#[derive(Debug, Clone, Default)]
pub struct StaticClientRequestHandler {
    roots: Vec<Root>,
}

impl StaticClientRequestHandler {
    /// Create a handler with no roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workspace root
    pub fn with_root(mut self, uri: impl Into<String>, name: Option<String>) -> Self {
        self.roots.push(Root {
            uri: uri.into(),
            name,
        });
        self
    }
}

#[async_trait]
impl ClientRequestHandler for StaticClientRequestHandler {
    async fn list_roots(&self) -> McpResult<ListRootsResult> {
        Ok(ListRootsResult {
            roots: self.roots.clone(),
        })
    }
}
