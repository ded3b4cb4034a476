// Copyright (c) 2025 Relay MCP Contributors
// SPDX-License-Identifier: MIT

//! # Relay MCP
//!
//! A Rust client/server implementation of the
//! [Model Context Protocol (MCP)](https://modelcontextprotocol.io/): a
//! JSON-RPC 2.0 dialect AI assistants use to invoke tools, read
//! resources, and render prompt templates on remote services.
//!
//! ## Features
//!
//! - **Three protocol revisions**: `2024-11-05`, `2025-03-26`, and the
//!   rolling `draft`, negotiated per session with version-aware content
//!   formatting
//! - **Typed registries**: tool and resource handlers take typed argument
//!   structs; input schemas are derived at registration time and incoming
//!   arguments are validated and coerced before handlers run
//! - **URI templates**: resources registered as `/items/{id}` match with
//!   path-variable extraction
//! - **Bidirectional traffic**: server-initiated `roots/list` and
//!   `sampling/createMessage`, request cancellation, and progress routing
//! - **Multiple transports**: stdio, streamable HTTP, legacy HTTP+SSE,
//!   WebSocket, Unix domain sockets, UDP, and an in-process channel pair
//!
//! ## Server Example
//!
//! ```rust,no_run
//! use relay_mcp::prelude::*;
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct EchoArgs {
//!     message: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> McpResult<()> {
//!     let server = McpServer::new("echo-server", "1.0.0");
//!
//!     server
//!         .tool("echo", "Echo a message", |_ctx, args: EchoArgs| async move {
//!             Ok(args.message)
//!         })
//!         .await?;
//!
//!     server.as_stdio().await;
//!     server.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: errors, handler context, registries, and the schema boundary
//! - [`protocol`]: JSON-RPC types, frame classification, version
//!   negotiation, and content formatting
//! - [`server`]: the dispatch core, session manager, and server API
//! - [`client`]: the client implementation
//! - [`transport`]: transport abstraction and implementations
//! - [`utils`]: URI templates and pagination cursors

pub mod client;
pub mod core;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use crate::core::error::{McpError, McpResult};
pub use crate::protocol::types::*;
pub use crate::protocol::version::ProtocolVersion;

/// Prelude module for convenient imports
///
/// Use `use relay_mcp::prelude::*;` to bring the common surface into
/// scope.
pub mod prelude {
    // Core types and traits
    pub use crate::core::{
        RequestContext,
        completion::{CompletionHandler, StaticCompletionHandler},
        error::{McpError, McpResult},
        logging::LoggingLevel,
        prompt::{Prompt, PromptRegistry, PromptTemplate},
        resource::{Resource, ResourceHandler, ResourceRegistry},
        tool::{IntoToolResult, Tool, ToolHandler, ToolRegistry},
    };

    // Protocol types and messages
    pub use crate::protocol::messages::*;
    pub use crate::protocol::types::*;
    pub use crate::protocol::version::ProtocolVersion;

    // Server and client
    pub use crate::client::{ClientRequestHandler, McpClient, StaticClientRequestHandler};
    pub use crate::server::{McpServer, McpServerBuilder, ServerConfig};

    // Transport layer
    pub use crate::transport::{ServerTransport, Transport};

    #[cfg(feature = "stdio")]
    pub use crate::transport::{StdioClientTransport, StdioServerTransport};

    #[cfg(feature = "http")]
    pub use crate::transport::{SseServerTransport, StreamableHttpServerTransport};

    #[cfg(feature = "websocket")]
    pub use crate::transport::WebSocketServerTransport;

    // Essential external types
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::collections::HashMap;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Basic smoke test to ensure all modules are accessible
        let _error = McpError::Protocol("test".to_string());
        let _version = ProtocolVersion::default();
    }
}
