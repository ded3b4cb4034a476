//! MCP client implementation and server-request handling

pub mod mcp_client;
pub mod request_handler;

pub use mcp_client::{McpClient, McpClientBuilder, ToolCallOutcome};
pub use request_handler::{ClientRequestHandler, StaticClientRequestHandler};
