//! MCP server implementation: dispatch core, session management,
//! capability cache, and the bidirectional request machinery

pub mod capabilities;
pub(crate) mod dispatch;
pub mod mcp_server;
pub mod progress;
pub mod session;
pub mod tracker;

pub use capabilities::{CapabilityCache, Category};
pub use mcp_server::{McpServer, McpServerBuilder, ServerConfig};
pub use progress::{InflightTable, ProgressRouter};
pub use session::{Session, SessionManager};
pub use tracker::RequestTracker;
