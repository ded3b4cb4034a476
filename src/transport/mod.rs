//! Transport layer implementations
//!
//! All transports implement the uniform surface in [`traits`]; the engine
//! never sees framing, session-header plumbing, or fragmentation details.

pub mod embedded;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod sse;
#[cfg(feature = "stdio")]
pub mod stdio;
pub mod traits;
#[cfg(feature = "udp")]
pub mod udp;
#[cfg(feature = "unix")]
pub mod unix;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use embedded::{EmbeddedClientTransport, EmbeddedServerTransport};
#[cfg(feature = "http")]
pub use http::{MCP_SESSION_HEADER, StreamableHttpServerTransport};
#[cfg(feature = "http")]
pub use sse::SseServerTransport;
#[cfg(feature = "stdio")]
pub use stdio::{StdioClientTransport, StdioServerTransport};
pub use traits::{
    DebugHandler, IncomingEnvelope, MessageHandler, OutboundEnvelope, ServerTransport,
    SessionEndHandler, Transport, TransportConfig,
};
#[cfg(feature = "udp")]
pub use udp::UdpServerTransport;
#[cfg(feature = "unix")]
pub use unix::UnixServerTransport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketServerTransport;
