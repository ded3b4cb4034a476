//! MCP protocol implementation
//!
//! JSON-RPC envelope types, per-method messages, frame classification,
//! version negotiation, and the version-specific content formatter.

pub mod batch;
pub mod content;
pub mod messages;
pub mod methods;
pub mod types;
pub mod version;

pub use batch::{Classified, DecodedPayload, ResponseFrame, decode_payload};
pub use messages::*;
pub use types::*;
pub use version::{ProtocolVersion, SUPPORTED_VERSIONS, negotiate};
