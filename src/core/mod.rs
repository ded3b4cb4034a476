//! Core abstractions: errors, handler context, registries, and the schema
//! boundary

pub mod completion;
pub mod context;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod resource;
pub mod schema;
pub mod tool;

pub use context::RequestContext;
pub use error::{McpError, McpResult};
pub use prompt::{Prompt, PromptRegistry, PromptTemplate};
pub use resource::{Resource, ResourceHandler, ResourceRegistry};
pub use tool::{IntoToolResult, Tool, ToolHandler, ToolRegistry};
