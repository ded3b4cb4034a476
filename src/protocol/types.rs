//! Core MCP protocol types
//!
//! This module contains the JSON-RPC 2.0 envelope types and the protocol
//! structures shared by every revision the engine speaks: implementation
//! info, capability descriptors, and the content-item union used by tool
//! and resource results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON-RPC version string, mandatory on every frame
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request Identifiers
// ============================================================================

/// JSON-RPC request id: an integer or a string.
///
/// Absence of an id marks a notification; a literal `null` id is rejected
/// for requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// Progress token for associating notifications with requests
pub type ProgressToken = serde_json::Value; // string | number

/// Cursor for pagination
pub type Cursor = String;

// ============================================================================
// JSON-RPC Envelopes
// ============================================================================

/// A JSON-RPC request expecting a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Correlation id, unique per session until the response is delivered
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new request with serialized parameters
    pub fn new<T: Serialize>(
        id: RequestId,
        method: impl Into<String>,
        params: Option<T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params: params.map(serde_json::to_value).transpose()?,
        })
    }
}

/// A JSON-RPC notification: no id, never answered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new notification with serialized parameters
    pub fn new<T: Serialize>(
        method: impl Into<String>,
        params: Option<T>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: params.map(serde_json::to_value).transpose()?,
        })
    }
}

/// A successful JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Echo of the originating request id
    pub id: RequestId,
    /// Result payload
    pub result: serde_json::Value,
}

impl JsonRpcResponse {
    /// Build a success response echoing `id`
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// A JSON-RPC error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Echo of the originating request id; `null` when the id could not
    /// be recovered from the frame (e.g. parse errors)
    pub id: Option<RequestId>,
    /// The error descriptor
    pub error: ErrorObject,
}

impl JsonRpcError {
    /// Build an error response
    pub fn new(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    /// Build an error response with attached data
    pub fn with_data(
        id: Option<RequestId>,
        code: i64,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data: Some(data),
            },
        }
    }
}

/// JSON-RPC error descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Standardized error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Start of the implementation-defined server error range
    pub const SERVER_ERROR_START: i64 = -32099;
    /// End of the implementation-defined server error range
    pub const SERVER_ERROR_END: i64 = -32000;
}

// ============================================================================
// Implementation Info
// ============================================================================

/// Information about an MCP implementation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Create a new implementation descriptor
    pub fn new<S: Into<String>>(name: S, version: S) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Server identity, as sent in the initialize result
pub type ServerInfo = Implementation;

/// Client identity with optional initial workspace roots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
    /// Workspace roots announced at initialize time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<Root>>,
}

/// A workspace directory the client has exposed to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    /// Root URI, typically `file://`
    pub uri: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Server capabilities announced in the initialize result.
///
/// Category keys appear only when the corresponding registry is non-empty;
/// `logging` is always present. The capability objects carry feature flags,
/// never the actual entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerCapabilities {
    /// Tool capabilities, present when at least one tool is registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    /// Resource capabilities, present when at least one resource is registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    /// Prompt capabilities, present when at least one prompt is registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    /// Logging capability, always announced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
    /// Completion capability, present when a completion handler is registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionsCapability>,
}

/// Tool-related server capabilities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolsCapability {
    /// Whether the server emits tool list change notifications
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Resource-related server capabilities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourcesCapability {
    /// Whether the server accepts resource subscriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    /// Whether the server emits resource list change notifications
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Prompt-related server capabilities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PromptsCapability {
    /// Whether the server emits prompt list change notifications
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Logging capability marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingCapability {
    /// Additional properties
    #[serde(flatten)]
    pub additional_properties: HashMap<String, serde_json::Value>,
}

/// Completion capability marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CompletionsCapability {
    /// Additional properties
    #[serde(flatten)]
    pub additional_properties: HashMap<String, serde_json::Value>,
}

/// Client capabilities sent with initialize
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientCapabilities {
    /// Roots support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    /// Sampling support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
}

/// Roots capability for clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RootsCapability {
    /// Whether the client supports `roots/list` and change notifications
    #[serde(rename = "listChanged", skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Sampling capability for clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SamplingCapability {
    /// Text completion support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<bool>,
    /// Image completion support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<bool>,
    /// Audio completion support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
}

// ============================================================================
// Content Items
// ============================================================================

/// One element of a tool or resource content envelope.
///
/// The `type` tag discriminates; unknown tags are dropped during
/// normalization rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentItem {
    /// Plain text
    #[serde(rename = "text")]
    Text {
        /// The text payload
        text: String,
    },
    /// Image by URL
    #[serde(rename = "image")]
    Image {
        /// Image location
        #[serde(rename = "imageUrl")]
        image_url: String,
        /// Alternative text, defaulted when absent
        #[serde(rename = "altText")]
        alt_text: String,
    },
    /// Hyperlink
    #[serde(rename = "link")]
    Link {
        /// Link target
        url: String,
        /// Link title
        title: String,
    },
    /// File, embedded or by reference
    #[serde(rename = "file")]
    File {
        /// MIME type of the file
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64-embedded payload
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// Location of the file
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Audio, by URL or embedded (2025-03-26 and later)
    #[serde(rename = "audio")]
    Audio {
        /// Audio location
        #[serde(rename = "audioUrl", skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        /// Base64-embedded payload
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// MIME type of the audio
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Raw binary payload
    #[serde(rename = "blob")]
    Blob {
        /// Base64-encoded bytes
        blob: String,
        /// MIME type, defaulted to `application/octet-stream`
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentItem {
    /// Text content item
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    /// Image content item
    pub fn image(image_url: impl Into<String>, alt_text: impl Into<String>) -> Self {
        ContentItem::Image {
            image_url: image_url.into(),
            alt_text: alt_text.into(),
        }
    }

    /// Link content item
    pub fn link(url: impl Into<String>, title: impl Into<String>) -> Self {
        ContentItem::Link {
            url: url.into(),
            title: title.into(),
        }
    }

    /// Audio content item referencing a URL
    pub fn audio_url(audio_url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentItem::Audio {
            audio_url: Some(audio_url.into()),
            data: None,
            mime_type: Some(mime_type.into()),
        }
    }

    /// Blob content item
    pub fn blob(blob: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentItem::Blob {
            blob: blob.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Result of a tool invocation: a content envelope plus a domain error flag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// Content items
    pub content: Vec<ContentItem>,
    /// True when the tool reports a business-logic failure
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result from content items
    pub fn new(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Successful single-text result
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ContentItem::text(text)])
    }

    /// Tool-domain error carried as content
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
        }
    }
}

/// Contents produced by a resource read, before version formatting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceContents {
    /// URI the contents were read from
    pub uri: String,
    /// MIME type of the contents
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Short text summary used by the 2025-03-26+ read shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Content items
    pub content: Vec<ContentItem>,
}

impl ResourceContents {
    /// Text-only resource contents
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            uri: uri.into(),
            mime_type: Some("text/plain".to_string()),
            text: Some(text.clone()),
            content: vec![ContentItem::Text { text }],
        }
    }
}

/// Message role in prompts and sampling exchanges
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user
    User,
    /// Model output
    Assistant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_serialization() {
        assert_eq!(serde_json::to_value(RequestId::Number(7)).unwrap(), json!(7));
        assert_eq!(
            serde_json::to_value(RequestId::String("abc".into())).unwrap(),
            json!("abc")
        );
        let id: RequestId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(id, RequestId::Number(42));
    }

    #[test]
    fn test_error_frame_null_id() {
        let err = JsonRpcError::new(None, error_codes::PARSE_ERROR, "Parse error");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["id"], serde_json::Value::Null);
        assert_eq!(value["error"]["code"], json!(-32700));
    }

    #[test]
    fn test_content_item_wire_shape() {
        let item = ContentItem::audio_url("https://a/b.mp3", "audio/mpeg");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], json!("audio"));
        assert_eq!(value["audioUrl"], json!("https://a/b.mp3"));
        assert_eq!(value["mimeType"], json!("audio/mpeg"));

        let link: ContentItem =
            serde_json::from_value(json!({"type": "link", "url": "u", "title": "t"})).unwrap();
        assert_eq!(link, ContentItem::link("u", "t"));
    }

    #[test]
    fn test_tool_result_round_trip() {
        let result = ToolResult::text("hello");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["isError"], json!(false));
        assert_eq!(value["content"][0]["type"], json!("text"));
        assert_eq!(value["content"][0]["text"], json!("hello"));
    }

    #[test]
    fn test_capabilities_skip_empty() {
        let caps = ServerCapabilities {
            logging: Some(LoggingCapability::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(&caps).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("logging").is_some());
    }
}
