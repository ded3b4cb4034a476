//! Version-specific content formatting
//!
//! Tool and resource responses flow through this formatter before they hit
//! the wire. The three protocol revisions diverge in two places: audio
//! content does not exist in 2024-11-05 (items are downgraded to links),
//! and resource reads changed shape in 2025-03-26 (a top-level `content`
//! array became a `contents` array of per-URI entries).

use serde_json::{Value, json};

use crate::protocol::types::{ContentItem, ResourceContents, ToolResult};
use crate::protocol::version::ProtocolVersion;

/// Default MIME type for contents that declare none
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Default alt text for images that declare none
const DEFAULT_ALT_TEXT: &str = "Image";

/// Normalize one content item for the given revision.
///
/// Empty text is replaced by a single space for compatibility with clients
/// that drop empty strings; audio downgrades to a link under 2024-11-05.
pub fn normalize_item(version: ProtocolVersion, item: ContentItem) -> ContentItem {
    match item {
        ContentItem::Text { text } if text.is_empty() => ContentItem::Text {
            text: " ".to_string(),
        },
        ContentItem::Image {
            image_url,
            alt_text,
        } => {
            let alt_text = if alt_text.is_empty() {
                DEFAULT_ALT_TEXT.to_string()
            } else {
                alt_text
            };
            ContentItem::Image {
                image_url,
                alt_text,
            }
        }
        ContentItem::Audio {
            audio_url,
            data,
            mime_type,
        } if !version.supports_audio() => {
            let mime = mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE);
            let url = audio_url
                .or_else(|| data.map(|d| format!("data:{mime};base64,{d}")))
                .unwrap_or_default();
            ContentItem::Link {
                url,
                title: format!("Audio file: {mime}"),
            }
        }
        other => other,
    }
}

/// Decode a raw content array, dropping items whose type is unknown.
///
/// Blob items without a MIME type and images without alt text receive
/// their documented defaults before decoding.
pub fn normalize_raw_content(items: &[Value]) -> Vec<ContentItem> {
    items
        .iter()
        .filter_map(|item| {
            let mut patched = item.clone();
            if let Some(obj) = patched.as_object_mut() {
                match obj.get("type").and_then(Value::as_str) {
                    Some("blob") if !obj.contains_key("mimeType") => {
                        obj.insert("mimeType".to_string(), json!(DEFAULT_MIME_TYPE));
                    }
                    Some("image") if !obj.contains_key("altText") => {
                        obj.insert("altText".to_string(), json!(DEFAULT_ALT_TEXT));
                    }
                    _ => {}
                }
            }
            serde_json::from_value::<ContentItem>(patched).ok()
        })
        .collect()
}

/// Format a tool result for the negotiated revision.
///
/// An empty content array is preserved as-is: it signals an intentionally
/// empty result.
pub fn format_tool_result(version: ProtocolVersion, result: ToolResult) -> Value {
    let content: Vec<Value> = result
        .content
        .into_iter()
        .map(|item| {
            serde_json::to_value(normalize_item(version, item)).unwrap_or(Value::Null)
        })
        .collect();

    json!({
        "content": content,
        "isError": result.is_error,
    })
}

/// Format resource contents for the negotiated revision.
///
/// 2024-11-05 emits a single top-level `content` array; 2025-03-26 and
/// draft wrap items per URI in a `contents` array with a `text` summary.
pub fn format_resource_contents(version: ProtocolVersion, contents: ResourceContents) -> Value {
    let items: Vec<Value> = contents
        .content
        .into_iter()
        .map(|item| {
            serde_json::to_value(normalize_item(version, item)).unwrap_or(Value::Null)
        })
        .collect();

    match version {
        ProtocolVersion::V2024_11_05 => json!({ "content": items }),
        _ => {
            let mut entry = serde_json::Map::new();
            entry.insert("uri".to_string(), json!(contents.uri));
            if let Some(mime) = contents.mime_type {
                entry.insert("mimeType".to_string(), json!(mime));
            }
            entry.insert(
                "text".to_string(),
                json!(contents.text.unwrap_or_default()),
            );
            entry.insert("content".to_string(), Value::Array(items));
            json!({ "contents": [Value::Object(entry)] })
        }
    }
}

/// Decode a resource read result of either shape back into
/// [`ResourceContents`]. Used by the client, which may talk to servers on
/// any revision.
pub fn parse_resource_contents(value: &Value) -> ResourceContents {
    if let Some(entries) = value.get("contents").and_then(Value::as_array) {
        // 2025-03-26+ shape; a single read carries one entry
        let entry = entries.first().cloned().unwrap_or(Value::Null);
        ResourceContents {
            uri: entry
                .get("uri")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            mime_type: entry
                .get("mimeType")
                .and_then(Value::as_str)
                .map(String::from),
            text: entry.get("text").and_then(Value::as_str).map(String::from),
            content: entry
                .get("content")
                .and_then(Value::as_array)
                .map(|items| normalize_raw_content(items))
                .unwrap_or_default(),
        }
    } else {
        ResourceContents {
            uri: String::new(),
            mime_type: None,
            text: None,
            content: value
                .get("content")
                .and_then(Value::as_array)
                .map(|items| normalize_raw_content(items))
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_text_normalized_to_space() {
        let result = format_tool_result(ProtocolVersion::V2025_03_26, ToolResult::text(""));
        assert_eq!(result["content"][0]["text"], json!(" "));
    }

    #[test]
    fn test_plain_text_round_trip() {
        let result = format_tool_result(ProtocolVersion::Draft, ToolResult::text("hello"));
        assert_eq!(
            result,
            json!({
                "content": [{"type": "text", "text": "hello"}],
                "isError": false,
            })
        );
    }

    #[test]
    fn test_audio_downgrade_on_2024_11_05() {
        let item = ContentItem::audio_url("https://cdn/x.mp3", "audio/mpeg");
        let result =
            format_tool_result(ProtocolVersion::V2024_11_05, ToolResult::new(vec![item]));
        assert_eq!(
            result["content"][0],
            json!({
                "type": "link",
                "url": "https://cdn/x.mp3",
                "title": "Audio file: audio/mpeg",
            })
        );
    }

    #[test]
    fn test_audio_passthrough_on_2025_03_26() {
        let item = ContentItem::audio_url("https://cdn/x.mp3", "audio/mpeg");
        let result = format_tool_result(
            ProtocolVersion::V2025_03_26,
            ToolResult::new(vec![item.clone()]),
        );
        assert_eq!(
            result["content"][0],
            serde_json::to_value(&item).unwrap()
        );
    }

    #[test]
    fn test_empty_content_preserved() {
        let result = format_tool_result(ProtocolVersion::Draft, ToolResult::new(vec![]));
        assert_eq!(result["content"], json!([]));
    }

    #[test]
    fn test_unknown_item_types_dropped() {
        let raw = vec![
            json!({"type": "text", "text": "keep"}),
            json!({"type": "video", "videoUrl": "https://x"}),
        ];
        let items = normalize_raw_content(&raw);
        assert_eq!(items, vec![ContentItem::text("keep")]);
    }

    #[test]
    fn test_blob_mime_defaulted() {
        let raw = vec![json!({"type": "blob", "blob": "aGk="})];
        let items = normalize_raw_content(&raw);
        assert_eq!(
            items,
            vec![ContentItem::blob("aGk=", DEFAULT_MIME_TYPE)]
        );
    }

    #[test]
    fn test_resource_shape_2024() {
        let contents = ResourceContents::text("file:///a.txt", "body");
        let value = format_resource_contents(ProtocolVersion::V2024_11_05, contents);
        assert!(value.get("contents").is_none());
        assert_eq!(value["content"][0]["text"], json!("body"));
    }

    #[test]
    fn test_resource_shape_2025() {
        let contents = ResourceContents::text("file:///a.txt", "body");
        let value = format_resource_contents(ProtocolVersion::V2025_03_26, contents);
        assert_eq!(value["contents"][0]["uri"], json!("file:///a.txt"));
        assert_eq!(value["contents"][0]["text"], json!("body"));
        assert_eq!(value["contents"][0]["content"][0]["text"], json!("body"));
    }

    #[test]
    fn test_resource_shapes_parse_losslessly() {
        let contents = ResourceContents::text("file:///a.txt", "body");
        let wire = format_resource_contents(ProtocolVersion::Draft, contents.clone());
        let parsed = parse_resource_contents(&wire);
        assert_eq!(parsed.uri, contents.uri);
        assert_eq!(parsed.text, contents.text);
        assert_eq!(parsed.content, contents.content);
    }
}
