//! Frame decoding and classification
//!
//! A raw payload is either a single JSON-RPC object or a batch array.
//! Classification is field-based: an object with `method` is a request
//! (id present) or notification (id absent); an object without `method`
//! but with `id` and `result` or `error` is a response. Everything else
//! is invalid and answered with the appropriate standard error code.
//!
//! Inbound batches are accepted on every protocol revision, including
//! `draft`, for back-compat; the engine never emits outbound batches.

use serde_json::Value;

use crate::protocol::types::{
    ErrorObject, JsonRpcError, JsonRpcNotification, JsonRpcRequest, RequestId, error_codes,
};

/// A response frame received from the peer: success or error
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    /// Correlation id
    pub id: RequestId,
    /// Result payload of a success response
    pub result: Option<Value>,
    /// Error descriptor of an error response
    pub error: Option<ErrorObject>,
}

/// One classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A request expecting a response
    Request(JsonRpcRequest),
    /// A notification; never answered
    Notification(JsonRpcNotification),
    /// A response to an outbound server-initiated request
    Response(ResponseFrame),
    /// An invalid frame, answered with the prepared error
    Invalid(JsonRpcError),
}

/// A decoded payload: one frame or a batch of frames
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// A single frame
    Single(Classified),
    /// A batch; responses are collected into an array
    Batch(Vec<Classified>),
}

/// Decode a raw payload into classified frames.
///
/// Leading whitespace is trimmed; a payload whose first byte is `[` is
/// decoded as a batch. Parse failures and empty batches yield a single
/// invalid frame carrying the matching standard error.
pub fn decode_payload(raw: &str) -> DecodedPayload {
    let trimmed = raw.trim_start();

    if trimmed.starts_with('[') {
        let elements: Vec<Value> = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                return DecodedPayload::Single(Classified::Invalid(JsonRpcError::new(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {e}"),
                )));
            }
        };

        if elements.is_empty() {
            return DecodedPayload::Single(Classified::Invalid(JsonRpcError::new(
                None,
                error_codes::INVALID_REQUEST,
                "Invalid request: empty batch",
            )));
        }

        DecodedPayload::Batch(elements.iter().map(|v| classify_element(v, true)).collect())
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => DecodedPayload::Single(classify_element(&value, false)),
            Err(e) => DecodedPayload::Single(Classified::Invalid(JsonRpcError::new(
                None,
                error_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            ))),
        }
    }
}

/// Classify one JSON value as a frame.
///
/// `in_batch` selects the error code for non-object elements: a batch slot
/// that is not an object is a per-slot parse failure, while a lone
/// non-object payload parsed fine and is merely not a valid request.
fn classify_element(value: &Value, in_batch: bool) -> Classified {
    let Some(obj) = value.as_object() else {
        let code = if in_batch {
            error_codes::PARSE_ERROR
        } else {
            error_codes::INVALID_REQUEST
        };
        return Classified::Invalid(JsonRpcError::new(None, code, "Invalid frame: not an object"));
    };

    let id = recover_id(obj.get("id"));

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some("2.0") => {}
        _ => {
            return Classified::Invalid(JsonRpcError::new(
                id,
                error_codes::INVALID_REQUEST,
                "Invalid request: missing or invalid jsonrpc version",
            ));
        }
    }

    if let Some(method_value) = obj.get("method") {
        let Some(method) = method_value.as_str() else {
            return Classified::Invalid(JsonRpcError::new(
                id,
                error_codes::INVALID_REQUEST,
                "Invalid request: method must be a string",
            ));
        };

        return match obj.get("id") {
            None => Classified::Notification(JsonRpcNotification {
                jsonrpc: "2.0".to_string(),
                method: method.to_string(),
                params: obj.get("params").cloned(),
            }),
            Some(Value::Null) => Classified::Invalid(JsonRpcError::new(
                None,
                error_codes::INVALID_REQUEST,
                "Invalid request: id must not be null",
            )),
            Some(id_value) => match serde_json::from_value::<RequestId>(id_value.clone()) {
                Ok(id) => Classified::Request(JsonRpcRequest {
                    jsonrpc: "2.0".to_string(),
                    id,
                    method: method.to_string(),
                    params: obj.get("params").cloned(),
                }),
                Err(_) => Classified::Invalid(JsonRpcError::new(
                    None,
                    error_codes::INVALID_REQUEST,
                    "Invalid request: id must be an integer or string",
                )),
            },
        };
    }

    // No method: a response frame needs an id plus result or error
    if let Some(id) = id.clone() {
        let result = obj.get("result").cloned();
        let error = obj
            .get("error")
            .and_then(|e| serde_json::from_value::<ErrorObject>(e.clone()).ok());
        if result.is_some() || error.is_some() {
            return Classified::Response(ResponseFrame { id, result, error });
        }
    }

    Classified::Invalid(JsonRpcError::new(
        id,
        error_codes::INVALID_REQUEST,
        "Invalid request: neither request, notification, nor response",
    ))
}

/// Best-effort id recovery for error responses
fn recover_id(id: Option<&Value>) -> Option<RequestId> {
    id.and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok())
}

/// Quick check whether a raw line looks like a JSON-RPC envelope.
///
/// Used by line-oriented transports to filter interleaved log output:
/// a line that is not a well-formed envelope is handed to the debug hook
/// and dropped instead of being answered with a parse error.
pub fn is_jsonrpc_envelope(line: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return false;
    };
    let is_envelope_object = |v: &Value| {
        let Some(obj) = v.as_object() else {
            return false;
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return false;
        }
        obj.contains_key("method")
            || (obj.contains_key("id")
                && (obj.contains_key("result") || obj.contains_key("error")))
    };
    match &value {
        Value::Array(items) => !items.is_empty() && items.iter().all(is_envelope_object),
        other => is_envelope_object(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_request() {
        let decoded = decode_payload(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        match decoded {
            DecodedPayload::Single(Classified::Request(req)) => {
                assert_eq!(req.method, "ping");
                assert_eq!(req.id, RequestId::Number(1));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_notification() {
        let decoded =
            decode_payload(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(matches!(
            decoded,
            DecodedPayload::Single(Classified::Notification(_))
        ));
    }

    #[test]
    fn test_classify_response() {
        let decoded = decode_payload(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#);
        match decoded {
            DecodedPayload::Single(Classified::Response(frame)) => {
                assert_eq!(frame.id, RequestId::Number(3));
                assert_eq!(frame.result, Some(json!({"ok": true})));
                assert!(frame.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_leading_whitespace_trimmed() {
        let decoded = decode_payload("  \n\t [{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}]");
        assert!(matches!(decoded, DecodedPayload::Batch(items) if items.len() == 1));
    }

    #[test]
    fn test_empty_batch_is_invalid_request() {
        let decoded = decode_payload("[]");
        match decoded {
            DecodedPayload::Single(Classified::Invalid(err)) => {
                assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        let decoded = decode_payload("{not json");
        match decoded {
            DecodedPayload::Single(Classified::Invalid(err)) => {
                assert_eq!(err.error.code, error_codes::PARSE_ERROR);
                assert_eq!(err.id, None);
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_null_id_rejected() {
        let decoded = decode_payload(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#);
        match decoded {
            DecodedPayload::Single(Classified::Invalid(err)) => {
                assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_jsonrpc_rejected() {
        let decoded = decode_payload(r#"{"id":1,"method":"ping"}"#);
        match decoded {
            DecodedPayload::Single(Classified::Invalid(err)) => {
                assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
                assert_eq!(err.id, Some(RequestId::Number(1)));
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_mixed_slots() {
        let decoded = decode_payload(
            r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},
                {"jsonrpc":"2.0","method":"notifications/initialized"},
                42]"#,
        );
        match decoded {
            DecodedPayload::Batch(items) => {
                assert!(matches!(items[0], Classified::Request(_)));
                assert!(matches!(items[1], Classified::Notification(_)));
                match &items[2] {
                    Classified::Invalid(err) => {
                        assert_eq!(err.error.code, error_codes::PARSE_ERROR)
                    }
                    other => panic!("expected invalid slot, got {other:?}"),
                }
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_filter() {
        assert!(is_jsonrpc_envelope(r#"{"jsonrpc":"2.0","method":"x"}"#));
        assert!(is_jsonrpc_envelope(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#));
        assert!(!is_jsonrpc_envelope("starting server on port 8080"));
        assert!(!is_jsonrpc_envelope(r#"{"msg":"log line"}"#));
        assert!(!is_jsonrpc_envelope(r#"{"jsonrpc":"1.0","method":"x"}"#));
    }
}
