//! MCP-level logging
//!
//! Module implements the protocol's logging surface: the RFC-5424-ordered
//! severity scale, the per-session minimum level set via `logging/setLevel`,
//! and the `notifications/message` frame builder. Engine diagnostics go
//! through `tracing` and never touch stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::McpResult;
use crate::protocol::messages::LoggingMessageParams;
use crate::protocol::methods;
use crate::protocol::types::JsonRpcNotification;

/// Severity of an MCP log message, least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    /// Detailed debugging information
    Debug,
    /// Normal operation messages
    Info,
    /// Significant but normal events
    Notice,
    /// Warning conditions
    Warning,
    /// Error conditions
    Error,
    /// Critical conditions
    Critical,
    /// Action must be taken immediately
    Alert,
    /// System is unusable
    Emergency,
}

impl Default for LoggingLevel {
    fn default() -> Self {
        LoggingLevel::Info
    }
}

impl LoggingLevel {
    /// Whether a message at `level` passes this minimum threshold
    pub fn allows(&self, level: LoggingLevel) -> bool {
        level >= *self
    }
}

impl std::fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoggingLevel::Debug => "debug",
            LoggingLevel::Info => "info",
            LoggingLevel::Notice => "notice",
            LoggingLevel::Warning => "warning",
            LoggingLevel::Error => "error",
            LoggingLevel::Critical => "critical",
            LoggingLevel::Alert => "alert",
            LoggingLevel::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// Build a `notifications/message` frame
pub fn log_message(
    level: LoggingLevel,
    logger: Option<String>,
    data: Value,
) -> McpResult<JsonRpcNotification> {
    Ok(JsonRpcNotification::new(
        methods::LOGGING_MESSAGE,
        Some(LoggingMessageParams {
            level,
            logger,
            data,
        }),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering() {
        assert!(LoggingLevel::Debug < LoggingLevel::Info);
        assert!(LoggingLevel::Warning < LoggingLevel::Error);
        assert!(LoggingLevel::Alert < LoggingLevel::Emergency);
    }

    #[test]
    fn test_threshold_filtering() {
        let threshold = LoggingLevel::Warning;
        assert!(!threshold.allows(LoggingLevel::Debug));
        assert!(!threshold.allows(LoggingLevel::Info));
        assert!(threshold.allows(LoggingLevel::Warning));
        assert!(threshold.allows(LoggingLevel::Critical));
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(
            serde_json::to_value(LoggingLevel::Warning).unwrap(),
            json!("warning")
        );
        let level: LoggingLevel = serde_json::from_value(json!("emergency")).unwrap();
        assert_eq!(level, LoggingLevel::Emergency);
    }

    #[test]
    fn test_log_message_frame() {
        let frame = log_message(
            LoggingLevel::Info,
            Some("engine".to_string()),
            json!({"event": "started"}),
        )
        .unwrap();
        assert_eq!(frame.method, methods::LOGGING_MESSAGE);
        let params = frame.params.unwrap();
        assert_eq!(params["level"], json!("info"));
        assert_eq!(params["logger"], json!("engine"));
    }
}
