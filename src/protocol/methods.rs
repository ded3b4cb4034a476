//! MCP protocol method name constants

// Core protocol methods
pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "notifications/initialized";
pub const PING: &str = "ping";
pub const SHUTDOWN: &str = "shutdown";

// Tool-related methods
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

// Resource-related methods
pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
pub const RESOURCES_READ: &str = "resources/read";
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";

// Prompt-related methods
pub const PROMPTS_LIST: &str = "prompts/list";
pub const PROMPTS_GET: &str = "prompts/get";
pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

// Server-to-client requests
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
pub const ROOTS_LIST: &str = "roots/list";
pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";

// Completion methods
pub const COMPLETION_COMPLETE: &str = "completion/complete";

// Logging methods
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
pub const LOGGING_MESSAGE: &str = "notifications/message";

// Progress and cancellation notifications
pub const PROGRESS: &str = "notifications/progress";
pub const CANCELLED: &str = "notifications/cancelled";

/// Prefix shared by all notification methods
pub const NOTIFICATION_PREFIX: &str = "notifications/";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_name_consistency() {
        assert_eq!(INITIALIZE, "initialize");
        assert_eq!(INITIALIZED, "notifications/initialized");
        assert_eq!(TOOLS_CALL, "tools/call");
        assert_eq!(RESOURCES_TEMPLATES_LIST, "resources/templates/list");
        assert_eq!(PROMPTS_GET, "prompts/get");
        assert_eq!(SAMPLING_CREATE_MESSAGE, "sampling/createMessage");
        assert_eq!(CANCELLED, "notifications/cancelled");
    }

    #[test]
    fn test_notification_prefix() {
        for method in [
            INITIALIZED,
            TOOLS_LIST_CHANGED,
            RESOURCES_LIST_CHANGED,
            RESOURCES_UPDATED,
            PROMPTS_LIST_CHANGED,
            ROOTS_LIST_CHANGED,
            LOGGING_MESSAGE,
            PROGRESS,
            CANCELLED,
        ] {
            assert!(method.starts_with(NOTIFICATION_PREFIX), "{method}");
        }
    }
}
