//! Argument autocompletion
//!
//! Optional server surface: `completion/complete` asks for candidate values
//! for a prompt argument or resource URI segment. Servers register a single
//! handler; when none is registered the operation answers with an empty
//! candidate list.

use async_trait::async_trait;

use crate::core::error::McpResult;
use crate::protocol::messages::{CompletionArgument, CompletionReference, CompletionValues};

/// Maximum number of candidate values returned per completion
pub const MAX_COMPLETION_VALUES: usize = 100;

/// Trait for implementing completion handlers
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    /// Produce candidate values for the given reference and argument
    async fn complete(
        &self,
        reference: &CompletionReference,
        argument: &CompletionArgument,
    ) -> McpResult<Vec<String>>;
}

/// Cap and package candidate values into the wire block
pub fn into_completion_values(mut values: Vec<String>) -> CompletionValues {
    let total = values.len() as u64;
    let has_more = values.len() > MAX_COMPLETION_VALUES;
    if has_more {
        values.truncate(MAX_COMPLETION_VALUES);
    }
    CompletionValues {
        values,
        total: Some(total),
        has_more: Some(has_more),
    }
}

/// Completion handler that matches candidates by prefix
pub struct StaticCompletionHandler {
    candidates: Vec<String>,
}

impl StaticCompletionHandler {
    /// Create a handler over a fixed candidate list
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl CompletionHandler for StaticCompletionHandler {
    async fn complete(
        &self,
        _reference: &CompletionReference,
        argument: &CompletionArgument,
    ) -> McpResult<Vec<String>> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| c.starts_with(&argument.value))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_completion() {
        let handler = StaticCompletionHandler::new(vec![
            "python".to_string(),
            "pytorch".to_string(),
            "rust".to_string(),
        ]);
        let values = handler
            .complete(
                &CompletionReference::Prompt {
                    name: "code".to_string(),
                },
                &CompletionArgument {
                    name: "language".to_string(),
                    value: "py".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(values, vec!["python", "pytorch"]);
    }

    #[test]
    fn test_values_capped_at_limit() {
        let many: Vec<String> = (0..150).map(|i| format!("v{i}")).collect();
        let block = into_completion_values(many);
        assert_eq!(block.values.len(), MAX_COMPLETION_VALUES);
        assert_eq!(block.total, Some(150));
        assert_eq!(block.has_more, Some(true));
    }
}
