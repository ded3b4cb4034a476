//! Prompt system
//!
//! Prompts are named sequences of role-tagged text templates with
//! `{{variable}}` slots. Registration scans the templates for placeholders
//! and derives the argument list; every discovered argument is required by
//! default.
//!
//! Validation and substitution are deliberately asymmetric: `prompts/get`
//! is rejected when the prompt is unknown or when a prompt with required
//! arguments receives no argument object at all, but once an argument
//! object is present, substitution is lenient and leaves `{{var}}` verbatim
//! for any individually missing variable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::error::{McpError, McpResult};
use crate::protocol::messages::{GetPromptResult, PromptArgument, PromptDescriptor, PromptMessage};
use crate::protocol::types::{ContentItem, Role};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{ *([A-Za-z_][A-Za-z0-9_]*) *\}\}").expect("placeholder pattern"));

/// One template of a prompt: a role plus text with `{{variable}}` slots
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Message role
    pub role: Role,
    /// Template text
    pub content: String,
}

impl PromptTemplate {
    /// User-role template
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant-role template
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A registered prompt
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Unique prompt name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Templates in registration order
    pub templates: Vec<PromptTemplate>,
    /// Arguments discovered from the placeholders, all required
    pub arguments: Vec<PromptArgument>,
}

impl Prompt {
    /// Create a prompt, scanning the templates for placeholders
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        templates: Vec<PromptTemplate>,
    ) -> Self {
        let arguments = extract_arguments(&templates);
        Self {
            name: name.into(),
            description,
            templates,
            arguments,
        }
    }

    /// Descriptor for `prompts/list`
    pub fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: (!self.arguments.is_empty()).then(|| self.arguments.clone()),
        }
    }

    /// Render the prompt with the given arguments.
    ///
    /// A prompt with required arguments rejects a request that carries no
    /// argument object; individually missing variables stay verbatim.
    pub fn render(&self, arguments: Option<&Map<String, Value>>) -> McpResult<GetPromptResult> {
        if !self.arguments.is_empty() && arguments.is_none() {
            let names: Vec<&str> = self.arguments.iter().map(|a| a.name.as_str()).collect();
            return Err(McpError::InvalidParams(format!(
                "Prompt '{}' requires arguments: {}",
                self.name,
                names.join(", ")
            )));
        }

        let empty = Map::new();
        let arguments = arguments.unwrap_or(&empty);

        let messages = self
            .templates
            .iter()
            .map(|template| PromptMessage {
                role: template.role,
                content: ContentItem::Text {
                    text: substitute(&template.content, arguments),
                },
            })
            .collect();

        Ok(GetPromptResult {
            description: self.description.clone(),
            messages,
        })
    }
}

/// Scan templates for `{{variable}}` placeholders, deduplicated in first
/// appearance order. Every discovered argument is marked required.
fn extract_arguments(templates: &[PromptTemplate]) -> Vec<PromptArgument> {
    let mut seen = Vec::new();
    for template in templates {
        for capture in PLACEHOLDER.captures_iter(&template.content) {
            let name = capture[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    seen.into_iter()
        .map(|name| PromptArgument {
            name,
            description: None,
            required: Some(true),
        })
        .collect()
}

/// Substitute placeholders leniently.
///
/// Missing variables stay verbatim; non-string values are stringified with
/// JSON encoding for composite values.
fn substitute(content: &str, arguments: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(content, |captures: &regex::Captures<'_>| {
            let name = &captures[1];
            match arguments.get(name) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}

/// Registry of prompts, keyed by name.
///
/// Registration replaces any existing prompt of the same name; prompts are
/// listed in name order.
#[derive(Default)]
pub struct PromptRegistry {
    prompts: RwLock<BTreeMap<String, Arc<Prompt>>>,
}

impl PromptRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt
    pub async fn register(&self, prompt: Prompt) {
        let mut prompts = self.prompts.write().await;
        prompts.insert(prompt.name.clone(), Arc::new(prompt));
    }

    /// Remove a prompt; returns whether it existed
    pub async fn unregister(&self, name: &str) -> bool {
        let mut prompts = self.prompts.write().await;
        prompts.remove(name).is_some()
    }

    /// Look up a prompt by name
    pub async fn get(&self, name: &str) -> Option<Arc<Prompt>> {
        let prompts = self.prompts.read().await;
        prompts.get(name).cloned()
    }

    /// Whether any prompt is registered
    pub async fn is_empty(&self) -> bool {
        let prompts = self.prompts.read().await;
        prompts.is_empty()
    }

    /// Descriptors of all registered prompts, in name order
    pub async fn descriptors(&self) -> Vec<PromptDescriptor> {
        let prompts = self.prompts.read().await;
        prompts.values().map(|p| p.descriptor()).collect()
    }
}
