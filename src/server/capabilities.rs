//! Capability cache
//!
//! Tracks which capability categories have changed and queues list-changed
//! notifications for sessions that have not yet sent
//! `notifications/initialized`. Queued frames are flushed in insertion
//! order once the client finishes initializing; no list-changed
//! notification is ever transmitted before that point.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::error::McpResult;
use crate::protocol::methods;
use crate::protocol::types::JsonRpcNotification;
use crate::server::session::Session;

/// A capability category with list-changed semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Tool registry
    Tools,
    /// Resource registry
    Resources,
    /// Prompt registry
    Prompts,
}

impl Category {
    /// The list-changed notification method for this category
    pub fn list_changed_method(&self) -> &'static str {
        match self {
            Category::Tools => methods::TOOLS_LIST_CHANGED,
            Category::Resources => methods::RESOURCES_LIST_CHANGED,
            Category::Prompts => methods::PROMPTS_LIST_CHANGED,
        }
    }
}

/// Change flags plus per-session queues of held-back notifications
#[derive(Debug, Default)]
pub struct CapabilityCache {
    tools_changed: AtomicBool,
    resources_changed: AtomicBool,
    prompts_changed: AtomicBool,
    queued: Mutex<HashMap<String, Vec<JsonRpcNotification>>>,
}

impl CapabilityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a category's listing changed
    pub fn mark_changed(&self, category: Category) {
        let flag = match category {
            Category::Tools => &self.tools_changed,
            Category::Resources => &self.resources_changed,
            Category::Prompts => &self.prompts_changed,
        };
        flag.store(true, Ordering::Release);
    }

    /// Whether a category has changed since startup
    pub fn has_changed(&self, category: Category) -> bool {
        let flag = match category {
            Category::Tools => &self.tools_changed,
            Category::Resources => &self.resources_changed,
            Category::Prompts => &self.prompts_changed,
        };
        flag.load(Ordering::Acquire)
    }

    /// Build the list-changed frame for a category
    pub fn list_changed_notification(category: Category) -> McpResult<JsonRpcNotification> {
        Ok(JsonRpcNotification::new(
            category.list_changed_method(),
            None::<serde_json::Value>,
        )?)
    }

    /// Route a notification for a session: pass it through when the session
    /// is initialized, queue it otherwise.
    pub fn gate(
        &self,
        session: &Session,
        notification: JsonRpcNotification,
    ) -> Option<JsonRpcNotification> {
        if session.is_initialized() {
            return Some(notification);
        }
        let mut queued = self.queued.lock().expect("queue lock");
        queued
            .entry(session.id().to_string())
            .or_default()
            .push(notification);
        None
    }

    /// Take all queued notifications for a session, in insertion order
    pub fn drain(&self, session_id: &str) -> Vec<JsonRpcNotification> {
        let mut queued = self.queued.lock().expect("queue lock");
        queued.remove(session_id).unwrap_or_default()
    }

    /// Drop a torn-down session's queue
    pub fn drop_session(&self, session_id: &str) {
        let mut queued = self.queued.lock().expect("queue lock");
        queued.remove(session_id);
    }
}
