//! Progress routing and in-flight request cancellation
//!
//! `notifications/progress` frames fan out to subscribers keyed by
//! progress token; tokens are released when the owning request completes.
//! `notifications/cancelled` frames resolve to the cancellation token of
//! the in-flight handler task bound to the request id in that session;
//! cancelling an unknown or already-answered id is a silent no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::messages::ProgressParams;
use crate::protocol::types::{ProgressToken, RequestId};

/// Fan-out router from progress token to subscribers
#[derive(Debug, Default)]
pub struct ProgressRouter {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<ProgressParams>>>>,
}

fn token_key(token: &ProgressToken) -> String {
    token.to_string()
}

impl ProgressRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to updates for a progress token
    pub fn subscribe(&self, token: &ProgressToken) -> mpsc::UnboundedReceiver<ProgressParams> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("subscriber lock");
        subscribers.entry(token_key(token)).or_default().push(tx);
        rx
    }

    /// Deliver a progress update to all subscribers of its token.
    ///
    /// Returns the number of subscribers reached.
    pub fn deliver(&self, params: ProgressParams) -> usize {
        let key = token_key(&params.progress_token);
        let mut subscribers = self.subscribers.lock().expect("subscriber lock");
        let Some(senders) = subscribers.get_mut(&key) else {
            return 0;
        };
        senders.retain(|tx| tx.send(params.clone()).is_ok());
        let reached = senders.len();
        if senders.is_empty() {
            subscribers.remove(&key);
        }
        reached
    }

    /// Release a token once its owning request completes
    pub fn release(&self, token: &ProgressToken) {
        let mut subscribers = self.subscribers.lock().expect("subscriber lock");
        subscribers.remove(&token_key(token));
    }
}

/// Table of in-flight request handler tasks, keyed by session and id
#[derive(Debug, Default)]
pub struct InflightTable {
    entries: Mutex<HashMap<(String, RequestId), CancellationToken>>,
}

impl InflightTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight request, returning its cancellation token
    pub fn insert(&self, session_id: &str, request_id: &RequestId) -> CancellationToken {
        let token = CancellationToken::new();
        let mut entries = self.entries.lock().expect("inflight lock");
        entries.insert(
            (session_id.to_string(), request_id.clone()),
            token.clone(),
        );
        token
    }

    /// Cancel an in-flight request; unknown ids are ignored
    pub fn cancel(&self, session_id: &str, request_id: &RequestId) -> bool {
        let entries = self.entries.lock().expect("inflight lock");
        match entries.get(&(session_id.to_string(), request_id.clone())) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove an entry once its response went out (or was discarded)
    pub fn remove(&self, session_id: &str, request_id: &RequestId) {
        let mut entries = self.entries.lock().expect("inflight lock");
        entries.remove(&(session_id.to_string(), request_id.clone()));
    }

    /// Cancel everything belonging to a session (teardown)
    pub fn cancel_session(&self, session_id: &str) {
        let mut entries = self.entries.lock().expect("inflight lock");
        entries.retain(|(sid, _), token| {
            if sid == session_id {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.entries.lock().expect("inflight lock").len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
