//! Server-to-client request tracking
//!
//! When the server calls back into the client (`roots/list`,
//! `sampling/createMessage`) it allocates a monotonically increasing id,
//! registers a one-shot waiter, sends the request, and blocks on the
//! waiter with a timeout. A matching inbound response frame is delivered
//! to the waiter and the entry removed; expiry removes the entry and
//! surfaces a timeout locally, after which a late response is ignored.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::core::error::{McpError, McpResult};
use crate::protocol::batch::ResponseFrame;
use crate::protocol::types::RequestId;

/// Default wait for a client response to a server-initiated request
pub const DEFAULT_CLIENT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Pending-request table for outbound server-to-client calls
#[derive(Debug, Default)]
pub struct RequestTracker {
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<ResponseFrame>>>,
}

impl RequestTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next outbound request id
    pub fn allocate_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a waiter for an outbound id
    pub fn register(&self, id: RequestId) -> oneshot::Receiver<ResponseFrame> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("pending lock");
        pending.insert(id, tx);
        rx
    }

    /// Deliver an inbound response frame to its waiter.
    ///
    /// Returns false when no waiter exists (late or unknown response).
    pub fn deliver(&self, frame: ResponseFrame) -> bool {
        let sender = {
            let mut pending = self.pending.lock().expect("pending lock");
            pending.remove(&frame.id)
        };
        match sender {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter without delivering (timeout or teardown)
    pub fn abandon(&self, id: &RequestId) {
        let mut pending = self.pending.lock().expect("pending lock");
        pending.remove(id);
    }

    /// Number of in-flight outbound requests
    pub fn len(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }

    /// Whether no outbound request is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all waiters, failing their callers (session teardown)
    pub fn clear(&self) {
        let mut pending = self.pending.lock().expect("pending lock");
        pending.clear();
    }

    /// Await a registered waiter with a timeout
    pub async fn wait(
        &self,
        id: RequestId,
        receiver: oneshot::Receiver<ResponseFrame>,
        timeout: Duration,
    ) -> McpResult<ResponseFrame> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => {
                self.abandon(&id);
                Err(McpError::transport("Response channel closed"))
            }
            Err(_) => {
                self.abandon(&id);
                Err(McpError::timeout(format!(
                    "No response to server request {id} within {timeout:?}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_monotonic() {
        let tracker = RequestTracker::new();
        let a = tracker.allocate_id();
        let b = tracker.allocate_id();
        match (a, b) {
            (RequestId::Number(x), RequestId::Number(y)) => assert!(y > x),
            other => panic!("expected numeric ids, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deliver_to_waiter() {
        let tracker = RequestTracker::new();
        let id = tracker.allocate_id();
        let rx = tracker.register(id.clone());

        let delivered = tracker.deliver(ResponseFrame {
            id: id.clone(),
            result: Some(json!({"ok": true})),
            error: None,
        });
        assert!(delivered);

        let frame = tracker
            .wait(id, rx, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(frame.result, Some(json!({"ok": true})));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_removes_waiter() {
        let tracker = RequestTracker::new();
        let id = tracker.allocate_id();
        let rx = tracker.register(id.clone());

        let result = tracker.wait(id.clone(), rx, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(McpError::Timeout(_))));
        assert!(tracker.is_empty());

        // A late response is ignored
        assert!(!tracker.deliver(ResponseFrame {
            id,
            result: Some(json!({})),
            error: None,
        }));
    }

    #[test]
    fn test_unknown_response_ignored() {
        let tracker = RequestTracker::new();
        assert!(!tracker.deliver(ResponseFrame {
            id: RequestId::Number(99),
            result: Some(json!({})),
            error: None,
        }));
    }
}
