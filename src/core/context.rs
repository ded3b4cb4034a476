//! Per-request handler context
//!
//! Handlers receive a [`RequestContext`] carrying the session identity, the
//! negotiated protocol version, the request id, a cooperative cancellation
//! signal, and a progress reporter bound to the request's progress token.
//!
//! Contexts hold the session *id* rather than the session object; handler
//! code resolves session state through the session manager on demand, which
//! keeps the session/transport/handler reference graph acyclic.

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::core::error::{McpError, McpResult};
use crate::protocol::messages::ProgressParams;
use crate::protocol::methods;
use crate::protocol::types::{JsonRpcNotification, ProgressToken, RequestId};
use crate::protocol::version::ProtocolVersion;

/// Outbound notification queue entry: optional target session plus frame.
pub(crate) type QueuedNotification = (Option<String>, JsonRpcNotification);

/// Context handed to every tool and resource handler invocation
#[derive(Debug, Clone)]
pub struct RequestContext {
    session_id: String,
    protocol_version: ProtocolVersion,
    request_id: Option<RequestId>,
    cancel: CancellationToken,
    progress_token: Option<ProgressToken>,
    notifications: Option<mpsc::UnboundedSender<QueuedNotification>>,
}

impl RequestContext {
    pub(crate) fn new(
        session_id: String,
        protocol_version: ProtocolVersion,
        request_id: Option<RequestId>,
        cancel: CancellationToken,
        progress_token: Option<ProgressToken>,
        notifications: Option<mpsc::UnboundedSender<QueuedNotification>>,
    ) -> Self {
        Self {
            session_id,
            protocol_version,
            request_id,
            cancel,
            progress_token,
            notifications,
        }
    }

    /// A detached context for direct (non-dispatched) handler invocation
    pub fn detached() -> Self {
        Self {
            session_id: String::new(),
            protocol_version: ProtocolVersion::default(),
            request_id: None,
            cancel: CancellationToken::new(),
            progress_token: None,
            notifications: None,
        }
    }

    /// Id of the session this request belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Protocol version negotiated for the session
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Id of the request being served; absent for notification-triggered work
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Whether the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request is cancelled.
    ///
    /// Handlers that suspend should select on this to return promptly; any
    /// result produced after cancellation is discarded by the dispatcher.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The token used to cancel this request
    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Report progress for this request.
    ///
    /// A no-op when the caller did not attach a progress token.
    pub fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> McpResult<()> {
        let Some(token) = &self.progress_token else {
            return Ok(());
        };
        let Some(sender) = &self.notifications else {
            return Ok(());
        };

        let message = message.filter(|_| self.protocol_version.supports_progress_message());
        let params = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message,
        };
        let notification = JsonRpcNotification::new(methods::PROGRESS, Some(params))?;
        sender
            .send((Some(self.session_id.clone()), notification))
            .map_err(|_| McpError::transport("Notification channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detached_context_defaults() {
        let ctx = RequestContext::detached();
        assert!(!ctx.is_cancelled());
        assert!(ctx.request_id().is_none());
        assert!(ctx.report_progress(0.5, None, None).is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_signal() {
        let ctx = RequestContext::detached();
        let token = ctx.cancellation_token().clone();
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_progress_reporting() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new(
            "s1".to_string(),
            ProtocolVersion::V2025_03_26,
            Some(RequestId::Number(1)),
            CancellationToken::new(),
            Some(json!("tok")),
            Some(tx),
        );

        ctx.report_progress(3.0, Some(10.0), Some("working".to_string()))
            .unwrap();

        let (session, notification) = rx.recv().await.unwrap();
        assert_eq!(session.as_deref(), Some("s1"));
        assert_eq!(notification.method, methods::PROGRESS);
        let params = notification.params.unwrap();
        assert_eq!(params["progressToken"], json!("tok"));
        assert_eq!(params["message"], json!("working"));
    }

    #[tokio::test]
    async fn test_progress_message_stripped_on_2024() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = RequestContext::new(
            "s1".to_string(),
            ProtocolVersion::V2024_11_05,
            Some(RequestId::Number(1)),
            CancellationToken::new(),
            Some(json!(7)),
            Some(tx),
        );

        ctx.report_progress(1.0, None, Some("hidden".to_string()))
            .unwrap();

        let (_, notification) = rx.recv().await.unwrap();
        let params = notification.params.unwrap();
        assert!(params.get("message").is_none());
    }
}
