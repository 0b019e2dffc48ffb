//! Server-initiated messaging toward the client.
//!
//! The transport supplies an [`OutboundSink`] that knows how to place a
//! message on the right channel (the correlated request stream, the GET
//! stream, or the stdio pipe). Notification helpers gate on the
//! capabilities the server advertised at initialize time; emitting a
//! notification for an unadvertised capability is a typed error, not a
//! silent drop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use strand_mcp_jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, RequestParams,
};
use strand_mcp_protocol::{methods, CancelledParams, McpError};

use crate::engine::McpServerEngine;

/// Transport-provided delivery channel for one session
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Deliver a message to the session's client. `related_request_id`
    /// names the in-flight incoming request whose stream should carry the
    /// message, when one exists.
    async fn deliver(
        &self,
        session_id: &str,
        message: JsonRpcMessage,
        related_request_id: Option<RequestId>,
    ) -> Result<(), McpError>;
}

/// Capability-gated sender for server→client traffic
pub struct ServerToClient {
    engine: Arc<McpServerEngine>,
    sink: Arc<dyn OutboundSink>,
}

impl ServerToClient {
    pub fn new(engine: Arc<McpServerEngine>, sink: Arc<dyn OutboundSink>) -> Self {
        Self { engine, sink }
    }

    /// Send a notification, enforcing the advertised-capability gate
    pub async fn notify(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        self.notify_related(session_id, method, params, None).await
    }

    /// Notification correlated to an in-flight incoming request, so a
    /// stateful transport prefers that request's stream
    pub async fn notify_related(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
        related_request_id: Option<RequestId>,
    ) -> Result<(), McpError> {
        self.engine.capabilities().check_notification(method)?;
        let notification =
            JsonRpcNotification::new(method, params.and_then(RequestParams::from_value));
        self.sink
            .deliver(
                session_id,
                JsonRpcMessage::Notification(notification),
                related_request_id,
            )
            .await
    }

    pub async fn resources_list_changed(&self, session_id: &str) -> Result<(), McpError> {
        self.notify(session_id, methods::NOTIFICATION_RESOURCES_LIST_CHANGED, None)
            .await
    }

    pub async fn resources_updated(&self, session_id: &str, uri: &str) -> Result<(), McpError> {
        self.notify(
            session_id,
            methods::NOTIFICATION_RESOURCES_UPDATED,
            Some(json!({"uri": uri})),
        )
        .await
    }

    pub async fn tools_list_changed(&self, session_id: &str) -> Result<(), McpError> {
        self.notify(session_id, methods::NOTIFICATION_TOOLS_LIST_CHANGED, None)
            .await
    }

    pub async fn prompts_list_changed(&self, session_id: &str) -> Result<(), McpError> {
        self.notify(session_id, methods::NOTIFICATION_PROMPTS_LIST_CHANGED, None)
            .await
    }

    /// `notifications/message`, gated on the logging capability
    pub async fn log_message(
        &self,
        session_id: &str,
        level: &str,
        data: Value,
    ) -> Result<(), McpError> {
        self.notify(
            session_id,
            methods::NOTIFICATION_MESSAGE,
            Some(json!({"level": level, "data": data})),
        )
        .await
    }

    /// Issue a server→client request and await the reply.
    ///
    /// On timeout the pending entry is removed, a best-effort
    /// `notifications/cancelled` goes out, and the caller sees
    /// [`McpError::RequestTimeout`].
    pub async fn request(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        related_request_id: Option<RequestId>,
    ) -> Result<Value, McpError> {
        self.request_with_progress(session_id, method, params, timeout, related_request_id, None)
            .await
    }

    /// Like [`Self::request`], with a sink receiving the peer's
    /// `notifications/progress` params. The engine stamps
    /// `params._meta.progressToken` with the request id.
    pub async fn request_with_progress(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        related_request_id: Option<RequestId>,
        progress: Option<strand_mcp_jsonrpc::ProgressSink>,
    ) -> Result<Value, McpError> {
        let id = self.engine.next_outbound_id();
        let params = if progress.is_some() {
            Some(strand_mcp_protocol::inject_progress_token(params, &id))
        } else {
            params
        };
        let rx = self
            .engine
            .pending()
            .register(id.clone(), progress)
            .map_err(|e| McpError::internal(e.to_string()))?;

        let request =
            JsonRpcRequest::new(id.clone(), method, params.and_then(RequestParams::from_value));
        self.sink
            .deliver(
                session_id,
                JsonRpcMessage::Request(request),
                related_request_id.clone(),
            )
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(JsonRpcMessage::Response(response))) => Ok(response.result),
            Ok(Ok(JsonRpcMessage::Error(error))) => {
                Err(McpError::from_error_object(&error.error))
            }
            Ok(Ok(_)) => Err(McpError::internal("unexpected reply shape")),
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.engine.pending().remove(&id);
                debug!(request_id = %id, "server-to-client request timed out");
                let cancelled = JsonRpcNotification::new(
                    methods::NOTIFICATION_CANCELLED,
                    RequestParams::from_value(
                        serde_json::to_value(CancelledParams::new(id).with_reason("timeout"))
                            .unwrap_or(Value::Null),
                    ),
                );
                let _ = self
                    .sink
                    .deliver(
                        session_id,
                        JsonRpcMessage::Notification(cancelled),
                        related_request_id,
                    )
                    .await;
                Err(McpError::RequestTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use strand_mcp_protocol::{ServerCapabilities, ToolsCapability};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, JsonRpcMessage)>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn deliver(
            &self,
            session_id: &str,
            message: JsonRpcMessage,
            _related_request_id: Option<RequestId>,
        ) -> Result<(), McpError> {
            self.sent
                .lock()
                .unwrap()
                .push((session_id.to_string(), message));
            Ok(())
        }
    }

    fn sender_with_tools() -> (ServerToClient, Arc<RecordingSink>) {
        let engine = Arc::new(
            McpServerEngine::builder()
                .capabilities(ServerCapabilities {
                    tools: Some(ToolsCapability::default()),
                    ..Default::default()
                })
                .build(),
        );
        let sink = Arc::new(RecordingSink::default());
        (
            ServerToClient::new(engine, Arc::clone(&sink) as Arc<dyn OutboundSink>),
            sink,
        )
    }

    #[tokio::test]
    async fn test_gated_notification_passes_when_advertised() {
        let (sender, sink) = sender_with_tools();
        sender.tools_list_changed("s1").await.unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1.method(),
            Some(methods::NOTIFICATION_TOOLS_LIST_CHANGED)
        );
    }

    #[tokio::test]
    async fn test_gated_notification_fails_when_missing() {
        let (sender, sink) = sender_with_tools();
        let result = sender.resources_list_changed("s1").await;
        assert!(matches!(
            result,
            Err(McpError::CapabilityUnavailable { .. })
        ));
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_timeout_emits_cancelled() {
        let (sender, sink) = sender_with_tools();
        let result = sender
            .request("s1", "sampling/createMessage", None, Duration::from_millis(20), None)
            .await;
        assert!(matches!(result, Err(McpError::RequestTimeout)));

        let sent = sink.sent.lock().unwrap();
        // the request itself, then the best-effort cancellation
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1].1.method(),
            Some(methods::NOTIFICATION_CANCELLED)
        );
    }
}
