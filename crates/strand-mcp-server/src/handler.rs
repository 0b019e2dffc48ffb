//! Method handler registry.
//!
//! Handlers return domain errors only; conversion to JSON-RPC error
//! objects happens once, in the router, with sanitized messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use strand_mcp_jsonrpc::RequestId;
use strand_mcp_protocol::{methods, McpError, ProgressParams};

use crate::outbound::ServerToClient;

/// Context a handler sees for one incoming call.
///
/// The `peer` handle lets handlers talk back to the client mid-request;
/// messages sent through it are correlated to this request so stateful
/// transports can carry them on the request's own stream.
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Session the call arrived on, when the transport tracks sessions
    pub session_id: Option<String>,
    /// Id of the request being handled; `None` for notifications
    pub request_id: Option<RequestId>,
    /// Progress token the caller supplied in `params._meta`, if any
    pub progress_token: Option<RequestId>,
    /// Outbound channel toward the client; absent on transports that
    /// cannot talk back
    pub peer: Option<Arc<ServerToClient>>,
}

impl RequestContext {
    fn peer(&self) -> Result<&Arc<ServerToClient>, McpError> {
        self.peer.as_ref().ok_or(McpError::NotConnected)
    }

    fn session(&self) -> &str {
        self.session_id.as_deref().unwrap_or_default()
    }

    /// Send a notification to the client; same capability gating as the
    /// engine-level helpers. Correlated to this request's stream.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.peer()?
            .notify_related(self.session(), method, params, self.request_id.clone())
            .await
    }

    /// Emit `notifications/progress` for this request. A no-op when the
    /// caller supplied no progress token — it did not ask for updates.
    pub async fn progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<(), McpError> {
        let Some(token) = self.progress_token.clone() else {
            debug!("no progress token on request, skipping update");
            return Ok(());
        };
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        };
        let params = serde_json::to_value(params)
            .map_err(|err| McpError::internal(err.to_string()))?;
        self.notify(methods::NOTIFICATION_PROGRESS, Some(params)).await
    }

    /// Issue a server→client request correlated to this call, preferring
    /// this request's response stream.
    pub async fn request_to_client(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.peer()?
            .request(
                self.session(),
                method,
                params,
                timeout,
                self.request_id.clone(),
            )
            .await
    }
}

/// Application-registered handler for one or more methods
#[async_trait]
pub trait McpHandler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<Value, McpError>;

    /// Notifications default to being ignored
    async fn handle_notification(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> Result<(), McpError> {
        let _ = (method, params, ctx);
        Ok(())
    }
}

/// Method-string-keyed lookup table
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn McpHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: McpHandler + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    pub fn register_arc(&mut self, method: impl Into<String>, handler: Arc<dyn McpHandler>) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn lookup(&self, method: &str) -> Option<Arc<dyn McpHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Registered method names; input to capability inference
    pub fn methods(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl McpHandler for Echo {
        async fn handle(
            &self,
            _method: &str,
            params: Option<Value>,
            _ctx: RequestContext,
        ) -> Result<Value, McpError> {
            Ok(params.unwrap_or(json!({})))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_and_dispatch() {
        let mut registry = HandlerRegistry::new();
        registry.register("tools/call", Echo);

        let handler = registry.lookup("tools/call").unwrap();
        let result = handler
            .handle("tools/call", Some(json!({"a": 1})), RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result, json!({"a": 1}));

        assert!(registry.lookup("tools/list").is_none());
        assert_eq!(registry.methods(), vec!["tools/call".to_string()]);
    }
}
