//! The server-role engine.
//!
//! Transports feed classified messages in; the engine owns the handler
//! registry, the concurrent dispatch router, the initialize negotiation,
//! and the pending table for server-initiated requests. Session state
//! itself (who is initialized, which version was pinned) belongs to the
//! transport layer, which passes the relevant facts per call.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use strand_mcp_jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    PendingRequests, RequestId,
};
use strand_mcp_protocol::{
    methods, ClientCapabilities, Implementation, InitializeRequest, InitializeResult, McpError,
    McpVersion, ServerCapabilities,
};

use crate::capabilities::infer_capabilities;
use crate::handler::{HandlerRegistry, McpHandler, RequestContext};
use crate::router::RequestRouter;

/// How the engine answered a request
pub enum RequestOutcome {
    /// Answered without touching a handler (ping, gating errors)
    Immediate(JsonRpcMessage),
    /// Dispatched to a handler task; the receiver errors if the task is
    /// cancelled, in which case no response is sent at all
    Pending(oneshot::Receiver<JsonRpcMessage>),
}

pub struct McpServerEngine {
    server_info: Implementation,
    instructions: Option<String>,
    /// Declared capabilities merged with registry inference, fixed at build
    capabilities: ServerCapabilities,
    registry: Arc<HandlerRegistry>,
    router: RequestRouter,
    /// Server-initiated requests awaiting client replies
    pending: PendingRequests,
    next_request_id: AtomicI64,
}

impl McpServerEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Allocate the next id for a server-initiated request
    pub fn next_outbound_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Process the payload of an `initialize` request: negotiate the
    /// version and assemble the result. The caller transitions session
    /// state and rejects re-initialization before calling this.
    pub fn initialize(
        &self,
        params: Option<Value>,
    ) -> Result<(McpVersion, ClientCapabilities, InitializeResult), McpError> {
        let request: InitializeRequest = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|_| McpError::InvalidParams("malformed initialize params".into()))?,
            None => return Err(McpError::InvalidParams("initialize requires params".into())),
        };

        let version = McpVersion::negotiate(&request.protocol_version)?;
        let result = InitializeResult {
            protocol_version: version.as_str().to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        };
        Ok((version, request.capabilities, result))
    }

    /// Route one request. `initialized` reflects the session's handshake
    /// state; until it is true only `initialize` (handled by the caller)
    /// and `ping` get through.
    pub fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: RequestContext,
        initialized: bool,
    ) -> RequestOutcome {
        if request.method == methods::PING {
            return RequestOutcome::Immediate(JsonRpcMessage::Response(JsonRpcResponse::new(
                request.id,
                json!({}),
            )));
        }

        if request.method == methods::INITIALIZE {
            // The transport intercepts initialize; reaching the router
            // with it means the session already completed the handshake.
            return RequestOutcome::Immediate(JsonRpcMessage::Error(JsonRpcError::new(
                Some(request.id),
                McpError::AlreadyInitialized.to_error_object(),
            )));
        }

        if !initialized {
            return RequestOutcome::Immediate(JsonRpcMessage::Error(JsonRpcError::new(
                Some(request.id),
                McpError::NotInitialized.to_error_object(),
            )));
        }

        RequestOutcome::Pending(self.router.dispatch(request, ctx))
    }

    /// Route one notification. Cancellation and progress are handled
    /// inline; everything else is dispatched on its own task so
    /// notification handlers can issue further calls without deadlocking
    /// the receive loop.
    pub fn handle_notification(&self, notification: JsonRpcNotification, ctx: RequestContext) {
        if notification.method == methods::NOTIFICATION_CANCELLED {
            let request_id = notification
                .params
                .as_ref()
                .and_then(|p| p.get("requestId"))
                .and_then(RequestId::from_value);
            match request_id {
                Some(id) => {
                    self.router.cancel(ctx.session_id.as_deref(), &id);
                }
                None => warn!("cancellation notification without requestId"),
            }
            return;
        }

        if notification.method == methods::NOTIFICATION_PROGRESS {
            let params = notification
                .params
                .as_ref()
                .map(|p| p.to_value())
                .unwrap_or(Value::Null);
            match params.get("progressToken").and_then(RequestId::from_value) {
                Some(token) => {
                    if !self.pending.progress(&token, params) {
                        debug!(token = %token, "dropping progress for unknown token");
                    }
                }
                None => debug!("dropping progress notification without token"),
            }
            return;
        }

        if let Some(handler) = self.registry.lookup(&notification.method) {
            let method = notification.method.clone();
            let params = notification.params.map(|p| p.to_value());
            tokio::spawn(async move {
                if let Err(error) = handler.handle_notification(&method, params, ctx).await {
                    warn!(method = %method, error = %error, "notification handler failed");
                }
            });
        } else {
            debug!(method = %notification.method, "ignoring unhandled notification");
        }
    }

    /// Feed a client reply (response/error) to a server-initiated request.
    /// Unmatched replies are dropped and logged.
    pub fn handle_reply(&self, message: JsonRpcMessage) -> bool {
        let matched = self.pending.complete(message);
        if !matched {
            warn!("dropping reply with no matching pending request");
        }
        matched
    }

    /// Cancel an in-flight incoming request (transport teardown path)
    pub fn cancel_request(&self, session_id: Option<&str>, request_id: &RequestId) -> bool {
        self.router.cancel(session_id, request_id)
    }
}

/// Builder for [`McpServerEngine`]
pub struct EngineBuilder {
    server_info: Implementation,
    instructions: Option<String>,
    capabilities: ServerCapabilities,
    registry: HandlerRegistry,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            server_info: Implementation::new("strand-mcp-server", env!("CARGO_PKG_VERSION")),
            instructions: None,
            capabilities: ServerCapabilities::default(),
            registry: HandlerRegistry::new(),
        }
    }

    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_info = Implementation::new(name, version);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Explicitly declared capabilities; merged over inference, field-wise
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn handler<H>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: McpHandler + 'static,
    {
        self.registry.register(method, handler);
        self
    }

    pub fn build(self) -> McpServerEngine {
        let methods = self.registry.methods();
        let inferred = infer_capabilities(methods.iter().map(String::as_str));
        let capabilities = self.capabilities.merged_with(inferred);
        let registry = Arc::new(self.registry);

        McpServerEngine {
            server_info: self.server_info,
            instructions: self.instructions,
            capabilities,
            router: RequestRouter::new(Arc::clone(&registry)),
            registry,
            pending: PendingRequests::new(),
            next_request_id: AtomicI64::new(1),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Lister;

    #[async_trait]
    impl McpHandler for Lister {
        async fn handle(
            &self,
            _method: &str,
            _params: Option<Value>,
            _ctx: RequestContext,
        ) -> Result<Value, McpError> {
            Ok(json!({"tools": []}))
        }
    }

    fn engine() -> McpServerEngine {
        McpServerEngine::builder()
            .server_info("test-server", "0.0.1")
            .instructions("be nice")
            .handler("tools/list", Lister)
            .build()
    }

    #[test]
    fn test_capabilities_inferred_at_build() {
        let engine = engine();
        assert!(engine.capabilities().tools.is_some());
        assert!(engine.capabilities().resources.is_none());
    }

    #[test]
    fn test_initialize_negotiation() {
        let engine = engine();
        let params = json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"sampling": {}},
            "clientInfo": {"name": "c", "version": "1"}
        });
        let (version, client_caps, result) = engine.initialize(Some(params)).unwrap();
        assert_eq!(version, McpVersion::V2025_06_18);
        assert!(client_caps.sampling.is_some());
        assert_eq!(result.protocol_version, "2025-06-18");
        assert_eq!(result.instructions.as_deref(), Some("be nice"));
    }

    #[test]
    fn test_initialize_unsupported_version() {
        let engine = engine();
        let params = json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "clientInfo": {"name": "c", "version": "1"}
        });
        assert!(matches!(
            engine.initialize(Some(params)),
            Err(McpError::UnsupportedProtocolVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_ping_before_initialization() {
        let engine = engine();
        let request = JsonRpcRequest::new(RequestId::Number(1), "ping", None);
        match engine.handle_request(request, RequestContext::default(), false) {
            RequestOutcome::Immediate(JsonRpcMessage::Response(response)) => {
                assert_eq!(response.result, json!({}));
            }
            _ => panic!("ping should answer immediately"),
        }
    }

    #[tokio::test]
    async fn test_uninitialized_session_is_gated() {
        let engine = engine();
        let request = JsonRpcRequest::new(RequestId::Number(2), "tools/list", None);
        match engine.handle_request(request, RequestContext::default(), false) {
            RequestOutcome::Immediate(JsonRpcMessage::Error(error)) => {
                assert_eq!(error.error.code, -32600);
                assert!(error.error.message.contains("not initialized"));
            }
            _ => panic!("expected not-initialized error"),
        }
    }

    #[tokio::test]
    async fn test_initialized_request_dispatches() {
        let engine = engine();
        let request = JsonRpcRequest::new(RequestId::Number(3), "tools/list", None);
        match engine.handle_request(request, RequestContext::default(), true) {
            RequestOutcome::Pending(rx) => {
                let message = rx.await.unwrap();
                assert!(matches!(message, JsonRpcMessage::Response(_)));
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_notification_aborts_handler() {
        struct Stuck;

        #[async_trait]
        impl McpHandler for Stuck {
            async fn handle(
                &self,
                _method: &str,
                _params: Option<Value>,
                _ctx: RequestContext,
            ) -> Result<Value, McpError> {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(json!({}))
            }
        }

        let engine = McpServerEngine::builder().handler("slow", Stuck).build();
        let request = JsonRpcRequest::new(RequestId::Number(9), "slow", None);
        let outcome = engine.handle_request(request, RequestContext::default(), true);
        tokio::task::yield_now().await;

        let cancel = JsonRpcNotification::new(
            methods::NOTIFICATION_CANCELLED,
            strand_mcp_jsonrpc::RequestParams::from_value(json!({"requestId": 9})),
        );
        engine.handle_notification(cancel, RequestContext::default());

        match outcome {
            RequestOutcome::Pending(rx) => assert!(rx.await.is_err()),
            _ => panic!("expected pending dispatch"),
        }
    }

    #[tokio::test]
    async fn test_progress_notification_routed_to_pending() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let engine = engine();
        let id = engine.next_outbound_id();
        let hits = std::sync::Arc::new(AtomicUsize::new(0));
        let hits_clone = std::sync::Arc::clone(&hits);
        let _rx = engine
            .pending()
            .register(
                id.clone(),
                Some(Box::new(move |_| {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let notification = JsonRpcNotification::new(
            methods::NOTIFICATION_PROGRESS,
            strand_mcp_jsonrpc::RequestParams::from_value(json!({
                "progressToken": serde_json::to_value(&id).unwrap(),
                "progress": 0.3
            })),
        );
        engine.handle_notification(notification, RequestContext::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // unknown token is dropped
        let unknown = JsonRpcNotification::new(
            methods::NOTIFICATION_PROGRESS,
            strand_mcp_jsonrpc::RequestParams::from_value(json!({
                "progressToken": 9999, "progress": 0.9
            })),
        );
        engine.handle_notification(unknown, RequestContext::default());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reply_correlation() {
        let engine = engine();
        let id = engine.next_outbound_id();
        let _rx = engine.pending().register(id.clone(), None).unwrap();

        let matched = engine.handle_reply(JsonRpcMessage::Response(JsonRpcResponse::new(
            id,
            json!({}),
        )));
        assert!(matched);

        let unmatched = engine.handle_reply(JsonRpcMessage::Response(JsonRpcResponse::new(
            RequestId::Number(777),
            json!({}),
        )));
        assert!(!unmatched);
    }
}
