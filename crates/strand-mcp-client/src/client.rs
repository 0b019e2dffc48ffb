//! Client-role protocol engine.
//!
//! Owns the monotone request-id counter and the pending-request table.
//! Outgoing requests pick up a `_meta.progressToken` when a progress
//! callback is registered; incoming traffic is drained by a background
//! task that correlates replies, routes progress, and dispatches
//! server-initiated requests to registered handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use strand_mcp_jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    PendingRequests, RequestId, RequestParams,
};
use strand_mcp_protocol::{
    inject_progress_token, methods, CancelledParams, ClientCapabilities, Implementation,
    InitializeRequest, InitializeResult, McpError, McpVersion, ProgressParams, ServerCapabilities,
};

/// Transport-side sender the engine writes through
#[async_trait]
pub trait ClientSender: Send + Sync {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), McpError>;
}

/// Handler for server-initiated requests (sampling, elicitation, roots).
/// Registering one implies the matching client capability.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;
}

/// Callback invoked with each progress update for a request
pub type ProgressCallback = Box<dyn Fn(ProgressParams) + Send + Sync>;

/// Hook observing server notifications that are not control traffic
pub type NotificationHook = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// Per-request options
#[derive(Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressCallback>,
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

/// The client engine
pub struct McpClient {
    sender: Arc<dyn ClientSender>,
    pending: Arc<PendingRequests>,
    next_request_id: AtomicI64,
    config: crate::config::ClientConfig,
    handlers: Arc<HashMap<String, Arc<dyn ClientHandler>>>,
    notification_hook: Option<NotificationHook>,
    server_capabilities: Arc<Mutex<Option<ServerCapabilities>>>,
    initialized: AtomicBool,
    receive_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl McpClient {
    pub fn builder(sender: Arc<dyn ClientSender>) -> McpClientBuilder {
        McpClientBuilder {
            sender,
            config: crate::config::ClientConfig::default(),
            handlers: HashMap::new(),
            notification_hook: None,
        }
    }

    /// Capabilities inferred from registered handlers: a sampling handler
    /// implies the sampling capability, and so on.
    pub fn inferred_capabilities(&self) -> ClientCapabilities {
        let mut caps = ClientCapabilities::default();
        for method in self.handlers.keys() {
            match method.split('/').next() {
                Some("sampling") => {
                    caps.sampling.get_or_insert_with(Default::default);
                }
                Some("elicitation") => {
                    caps.elicitation.get_or_insert_with(Default::default);
                }
                Some("roots") => {
                    caps.roots.get_or_insert_with(Default::default);
                }
                _ => {}
            }
        }
        caps
    }

    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server_capabilities.lock().clone()
    }

    /// Start draining incoming traffic. Call once with the transport's
    /// receive stream; when it ends, every pending request fails with a
    /// transport error.
    pub fn start(&self, mut incoming: mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let pending = Arc::clone(&self.pending);
        let handlers = Arc::clone(&self.handlers);
        let sender = Arc::clone(&self.sender);
        let hook = self.notification_hook.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                match message {
                    reply @ (JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_)) => {
                        if !pending.complete(reply) {
                            debug!("dropping reply with no matching pending request");
                        }
                    }
                    JsonRpcMessage::Notification(notification) => {
                        handle_notification(notification, &pending, &hook);
                    }
                    JsonRpcMessage::Request(request) => {
                        dispatch_server_request(request, &handlers, &sender);
                    }
                }
            }
            // Transport closed underneath us: fail everything in flight.
            pending.fail_all(|id| {
                JsonRpcMessage::Error(JsonRpcError::new(
                    Some(id.clone()),
                    McpError::ConnectionClosed.to_error_object(),
                ))
            });
        });
        *self.receive_task.lock() = Some(task);
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Issue a request and await its result.
    ///
    /// With a progress callback, `params._meta.progressToken` is set to
    /// the request id (overwriting any caller-supplied token, preserving
    /// sibling `_meta` keys). On timeout or scope cancellation the
    /// pending entry is removed and `notifications/cancelled` goes out
    /// best-effort.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, McpError> {
        if self.config.strict_capabilities {
            if let Some(caps) = self.server_capabilities.lock().as_ref() {
                if !caps.supports_method(method) {
                    return Err(McpError::CapabilityUnavailable {
                        which: method.to_string(),
                    });
                }
            }
        }

        let id = self.next_id();
        let params = if options.progress.is_some() {
            Some(inject_progress_token(params, &id))
        } else {
            params
        };
        let progress_sink = options.progress.map(|callback| {
            Box::new(move |value: Value| {
                match serde_json::from_value::<ProgressParams>(value) {
                    Ok(update) => callback(update),
                    Err(err) => debug!(error = %err, "dropping malformed progress params"),
                }
            }) as strand_mcp_jsonrpc::ProgressSink
        });

        let rx = self
            .pending
            .register(id.clone(), progress_sink)
            .map_err(|err| McpError::internal(err.to_string()))?;

        let request = JsonRpcRequest::new(
            id.clone(),
            method,
            params.and_then(RequestParams::from_value),
        );

        // Dropping this future before completion counts as cancelling the
        // caller's scope: the guard unregisters the entry and emits the
        // cancellation notification.
        let mut guard = CancelGuard {
            pending: Arc::clone(&self.pending),
            sender: Arc::clone(&self.sender),
            id: id.clone(),
            armed: true,
        };

        if let Err(err) = self.sender.send(&JsonRpcMessage::Request(request)).await {
            guard.armed = false;
            self.pending.remove(&id);
            return Err(err);
        }

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let outcome = tokio::time::timeout(timeout, rx).await;
        guard.armed = false;

        match outcome {
            Ok(Ok(JsonRpcMessage::Response(response))) => Ok(response.result),
            Ok(Ok(JsonRpcMessage::Error(error))) => {
                Err(McpError::from_error_object(&error.error))
            }
            Ok(Ok(_)) => Err(McpError::internal("unexpected reply shape")),
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                self.send_cancelled(id, "timeout").await;
                Err(McpError::RequestTimeout)
            }
        }
    }

    /// Best-effort `notifications/cancelled`
    async fn send_cancelled(&self, id: RequestId, reason: &str) {
        let params = serde_json::to_value(CancelledParams::new(id).with_reason(reason))
            .unwrap_or(Value::Null);
        let notification = JsonRpcNotification::new(
            methods::NOTIFICATION_CANCELLED,
            RequestParams::from_value(params),
        );
        if let Err(err) = self
            .sender
            .send(&JsonRpcMessage::Notification(notification))
            .await
        {
            debug!(error = %err, "failed to emit cancellation notification");
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification =
            JsonRpcNotification::new(method, params.and_then(RequestParams::from_value));
        self.sender
            .send(&JsonRpcMessage::Notification(notification))
            .await
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.request(methods::PING, None, RequestOptions::default())
            .await
            .map(|_| ())
    }

    /// Run the initialize handshake: send `initialize`, persist the
    /// server's capabilities, confirm with `notifications/initialized`.
    /// The caller pins the returned negotiated version on its transport.
    pub async fn initialize(
        &self,
        client_info: Implementation,
        capabilities: Option<ClientCapabilities>,
    ) -> Result<InitializeResult, McpError> {
        let capabilities = capabilities.unwrap_or_else(|| self.inferred_capabilities());
        let params = serde_json::to_value(InitializeRequest::new(
            McpVersion::LATEST,
            capabilities,
            client_info,
        ))
        .map_err(|err| McpError::internal(err.to_string()))?;

        let value = self
            .request(methods::INITIALIZE, Some(params), RequestOptions::default())
            .await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|_| McpError::InvalidRequest("malformed initialize result".into()))?;

        // Reject a version we do not speak before committing to it.
        McpVersion::negotiate(&result.protocol_version)?;

        *self.server_capabilities.lock() = Some(result.capabilities.clone());
        self.initialized.store(true, Ordering::SeqCst);

        self.notify(methods::NOTIFICATION_INITIALIZED, None).await?;
        Ok(result)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Stop the receive task; pending requests fail on transport close
    pub fn shutdown(&self) {
        if let Some(task) = self.receive_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_notification(
    notification: JsonRpcNotification,
    pending: &PendingRequests,
    hook: &Option<NotificationHook>,
) {
    if notification.method == methods::NOTIFICATION_PROGRESS {
        let params = notification
            .params
            .as_ref()
            .map(|p| p.to_value())
            .unwrap_or(Value::Null);
        match params
            .get("progressToken")
            .and_then(RequestId::from_value)
        {
            Some(token) => {
                if !pending.progress(&token, params) {
                    debug!(token = %token, "dropping progress for unknown token");
                }
            }
            None => debug!("dropping progress notification without token"),
        }
        return;
    }

    if let Some(hook) = hook {
        hook(notification);
    }
}

fn dispatch_server_request(
    request: JsonRpcRequest,
    handlers: &Arc<HashMap<String, Arc<dyn ClientHandler>>>,
    sender: &Arc<dyn ClientSender>,
) {
    let reply_to = Arc::clone(sender);
    let handler = handlers.get(&request.method).cloned();
    // Each dispatch runs on its own task; the receive loop never waits.
    tokio::spawn(async move {
        let reply = match handler {
            Some(handler) => {
                let params = request.params.map(|p| p.to_value());
                match handler.handle(&request.method, params).await {
                    Ok(result) => {
                        JsonRpcMessage::Response(JsonRpcResponse::new(request.id, result))
                    }
                    Err(error) => JsonRpcMessage::Error(JsonRpcError::new(
                        Some(request.id),
                        error.to_error_object(),
                    )),
                }
            }
            None => JsonRpcMessage::Error(JsonRpcError::method_not_found(
                request.id,
                &request.method,
            )),
        };
        if let Err(err) = reply_to.send(&reply).await {
            warn!(error = %err, "failed to deliver reply to server request");
        }
    });
}

/// Emits `notifications/cancelled` when a request future is dropped
/// before completion
struct CancelGuard {
    pending: Arc<PendingRequests>,
    sender: Arc<dyn ClientSender>,
    id: RequestId,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.pending.remove(&self.id);
        let sender = Arc::clone(&self.sender);
        let id = self.id.clone();
        let params = serde_json::to_value(CancelledParams::new(id).with_reason("cancelled"))
            .unwrap_or(Value::Null);
        // Best-effort only; outside a runtime there is nobody to notify.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let notification = JsonRpcNotification::new(
                    methods::NOTIFICATION_CANCELLED,
                    RequestParams::from_value(params),
                );
                let _ = sender
                    .send(&JsonRpcMessage::Notification(notification))
                    .await;
            });
        }
    }
}

/// Builder wiring handlers and hooks before the engine starts
pub struct McpClientBuilder {
    sender: Arc<dyn ClientSender>,
    config: crate::config::ClientConfig,
    handlers: HashMap<String, Arc<dyn ClientHandler>>,
    notification_hook: Option<NotificationHook>,
}

impl McpClientBuilder {
    pub fn config(mut self, config: crate::config::ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler<H>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: ClientHandler + 'static,
    {
        self.handlers.insert(method.into(), Arc::new(handler));
        self
    }

    pub fn on_notification(mut self, hook: NotificationHook) -> Self {
        self.notification_hook = Some(hook);
        self
    }

    pub fn build(self) -> McpClient {
        McpClient {
            sender: self.sender,
            pending: Arc::new(PendingRequests::new()),
            next_request_id: AtomicI64::new(1),
            config: self.config,
            handlers: Arc::new(self.handlers),
            notification_hook: self.notification_hook,
            server_capabilities: Arc::new(Mutex::new(None)),
            initialized: AtomicBool::new(false),
            receive_task: Mutex::new(None),
        }
    }
}
