//! The Streamable-HTTP endpoint.
//!
//! A single URL: POST submits client messages, GET opens the server→client
//! SSE stream, DELETE terminates the session, anything else is 405. The
//! handler is transport-pure — it maps `http::Request` to `http::Response`
//! and is exercised in tests without sockets.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use http::{header, Method, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full, Limited};
use tracing::{debug, warn};

use strand_mcp_jsonrpc::{
    message::parse_body, JsonRpcError, JsonRpcErrorObject, JsonRpcMessage, JsonRpcNotification,
    JsonRpcResponse, ParsedBody, RequestId,
};
use strand_mcp_protocol::{methods, McpError, McpVersion};
use strand_mcp_server::{
    McpServerEngine, OutboundSink, RequestContext, RequestOutcome, ServerToClient,
};
use strand_mcp_session::{SessionManager, SessionState};

use crate::config::{HttpServerConfig, SessionMode};
use crate::protection::RebindingViolation;
use crate::stream_manager::{SseBody, StreamError, StreamManager};
use crate::{HEADER_LAST_EVENT_ID, HEADER_PROTOCOL_VERSION, HEADER_SESSION_ID};

/// Pseudo-session key scoping streams in stateless mode
const STATELESS_SESSION: &str = "stateless";

const STATE_UNINITIALIZED: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_INITIALIZED: u8 = 2;

/// The endpoint handler. Clone-cheap via inner `Arc`s.
pub struct StreamableHttpService {
    config: HttpServerConfig,
    engine: Arc<McpServerEngine>,
    sessions: Arc<SessionManager>,
    streams: Arc<StreamManager>,
    /// Shared with every handler's `RequestContext`
    outbound: Arc<ServerToClient>,
    /// Initialization state machine for stateless mode, which has no
    /// session registry to track it
    stateless_state: AtomicU8,
    terminated: AtomicBool,
}

impl StreamableHttpService {
    pub fn new(engine: Arc<McpServerEngine>, config: HttpServerConfig) -> Self {
        let generator = match &config.session_mode {
            SessionMode::Stateful {
                session_id_generator,
            } => session_id_generator.clone(),
            SessionMode::Stateless => None,
        };
        let sessions = Arc::new(SessionManager::new(generator).with_callbacks(
            config.on_session_initialized.clone(),
            config.on_session_closed.clone(),
        ));
        let streams = Arc::new(StreamManager::new(
            config.event_store.clone(),
            config.retry_interval,
            config.keepalive_interval,
        ));
        let outbound = Arc::new(ServerToClient::new(
            Arc::clone(&engine),
            Arc::new(StreamSink {
                streams: Arc::clone(&streams),
            }),
        ));
        Self {
            config,
            engine,
            sessions,
            streams,
            outbound,
            stateless_state: AtomicU8::new(STATE_UNINITIALIZED),
            terminated: AtomicBool::new(false),
        }
    }

    /// Server→client requests need sessions to route replies back
    pub fn supports_server_to_client_requests(&self) -> bool {
        self.config.session_mode.is_stateful()
    }

    /// Capability-gated sender for server-initiated traffic
    pub fn outbound(&self) -> Arc<ServerToClient> {
        Arc::clone(&self.outbound)
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Terminate the endpoint: every live session is closed (firing
    /// `on_session_closed`) and all subsequent requests answer 404.
    pub async fn close(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        for session_id in self.sessions.terminate_all().await {
            self.streams.close_session(&session_id).await;
        }
        self.streams.close_session(STATELESS_SESSION).await;
    }

    /// Handle one HTTP exchange
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<SseBody>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.terminated.load(Ordering::SeqCst) {
            return json_error_response(
                StatusCode::NOT_FOUND,
                JsonRpcError::new(
                    None,
                    JsonRpcErrorObject::new(
                        strand_mcp_jsonrpc::JsonRpcErrorCode::InvalidRequest,
                        Some("Server transport has been terminated".into()),
                        None,
                    ),
                ),
            );
        }

        let session_header = header_string(&req, HEADER_SESSION_ID);
        let known_session = match &session_header {
            Some(id) if self.config.session_mode.is_stateful() => {
                self.sessions.get_session(id).await
            }
            _ => None,
        };

        // DNS-rebinding checks guard everything except the DELETE of a
        // session we actually know — termination must stay reachable.
        let skip_protection = req.method() == &Method::DELETE && known_session.is_some();
        if !skip_protection {
            let host = header_string(&req, "host");
            let origin = header_string(&req, "origin");
            match self
                .config
                .dns_rebinding_protection
                .check(host.as_deref(), origin.as_deref())
            {
                Ok(()) => {}
                Err(RebindingViolation::Host) => {
                    return text_response(
                        StatusCode::MISDIRECTED_REQUEST,
                        "Host header is missing or not allowed",
                    )
                }
                Err(RebindingViolation::Origin) => {
                    return text_response(StatusCode::FORBIDDEN, "Origin not allowed")
                }
            }
        }

        // Version guard: a present header must name a supported version.
        let header_version = match header_string(&req, HEADER_PROTOCOL_VERSION) {
            Some(raw) => match McpVersion::parse(&raw) {
                Some(version) => Some(version),
                None => {
                    return json_error_response(
                        StatusCode::BAD_REQUEST,
                        JsonRpcError::new(
                            None,
                            McpError::UnsupportedProtocolVersion { requested: raw }
                                .to_error_object(),
                        ),
                    )
                }
            },
            None => None,
        };
        let effective_version = header_version
            .or_else(|| known_session.as_ref().and_then(|s| s.protocol_version))
            .unwrap_or(McpVersion::DEFAULT_NEGOTIATED);

        let method = req.method().clone();
        match method {
            Method::POST => {
                self.handle_post(req, session_header, known_session, effective_version)
                    .await
            }
            Method::GET => {
                self.handle_get(req, session_header, known_session, effective_version)
                    .await
            }
            Method::DELETE => self.handle_delete(session_header, known_session).await,
            _ => method_not_allowed("GET, POST, DELETE", "Method not allowed"),
        }
    }

    async fn handle_post<B>(
        &self,
        req: Request<B>,
        session_header: Option<String>,
        known_session: Option<strand_mcp_session::SessionInfo>,
        effective_version: McpVersion,
    ) -> Response<SseBody>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // Accept rules depend on the response mode.
        let accept = header_string(&req, header::ACCEPT.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let accepts_json = accept.contains("application/json") || accept.contains("*/*");
        let accepts_sse = accept.contains("text/event-stream") || accept.contains("*/*");
        if self.config.enable_json_response {
            if !accepts_json {
                return text_response(
                    StatusCode::NOT_ACCEPTABLE,
                    "Accept header must include application/json",
                );
            }
        } else if !(accepts_json && accepts_sse) {
            return text_response(
                StatusCode::NOT_ACCEPTABLE,
                "Accept header must include both application/json and text/event-stream",
            );
        }

        let content_type = header_string(&req, header::CONTENT_TYPE.as_str()).unwrap_or_default();
        if !content_type.starts_with("application/json") {
            return text_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/json",
            );
        }

        let body = match read_body(req, self.config.max_body_size).await {
            Ok(bytes) => bytes,
            Err(response) => return response,
        };
        let body_str = match std::str::from_utf8(&body) {
            Ok(s) => s,
            Err(_) => {
                return json_error_response(StatusCode::BAD_REQUEST, JsonRpcError::parse_error())
            }
        };

        let parsed = match parse_body(body_str) {
            Ok(parsed) => parsed,
            Err(error) => return json_error_response(StatusCode::BAD_REQUEST, error),
        };

        // Batches must not mix initialize with anything; the whole batch
        // is rejected.
        if matches!(parsed, ParsedBody::Batch(_)) && parsed.contains_method(methods::INITIALIZE) {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::new(
                    None,
                    JsonRpcErrorObject::new(
                        strand_mcp_jsonrpc::JsonRpcErrorCode::InvalidRequest,
                        Some("initialize must not be part of a batch".into()),
                        None,
                    ),
                ),
            );
        }

        if parsed.contains_method(methods::INITIALIZE) {
            return self
                .handle_initialize(parsed, session_header, known_session, effective_version)
                .await;
        }

        // Non-initialize traffic: resolve the session and its handshake
        // state.
        let (session_id, initialized) = match &self.config.session_mode {
            SessionMode::Stateful { .. } => {
                let session_id = match session_header {
                    Some(id) => id,
                    None => {
                        return json_error_response(
                            StatusCode::BAD_REQUEST,
                            JsonRpcError::new(
                                None,
                                JsonRpcErrorObject::new(
                                    strand_mcp_jsonrpc::JsonRpcErrorCode::InvalidRequest,
                                    Some("Mcp-Session-Id header required".into()),
                                    None,
                                ),
                            ),
                        )
                    }
                };
                let session = match known_session {
                    Some(session) if !session.is_terminated() => session,
                    _ => return session_not_found(&session_id),
                };
                self.sessions.touch(&session_id).await;
                let initialized = session.state == SessionState::Initialized
                    || session.state == SessionState::Initializing;
                (Some(session_id), initialized)
            }
            SessionMode::Stateless => {
                let state = self.stateless_state.load(Ordering::SeqCst);
                (None, state != STATE_UNINITIALIZED)
            }
        };

        // A server that has never been initialized rejects everything but
        // initialize outright, same as the GET path.
        if !initialized {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::new(None, McpError::NotInitialized.to_error_object()),
            );
        }

        // Partition the body. Notifications and replies are absorbed
        // immediately; requests are held back so the response stream can
        // be registered before any handler runs — correlated messages a
        // handler emits must find that stream.
        let mut requests = Vec::new();
        for message in parsed.messages() {
            match message {
                JsonRpcMessage::Request(request) => requests.push(request.clone()),
                JsonRpcMessage::Notification(notification) => {
                    let ctx = self.request_context(&session_id, None);
                    self.dispatch_notification(notification.clone(), ctx).await;
                }
                reply => {
                    self.engine.handle_reply(reply.clone());
                }
            }
        }

        if requests.is_empty() {
            return self.accepted(session_id.as_deref(), effective_version);
        }

        let was_batch = matches!(parsed, ParsedBody::Batch(_));
        if self.config.enable_json_response {
            let outcomes = self.dispatch_requests(requests, &session_id, initialized);
            self.json_mode_response(outcomes, was_batch, session_id.as_deref(), effective_version)
                .await
        } else {
            self.sse_mode_response(requests, &session_id, initialized, effective_version)
        }
    }

    fn request_context(
        &self,
        session_id: &Option<String>,
        request: Option<&strand_mcp_jsonrpc::JsonRpcRequest>,
    ) -> RequestContext {
        RequestContext {
            session_id: session_id.clone(),
            request_id: request.map(|r| r.id.clone()),
            progress_token: request
                .and_then(|r| r.params.as_ref())
                .and_then(|p| p.get("_meta"))
                .and_then(|meta| meta.get("progressToken"))
                .and_then(RequestId::from_value),
            peer: Some(Arc::clone(&self.outbound)),
        }
    }

    fn dispatch_requests(
        &self,
        requests: Vec<strand_mcp_jsonrpc::JsonRpcRequest>,
        session_id: &Option<String>,
        initialized: bool,
    ) -> Vec<(RequestId, RequestOutcome)> {
        requests
            .into_iter()
            .map(|request| {
                let ctx = self.request_context(session_id, Some(&request));
                let id = request.id.clone();
                (id, self.engine.handle_request(request, ctx, initialized))
            })
            .collect()
    }

    /// Initialize always arrives as a single message (batched initialize
    /// was rejected earlier).
    async fn handle_initialize(
        &self,
        parsed: ParsedBody,
        session_header: Option<String>,
        known_session: Option<strand_mcp_session::SessionInfo>,
        effective_version: McpVersion,
    ) -> Response<SseBody> {
        let request = match parsed {
            ParsedBody::Single(JsonRpcMessage::Request(request)) => request,
            _ => {
                return json_error_response(
                    StatusCode::BAD_REQUEST,
                    JsonRpcError::invalid_request(None),
                )
            }
        };

        match &self.config.session_mode {
            SessionMode::Stateful { .. } => {
                if let Some(header) = &session_header {
                    // Re-initialize on a live session is an error; a
                    // stale or terminated one is gone.
                    return match known_session {
                        Some(session) if !session.is_terminated() => json_error_response(
                            StatusCode::BAD_REQUEST,
                            JsonRpcError::new(
                                Some(request.id),
                                McpError::AlreadyInitialized.to_error_object(),
                            ),
                        ),
                        _ => session_not_found(header),
                    };
                }

                let params = request.params.as_ref().map(|p| p.to_value());
                let (version, client_caps, result) = match self.engine.initialize(params) {
                    Ok(parts) => parts,
                    Err(error) => {
                        return json_error_response(
                            StatusCode::BAD_REQUEST,
                            JsonRpcError::new(Some(request.id), error.to_error_object()),
                        )
                    }
                };

                // Only a successful negotiation allocates a session.
                let session = match self.sessions.create_session().await {
                    Ok(session) => session,
                    Err(err) => {
                        warn!(error = %err, "session id generation failed");
                        return text_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Session id generation failed",
                        );
                    }
                };

                if let Err(err) = self
                    .sessions
                    .begin_initialize(
                        &session.session_id,
                        version,
                        client_caps,
                        self.engine.capabilities().clone(),
                    )
                    .await
                {
                    warn!(error = %err, "initialize state transition failed");
                    return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Initialize failed");
                }

                let response = JsonRpcMessage::Response(JsonRpcResponse::new(
                    request.id,
                    serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
                ));
                self.single_message_response(response, Some(&session.session_id), version)
                    .await
            }
            SessionMode::Stateless => {
                let params = request.params.as_ref().map(|p| p.to_value());
                let (version, _client_caps, result) = match self.engine.initialize(params) {
                    Ok(parts) => parts,
                    Err(error) => {
                        return json_error_response(
                            StatusCode::BAD_REQUEST,
                            JsonRpcError::new(Some(request.id), error.to_error_object()),
                        )
                    }
                };
                self.stateless_state
                    .store(STATE_INITIALIZING, Ordering::SeqCst);

                let response = JsonRpcMessage::Response(JsonRpcResponse::new(
                    request.id,
                    serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
                ));
                // Stateless responses never carry a session id header.
                self.single_message_response(response, None, version).await
            }
        }
    }

    /// Deliver a single already-computed message the same way request
    /// responses go out: one-event SSE stream, or a JSON body in JSON mode.
    async fn single_message_response(
        &self,
        message: JsonRpcMessage,
        session_id: Option<&str>,
        version: McpVersion,
    ) -> Response<SseBody> {
        if self.config.enable_json_response {
            let body = serde_json::to_string(&message).unwrap_or_else(|_| "{}".into());
            return self.respond_json(StatusCode::OK, body, session_id, version);
        }

        let stream_session = session_id.unwrap_or(STATELESS_SESSION);
        let ids: Vec<RequestId> = message.id().cloned().into_iter().collect();
        let (stream_id, rx) = self.streams.create_request_stream(stream_session, &ids);
        let payload = serde_json::to_string(&message).unwrap_or_else(|_| "{}".into());
        if let Err(err) = self.streams.write_to_stream(&stream_id, payload).await {
            warn!(error = %err, "failed to write response event");
        }
        self.streams
            .finish_request_stream(stream_session, &ids, &stream_id);

        self.respond_sse(self.streams.request_stream_body(rx), session_id, version)
    }

    /// JSON-response mode: wait for every response, return one body.
    async fn json_mode_response(
        &self,
        outcomes: Vec<(RequestId, RequestOutcome)>,
        was_batch: bool,
        session_id: Option<&str>,
        version: McpVersion,
    ) -> Response<SseBody> {
        let mut messages = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                RequestOutcome::Immediate(message) => messages.push(message),
                RequestOutcome::Pending(rx) => {
                    // A cancelled handler produces no response at all.
                    if let Ok(message) = rx.await {
                        messages.push(message);
                    }
                }
            }
        }

        if messages.is_empty() {
            return self.accepted(session_id, version);
        }
        let body = if was_batch {
            serde_json::to_string(&messages).unwrap_or_else(|_| "[]".into())
        } else {
            serde_json::to_string(&messages[0]).unwrap_or_else(|_| "{}".into())
        };
        self.respond_json(StatusCode::OK, body, session_id, version)
    }

    /// SSE mode: open a per-request stream, then dispatch, then emit
    /// responses as each arrives; the stream closes once all responses
    /// for the batch are out.
    fn sse_mode_response(
        &self,
        requests: Vec<strand_mcp_jsonrpc::JsonRpcRequest>,
        session_id: &Option<String>,
        initialized: bool,
        version: McpVersion,
    ) -> Response<SseBody> {
        let stream_session = session_id
            .clone()
            .unwrap_or_else(|| STATELESS_SESSION.to_string());
        let ids: Vec<RequestId> = requests.iter().map(|r| r.id.clone()).collect();
        let (stream_id, rx) = self.streams.create_request_stream(&stream_session, &ids);

        let outcomes = self.dispatch_requests(requests, session_id, initialized);
        let streams = Arc::clone(&self.streams);
        tokio::spawn(async move {
            let mut pending: FuturesUnordered<_> = outcomes
                .into_iter()
                .map(|(_, outcome)| async move {
                    match outcome {
                        RequestOutcome::Immediate(message) => Some(message),
                        RequestOutcome::Pending(rx) => rx.await.ok(),
                    }
                })
                .collect();

            while let Some(completed) = pending.next().await {
                // Cancelled handlers yield None: their response is
                // suppressed entirely.
                if let Some(message) = completed {
                    let payload = serde_json::to_string(&message).unwrap_or_else(|_| "{}".into());
                    if let Err(err) = streams.write_to_stream(&stream_id, payload).await {
                        warn!(error = %err, "failed to stream response");
                    }
                }
            }
            streams.finish_request_stream(&stream_session, &ids, &stream_id);
        });

        self.respond_sse(
            self.streams.request_stream_body(rx),
            session_id.as_deref(),
            version,
        )
    }

    async fn handle_get<B>(
        &self,
        req: Request<B>,
        session_header: Option<String>,
        known_session: Option<strand_mcp_session::SessionInfo>,
        effective_version: McpVersion,
    ) -> Response<SseBody>
    where
        B: Body + Send,
    {
        let accept = header_string(&req, header::ACCEPT.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !(accept.contains("text/event-stream") || accept.contains("*/*")) {
            return text_response(
                StatusCode::NOT_ACCEPTABLE,
                "Accept header must include text/event-stream",
            );
        }

        let (stream_session, initialized) = match &self.config.session_mode {
            SessionMode::Stateful { .. } => {
                let session_id = match session_header {
                    Some(id) => id,
                    None => {
                        return text_response(
                            StatusCode::BAD_REQUEST,
                            "Mcp-Session-Id header required",
                        )
                    }
                };
                let session = match known_session {
                    Some(session) if !session.is_terminated() => session,
                    _ => return session_not_found(&session_id),
                };
                let ready = session.state != SessionState::Uninitialized;
                (session_id, ready)
            }
            SessionMode::Stateless => (
                STATELESS_SESSION.to_string(),
                self.stateless_state.load(Ordering::SeqCst) != STATE_UNINITIALIZED,
            ),
        };

        if !initialized {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::new(None, McpError::NotInitialized.to_error_object()),
            );
        }

        let last_event_id = header_string(&req, HEADER_LAST_EVENT_ID)
            .and_then(|raw| raw.parse::<u64>().ok());

        match self
            .streams
            .open_get_stream(&stream_session, effective_version, last_event_id)
            .await
        {
            Ok(body) => {
                let session_for_header = match self.config.session_mode {
                    SessionMode::Stateful { .. } => Some(stream_session.as_str()),
                    SessionMode::Stateless => None,
                };
                self.respond_sse(body, session_for_header, effective_version)
            }
            Err(StreamError::GetStreamOpen(_)) => text_response(
                StatusCode::CONFLICT,
                "A server-to-client stream is already open for this session",
            ),
            Err(err) => {
                warn!(error = %err, "failed to open GET stream");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Stream setup failed")
            }
        }
    }

    async fn handle_delete(
        &self,
        session_header: Option<String>,
        known_session: Option<strand_mcp_session::SessionInfo>,
    ) -> Response<SseBody> {
        if !self.config.session_mode.is_stateful() {
            return method_not_allowed("GET, POST", "Session management is not enabled");
        }

        let session_id = match session_header {
            Some(id) => id,
            None => return session_not_found("(missing)"),
        };
        match known_session {
            Some(session) if !session.is_terminated() => {
                // terminate first so `on_session_closed` observes a live
                // session exactly once
                self.sessions.terminate_session(&session_id).await;
                let closed_streams = self.streams.close_session(&session_id).await;
                debug!(session_id = %session_id, closed_streams, "session deleted");
                Response::builder()
                    .status(StatusCode::OK)
                    .header(HEADER_SESSION_ID, &session_id)
                    .body(full_body(""))
                    .expect("static response")
            }
            _ => session_not_found(&session_id),
        }
    }

    async fn dispatch_notification(&self, notification: JsonRpcNotification, ctx: RequestContext) {
        if notification.method == methods::NOTIFICATION_INITIALIZED {
            match &self.config.session_mode {
                SessionMode::Stateful { .. } => {
                    if let Some(session_id) = &ctx.session_id {
                        if let Err(err) = self.sessions.confirm_initialized(session_id).await {
                            warn!(error = %err, "initialized notification rejected");
                        }
                    }
                }
                SessionMode::Stateless => {
                    self.stateless_state
                        .store(STATE_INITIALIZED, Ordering::SeqCst);
                }
            }
            return;
        }
        self.engine.handle_notification(notification, ctx);
    }

    fn accepted(&self, session_id: Option<&str>, version: McpVersion) -> Response<SseBody> {
        let mut builder = Response::builder().status(StatusCode::ACCEPTED);
        builder = self.standard_headers(builder, session_id, version);
        builder.body(full_body("")).expect("static response")
    }

    fn respond_json(
        &self,
        status: StatusCode,
        body: String,
        session_id: Option<&str>,
        version: McpVersion,
    ) -> Response<SseBody> {
        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json");
        builder = self.standard_headers(builder, session_id, version);
        builder.body(full_body(body)).expect("static response")
    }

    fn respond_sse(
        &self,
        body: SseBody,
        session_id: Option<&str>,
        version: McpVersion,
    ) -> Response<SseBody> {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache, no-transform");
        builder = self.standard_headers(builder, session_id, version);
        builder.body(body).expect("static response")
    }

    fn standard_headers(
        &self,
        mut builder: http::response::Builder,
        session_id: Option<&str>,
        version: McpVersion,
    ) -> http::response::Builder {
        builder = builder.header(HEADER_PROTOCOL_VERSION, version.as_str());
        if self.config.session_mode.is_stateful() {
            if let Some(session_id) = session_id {
                builder = builder.header(HEADER_SESSION_ID, session_id);
            }
        }
        builder
    }
}

/// Delivery adapter letting the engine's outbound helpers ride the stream
/// registry. A session with neither a live stream nor an event store
/// silently drops the message (logged in the manager).
struct StreamSink {
    streams: Arc<StreamManager>,
}

#[async_trait::async_trait]
impl OutboundSink for StreamSink {
    async fn deliver(
        &self,
        session_id: &str,
        message: JsonRpcMessage,
        related_request_id: Option<RequestId>,
    ) -> Result<(), McpError> {
        let payload = serde_json::to_string(&message)
            .map_err(|err| McpError::internal(err.to_string()))?;
        match self
            .streams
            .deliver(session_id, payload, related_request_id.as_ref())
            .await
        {
            Ok(()) | Err(StreamError::NoChannel(_)) => Ok(()),
            Err(err) => Err(McpError::transport(err.to_string())),
        }
    }
}

fn header_string<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn read_body<B>(req: Request<B>, limit: usize) -> Result<Bytes, Response<SseBody>>
where
    B: Body + Send,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => {
            if err.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                Err(text_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large",
                ))
            } else {
                Err(json_error_response(
                    StatusCode::BAD_REQUEST,
                    JsonRpcError::parse_error(),
                ))
            }
        }
    }
}

fn full_body(body: impl Into<Bytes>) -> SseBody {
    BodyExt::boxed_unsync(Full::new(body.into()))
}

fn json_error_response(status: StatusCode, error: JsonRpcError) -> Response<SseBody> {
    let body = serde_json::to_string(&error).unwrap_or_else(|_| "{}".into());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("static response")
}

fn text_response(status: StatusCode, message: &str) -> Response<SseBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(full_body(message.to_string()))
        .expect("static response")
}

fn method_not_allowed(allow: &str, message: &str) -> Response<SseBody> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(header::ALLOW, allow)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(full_body(message.to_string()))
        .expect("static response")
}

fn session_not_found(session_id: &str) -> Response<SseBody> {
    debug!(session_id = %session_id, "rejecting request for unknown or terminated session");
    json_error_response(
        StatusCode::NOT_FOUND,
        JsonRpcError::new(
            None,
            JsonRpcErrorObject::new(
                strand_mcp_jsonrpc::JsonRpcErrorCode::InvalidRequest,
                Some("Session not found or terminated".into()),
                None,
            ),
        ),
    )
}
