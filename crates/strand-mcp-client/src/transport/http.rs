//! Streamable HTTP client transport.
//!
//! Every client message goes out as a POST to the single endpoint; the
//! server answers with a JSON body, an SSE stream, or a bare 202. SSE
//! streams are consumed on background tasks that track the last received
//! event id and reconnect with exponential backoff and `Last-Event-ID`
//! until the response to the originating request has been observed.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use strand_mcp_jsonrpc::{message::parse_body, JsonRpcMessage, RequestId};
use strand_mcp_protocol::{methods, McpError, McpVersion};
use strand_mcp_transport::sse::SseParser;

use crate::client::ClientSender;
use crate::config::ReconnectOptions;
use crate::error::{classify_status, ClientError, ClientResult};

/// Hook adjusting outbound HTTP requests (e.g. `Authorization` headers).
/// The transport itself stays agnostic of what it injects.
pub type RequestModifier =
    Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

/// Counters kept for monitoring; guarded by a short-lived lock
#[derive(Debug, Clone, Default)]
pub struct TransportStatistics {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub notifications_sent: u64,
    pub events_received: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

/// Client side of the Streamable HTTP transport
pub struct StreamableHttpClient {
    client: Client,
    endpoint: Url,
    session_id: Arc<Mutex<Option<String>>>,
    protocol_version: Arc<Mutex<Option<McpVersion>>>,
    reconnect: ReconnectOptions,
    request_modifier: Option<RequestModifier>,
    incoming_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcMessage>>>,
    stats: Arc<Mutex<TransportStatistics>>,
    sse_tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl StreamableHttpClient {
    pub fn new(endpoint: &str) -> ClientResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|err| ClientError::InvalidEndpoint(err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidEndpoint(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        // No global request timeout: SSE streams are long-lived.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("strand-mcp-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client,
            endpoint: url,
            session_id: Arc::new(Mutex::new(None)),
            protocol_version: Arc::new(Mutex::new(None)),
            reconnect: ReconnectOptions::default(),
            request_modifier: None,
            incoming_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            stats: Arc::new(Mutex::new(TransportStatistics::default())),
            sse_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn with_reconnect_options(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = options;
        self
    }

    pub fn with_request_modifier(mut self, modifier: RequestModifier) -> Self {
        self.request_modifier = Some(modifier);
        self
    }

    /// Take the stream of messages the server pushes toward the engine.
    /// Single-consumer.
    pub fn incoming(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcMessage>> {
        self.incoming_rx.lock().take()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Pin the version negotiated during initialize; attached as
    /// `MCP-Protocol-Version` to every subsequent request
    pub fn set_protocol_version(&self, version: McpVersion) {
        *self.protocol_version.lock() = Some(version);
    }

    pub fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }

    fn shared(&self, origin: Option<RequestId>, remap: Option<RequestId>) -> SseShared {
        SseShared {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            session_id: Arc::clone(&self.session_id),
            protocol_version: Arc::clone(&self.protocol_version),
            incoming: self.incoming_tx.clone(),
            reconnect: self.reconnect.clone(),
            request_modifier: self.request_modifier.clone(),
            stats: Arc::clone(&self.stats),
            origin_request_id: origin,
            remap_to: remap,
        }
    }

    fn apply_modifier(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.request_modifier {
            Some(modifier) => modifier(builder),
            None => builder,
        }
    }

    fn common_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(session_id) = self.session_id.lock().as_deref() {
            builder = builder.header("Mcp-Session-Id", session_id);
        }
        if let Some(version) = *self.protocol_version.lock() {
            builder = builder.header("MCP-Protocol-Version", version.as_str());
        }
        self.apply_modifier(builder)
    }

    fn record_error(&self, error: &McpError) {
        let mut stats = self.stats.lock();
        stats.errors += 1;
        stats.last_error = Some(error.to_string());
    }

    /// POST one message and route whatever comes back
    pub async fn post_message(&self, message: &JsonRpcMessage) -> ClientResult<()> {
        let is_initialize = message.method() == Some(methods::INITIALIZE);
        let origin_request_id = match message {
            JsonRpcMessage::Request(request) => Some(request.id.clone()),
            _ => None,
        };

        {
            let mut stats = self.stats.lock();
            if origin_request_id.is_some() {
                stats.requests_sent += 1;
            } else {
                stats.notifications_sent += 1;
            }
        }

        let builder = self
            .client
            .post(self.endpoint.clone())
            .header("Accept", "application/json, text/event-stream")
            .header("Content-Type", "application/json")
            .json(message);
        let response = self.common_headers(builder).send().await?;

        let status = response.status().as_u16();
        let had_session = self.session_id.lock().is_some();

        // Session id may arrive on any response, first of all initialize.
        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|value| value.to_str().ok())
        {
            debug!(session_id = %session, "captured session id");
            *self.session_id.lock() = Some(session.to_string());
        }

        if let Some(error) = classify_status(status, had_session, is_initialize) {
            if matches!(error, McpError::SessionExpired) {
                info!("session expired; clearing session id");
                *self.session_id.lock() = None;
            }
            self.record_error(&error);
            return Err(error.into());
        }

        if status == 202 {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let body = response.text().await?;
            let parsed = parse_body(&body)
                .map_err(|err| McpError::InvalidRequest(err.error.message.clone()))?;
            for message in parsed.messages() {
                if message.is_reply() {
                    self.stats.lock().responses_received += 1;
                }
                let _ = self.incoming_tx.send(message.clone());
            }
            Ok(())
        } else if content_type.starts_with("text/event-stream") {
            let shared = self.shared(origin_request_id, None);
            let handle = tokio::spawn(run_sse(shared, Some(response), None));
            self.sse_tasks.lock().push(handle);
            Ok(())
        } else if origin_request_id.is_some() {
            let error = McpError::UnexpectedContentType(content_type);
            self.record_error(&error);
            Err(error.into())
        } else {
            // 2xx with an odd content type is fine for notifications
            Ok(())
        }
    }

    /// Open the long-lived server→client GET stream. Reconnects within
    /// the retry limit; there is no originating request, so only
    /// exhaustion or session expiry stops it.
    pub async fn open_listening_stream(&self) -> ClientResult<()> {
        let shared = self.shared(None, None);
        let response = get_sse(&shared, None).await?;
        let handle = tokio::spawn(run_sse(shared, Some(response), None));
        self.sse_tasks.lock().push(handle);
        Ok(())
    }

    /// Resume a broken stream from a cursor. Every *response* received on
    /// the resumed stream is rewritten to `original_request_id` before
    /// delivery; notifications and server-initiated requests pass through
    /// unchanged.
    pub async fn resume_stream(
        &self,
        last_event_id: impl Into<String>,
        original_request_id: Option<RequestId>,
    ) -> ClientResult<()> {
        let shared = self.shared(original_request_id.clone(), original_request_id);
        let handle = tokio::spawn(run_sse(shared, None, Some(last_event_id.into())));
        self.sse_tasks.lock().push(handle);
        Ok(())
    }

    /// DELETE the session. 2xx and 404 clear the held id; 405 means the
    /// server does not support termination and the id is kept.
    pub async fn terminate_session(&self) -> ClientResult<()> {
        let session_id = match self.session_id.lock().clone() {
            Some(id) => id,
            None => return Ok(()),
        };

        let builder = self
            .client
            .delete(self.endpoint.clone())
            .header("Mcp-Session-Id", &session_id);
        let builder = match *self.protocol_version.lock() {
            Some(version) => builder.header("MCP-Protocol-Version", version.as_str()),
            None => builder,
        };
        let response = self.apply_modifier(builder).send().await?;

        match response.status().as_u16() {
            200 | 204 | 404 => {
                *self.session_id.lock() = None;
                info!(session_id = %session_id, "session terminated");
                Ok(())
            }
            405 => {
                debug!("server does not support session termination");
                Ok(())
            }
            status => {
                let error = classify_status(status, true, false)
                    .unwrap_or(McpError::ServerError { status });
                self.record_error(&error);
                Err(error.into())
            }
        }
    }

    /// Abort background SSE tasks and end the incoming stream
    pub fn close(&self) {
        for handle in self.sse_tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for StreamableHttpClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait::async_trait]
impl ClientSender for StreamableHttpClient {
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), McpError> {
        self.post_message(message).await.map_err(|err| match err {
            ClientError::Mcp(mcp) => mcp,
            other => McpError::transport(other.to_string()),
        })
    }
}

/// Everything an SSE consumption task needs, detached from the transport
struct SseShared {
    client: Client,
    endpoint: Url,
    session_id: Arc<Mutex<Option<String>>>,
    protocol_version: Arc<Mutex<Option<McpVersion>>>,
    incoming: mpsc::UnboundedSender<JsonRpcMessage>,
    reconnect: ReconnectOptions,
    request_modifier: Option<RequestModifier>,
    stats: Arc<Mutex<TransportStatistics>>,
    /// Once a reply matching this id is delivered, the stream is done and
    /// no reconnection is attempted
    origin_request_id: Option<RequestId>,
    /// Replies on a resumed stream are rewritten to this id
    remap_to: Option<RequestId>,
}

/// Rewrite a reply's id; non-replies pass through untouched
fn remap_reply_id(message: JsonRpcMessage, target: Option<&RequestId>) -> JsonRpcMessage {
    let Some(target) = target else {
        return message;
    };
    match message {
        JsonRpcMessage::Response(mut response) => {
            response.id = target.clone();
            JsonRpcMessage::Response(response)
        }
        JsonRpcMessage::Error(mut error) => {
            if error.id.is_some() {
                error.id = Some(target.clone());
            }
            JsonRpcMessage::Error(error)
        }
        other => other,
    }
}

fn is_origin_reply(message: &JsonRpcMessage, origin: Option<&RequestId>) -> bool {
    match origin {
        Some(origin) => message.is_reply() && message.id() == Some(origin),
        None => false,
    }
}

async fn get_sse(shared: &SseShared, last_event_id: Option<String>) -> ClientResult<Response> {
    let mut builder = shared
        .client
        .get(shared.endpoint.clone())
        .header("Accept", "text/event-stream");
    if let Some(session_id) = shared.session_id.lock().as_deref() {
        builder = builder.header("Mcp-Session-Id", session_id);
    }
    if let Some(version) = *shared.protocol_version.lock() {
        builder = builder.header("MCP-Protocol-Version", version.as_str());
    }
    if let Some(cursor) = last_event_id {
        builder = builder.header("Last-Event-ID", cursor);
    }
    if let Some(modifier) = &shared.request_modifier {
        builder = modifier(builder);
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let had_session = shared.session_id.lock().is_some();
    if let Some(error) = classify_status(status, had_session, false) {
        if matches!(error, McpError::SessionExpired) {
            *shared.session_id.lock() = None;
        }
        return Err(error.into());
    }
    Ok(response)
}

/// Consume an SSE stream, reconnecting on unexpected closure.
///
/// `initial` is the already-open response of a POST (or first GET);
/// `resume_from` seeds the cursor when resuming a broken stream.
async fn run_sse(shared: SseShared, initial: Option<Response>, resume_from: Option<String>) {
    let mut last_event_id = resume_from;
    let mut retry_override: Option<Duration> = None;
    let mut pending_response = initial;
    let mut attempt: u32 = 0;

    loop {
        let response = match pending_response.take() {
            Some(response) => response,
            None => {
                if attempt >= shared.reconnect.max_retries {
                    debug!("reconnection attempts exhausted");
                    return;
                }
                let delay = shared.reconnect.delay_for(attempt, retry_override);
                attempt += 1;
                tokio::time::sleep(delay).await;
                match get_sse(&shared, last_event_id.clone()).await {
                    Ok(response) => response,
                    Err(ClientError::Mcp(McpError::SessionExpired)) => {
                        warn!("session expired during reconnection");
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, attempt, "reconnection failed");
                        continue;
                    }
                }
            }
        };

        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();
        let mut received_any = false;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "SSE stream read failed");
                    break;
                }
            };

            for event in parser.push(&bytes) {
                if let Some(retry) = event.retry {
                    retry_override = Some(Duration::from_millis(retry));
                }
                if let Some(id) = &event.id {
                    last_event_id = Some(id.clone());
                }
                received_any = true;
                shared.stats.lock().events_received += 1;

                // Priming events carry only the cursor.
                let Some(data) = event.data.filter(|d| !d.is_empty()) else {
                    continue;
                };

                let value: serde_json::Value = match serde_json::from_str(&data) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(error = %err, "dropping unparseable SSE data");
                        continue;
                    }
                };
                let message = match JsonRpcMessage::from_value(value) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(error = %err, "dropping invalid JSON-RPC event");
                        continue;
                    }
                };

                let message = remap_reply_id(message, shared.remap_to.as_ref());
                let finished = is_origin_reply(&message, shared.origin_request_id.as_ref());
                if message.is_reply() {
                    shared.stats.lock().responses_received += 1;
                }
                if shared.incoming.send(message).is_err() {
                    debug!("incoming consumer gone, stopping SSE task");
                    return;
                }
                if finished {
                    return;
                }
            }
        }

        // stream closed without the originating response: reconnect
        if received_any {
            attempt = 0;
        }
        debug!(last_event_id = ?last_event_id, "SSE stream closed, scheduling reconnect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strand_mcp_jsonrpc::{JsonRpcError, JsonRpcErrorObject, JsonRpcResponse};

    #[test]
    fn test_remap_rewrites_response_ids() {
        let message = JsonRpcMessage::Response(JsonRpcResponse::new(
            RequestId::String("srv".into()),
            json!({"ok": true}),
        ));
        let remapped = remap_reply_id(message, Some(&RequestId::String("orig".into())));
        assert_eq!(remapped.id(), Some(&RequestId::String("orig".into())));
    }

    #[test]
    fn test_remap_rewrites_error_ids() {
        let message = JsonRpcMessage::Error(JsonRpcError::new(
            Some(RequestId::String("srv".into())),
            JsonRpcErrorObject::internal_error(None),
        ));
        let remapped = remap_reply_id(message, Some(&RequestId::String("orig".into())));
        assert_eq!(remapped.id(), Some(&RequestId::String("orig".into())));
    }

    #[test]
    fn test_remap_leaves_server_requests_alone() {
        let message = JsonRpcMessage::from_value(json!({
            "jsonrpc": "2.0",
            "id": "srv-req-1",
            "method": "sampling/createMessage",
            "params": {}
        }))
        .unwrap();
        let remapped = remap_reply_id(message, Some(&RequestId::String("orig".into())));
        assert_eq!(remapped.id(), Some(&RequestId::String("srv-req-1".into())));
        assert_eq!(remapped.method(), Some("sampling/createMessage"));
    }

    #[test]
    fn test_remap_without_target_is_identity() {
        let message = JsonRpcMessage::Response(JsonRpcResponse::new(
            RequestId::Number(3),
            json!({}),
        ));
        let remapped = remap_reply_id(message, None);
        assert_eq!(remapped.id(), Some(&RequestId::Number(3)));
    }

    #[test]
    fn test_origin_reply_detection() {
        let origin = RequestId::Number(7);
        let reply = JsonRpcMessage::Response(JsonRpcResponse::new(origin.clone(), json!({})));
        assert!(is_origin_reply(&reply, Some(&origin)));

        let other = JsonRpcMessage::Response(JsonRpcResponse::new(RequestId::Number(8), json!({})));
        assert!(!is_origin_reply(&other, Some(&origin)));

        // notifications never stop reconnection
        let notification = JsonRpcMessage::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/progress", "params": {}
        }))
        .unwrap();
        assert!(!is_origin_reply(&notification, Some(&origin)));

        // server-initiated requests do not stop it either
        let request = JsonRpcMessage::from_value(json!({
            "jsonrpc": "2.0", "id": 7, "method": "sampling/createMessage"
        }))
        .unwrap();
        assert!(!is_origin_reply(&request, Some(&origin)));
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(StreamableHttpClient::new("http://localhost:8080/mcp").is_ok());
        assert!(StreamableHttpClient::new("ftp://localhost/mcp").is_err());
        assert!(StreamableHttpClient::new("not a url").is_err());
    }
}
