//! Drive the engine over a byte transport (stdio, in-memory).
//!
//! Byte transports carry exactly one unnamed session, so the handshake
//! state lives in a flag rather than a session registry. The receive loop
//! never awaits a handler: requests are answered on their own tasks and
//! written back through the shared transport handle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use strand_mcp_jsonrpc::{message::parse_body, JsonRpcError, JsonRpcMessage, ParsedBody, RequestId};
use strand_mcp_protocol::{methods, McpError};
use strand_mcp_transport::{SendOptions, Transport};

use crate::engine::{McpServerEngine, RequestOutcome};
use crate::handler::RequestContext;
use crate::outbound::{OutboundSink, ServerToClient};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_INITIALIZED: u8 = 2;

/// Outbound channel for byte transports: one unnamed session, every
/// message down the same pipe
struct ByteSink<T> {
    transport: Arc<T>,
}

#[async_trait]
impl<T> OutboundSink for ByteSink<T>
where
    T: Transport + 'static,
{
    async fn deliver(
        &self,
        _session_id: &str,
        message: JsonRpcMessage,
        _related_request_id: Option<RequestId>,
    ) -> Result<(), McpError> {
        let payload = serde_json::to_vec(&message)
            .map_err(|err| McpError::internal(err.to_string()))?;
        self.transport
            .send(Bytes::from(payload), SendOptions::default())
            .await
            .map_err(|err| McpError::transport(err.to_string()))
    }
}

async fn send_message<T: Transport>(transport: &T, message: &JsonRpcMessage) {
    let payload = match serde_json::to_vec(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize outgoing message");
            return;
        }
    };
    if let Err(err) = transport
        .send(Bytes::from(payload), SendOptions::default())
        .await
    {
        debug!(error = %err, "failed to write message");
    }
}

/// Serve one connection until the transport's receive stream ends.
pub async fn serve_transport<T>(
    engine: Arc<McpServerEngine>,
    mut transport: T,
) -> Result<(), McpError>
where
    T: Transport + 'static,
{
    transport
        .connect()
        .await
        .map_err(|err| McpError::transport(err.to_string()))?;
    let mut incoming = transport
        .receive()
        .map_err(|err| McpError::transport(err.to_string()))?;
    let transport = Arc::new(transport);
    let state = Arc::new(AtomicU8::new(STATE_UNINITIALIZED));
    let outbound = Arc::new(ServerToClient::new(
        Arc::clone(&engine),
        Arc::new(ByteSink {
            transport: Arc::clone(&transport),
        }),
    ));

    info!("serving MCP over byte transport");

    while let Some(frame) = incoming.next().await {
        let text = match std::str::from_utf8(&frame.payload) {
            Ok(text) => text,
            Err(_) => {
                send_message(&*transport, &JsonRpcMessage::Error(JsonRpcError::parse_error()))
                    .await;
                continue;
            }
        };
        let parsed = match parse_body(text) {
            Ok(parsed) => parsed,
            Err(error) => {
                send_message(&*transport, &JsonRpcMessage::Error(error)).await;
                continue;
            }
        };

        if matches!(parsed, ParsedBody::Batch(_)) && parsed.contains_method(methods::INITIALIZE) {
            send_message(
                &*transport,
                &JsonRpcMessage::Error(JsonRpcError::invalid_request(None)),
            )
            .await;
            continue;
        }

        for message in parsed.messages() {
            let progress_token = match message {
                JsonRpcMessage::Request(request) => request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("_meta"))
                    .and_then(|meta| meta.get("progressToken"))
                    .and_then(RequestId::from_value),
                _ => None,
            };
            let ctx = RequestContext {
                session_id: frame.context.session_id.clone(),
                request_id: message.id().cloned(),
                progress_token,
                peer: Some(Arc::clone(&outbound)),
            };
            match message {
                JsonRpcMessage::Request(request) if request.method == methods::INITIALIZE => {
                    let reply = if state.load(Ordering::SeqCst) != STATE_UNINITIALIZED {
                        JsonRpcMessage::Error(JsonRpcError::new(
                            Some(request.id.clone()),
                            McpError::AlreadyInitialized.to_error_object(),
                        ))
                    } else {
                        let params = request.params.as_ref().map(|p| p.to_value());
                        match engine.initialize(params) {
                            Ok((_version, _caps, result)) => {
                                state.store(STATE_INITIALIZING, Ordering::SeqCst);
                                JsonRpcMessage::Response(
                                    strand_mcp_jsonrpc::JsonRpcResponse::new(
                                        request.id.clone(),
                                        serde_json::to_value(&result)
                                            .unwrap_or(serde_json::Value::Null),
                                    ),
                                )
                            }
                            Err(error) => JsonRpcMessage::Error(JsonRpcError::new(
                                Some(request.id.clone()),
                                error.to_error_object(),
                            )),
                        }
                    };
                    send_message(&*transport, &reply).await;
                }
                JsonRpcMessage::Request(request) => {
                    let initialized = state.load(Ordering::SeqCst) != STATE_UNINITIALIZED;
                    let outcome = engine.handle_request(request.clone(), ctx, initialized);
                    let transport = Arc::clone(&transport);
                    tokio::spawn(async move {
                        match outcome {
                            RequestOutcome::Immediate(reply) => {
                                send_message(&*transport, &reply).await
                            }
                            RequestOutcome::Pending(rx) => {
                                // A cancelled dispatch sends nothing.
                                if let Ok(reply) = rx.await {
                                    send_message(&*transport, &reply).await;
                                }
                            }
                        }
                    });
                }
                JsonRpcMessage::Notification(notification) => {
                    if notification.method == methods::NOTIFICATION_INITIALIZED {
                        state.store(STATE_INITIALIZED, Ordering::SeqCst);
                    } else {
                        engine.handle_notification(notification.clone(), ctx);
                    }
                }
                reply => {
                    engine.handle_reply(reply.clone());
                }
            }
        }
    }

    // Peer went away: fail anything the server had in flight toward it.
    engine.pending().fail_all(|id| {
        JsonRpcMessage::Error(JsonRpcError::new(
            Some(id.clone()),
            McpError::ConnectionClosed.to_error_object(),
        ))
    });
    info!("byte transport closed");
    Ok(())
}
