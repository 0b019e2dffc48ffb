//! Concurrent request dispatch.
//!
//! Each request runs on its own task so concurrent calls make progress
//! independently and the receive loop never waits on a handler. The
//! in-flight table maps (session, request id) to the task's abort handle;
//! `notifications/cancelled` aborts the task, which drops the response
//! channel and thereby suppresses the response. A cancellation arriving
//! after the response was produced is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{AbortHandle, Abortable};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use strand_mcp_jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId};

use crate::handler::{HandlerRegistry, RequestContext};

type InFlightKey = (Option<String>, RequestId);

/// Dispatches requests onto tasks and tracks them for cancellation
pub struct RequestRouter {
    registry: Arc<HandlerRegistry>,
    in_flight: Arc<Mutex<HashMap<InFlightKey, AbortHandle>>>,
}

impl RequestRouter {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a task for the request. The returned receiver resolves with
    /// the response message, or errors if the task was cancelled — the
    /// caller treats that as "no response".
    pub fn dispatch(
        &self,
        request: JsonRpcRequest,
        ctx: RequestContext,
    ) -> oneshot::Receiver<JsonRpcMessage> {
        let (tx, rx) = oneshot::channel();

        let handler = match self.registry.lookup(&request.method) {
            Some(handler) => handler,
            None => {
                let _ = tx.send(JsonRpcMessage::Error(JsonRpcError::method_not_found(
                    request.id,
                    &request.method,
                )));
                return rx;
            }
        };

        let key: InFlightKey = (ctx.session_id.clone(), request.id.clone());
        let in_flight = Arc::clone(&self.in_flight);
        let method = request.method.clone();
        let id = request.id.clone();
        let params = request.params.map(|p| p.to_value());

        // Register before spawning so a cancellation racing the dispatch
        // always finds the entry.
        let (abort_handle, registration) = AbortHandle::new_pair();
        self.in_flight
            .lock()
            .expect("in-flight table poisoned")
            .insert(key.clone(), abort_handle);

        let work = Abortable::new(
            async move {
                let result = handler.handle(&method, params, ctx).await;
                in_flight
                    .lock()
                    .expect("in-flight table poisoned")
                    .remove(&key);

                let message = match result {
                    Ok(value) => JsonRpcMessage::Response(JsonRpcResponse::new(id, value)),
                    Err(error) => {
                        debug!(method = %method, error = %error, "handler returned error");
                        JsonRpcMessage::Error(JsonRpcError::new(
                            Some(id),
                            error.to_error_object(),
                        ))
                    }
                };
                // Receiver may have gone away (stream closed); nothing to do.
                let _ = tx.send(message);
            },
            registration,
        );
        tokio::spawn(async move {
            // An aborted dispatch drops `tx`, which is exactly the
            // "response suppressed" signal the caller observes.
            let _ = work.await;
        });

        rx
    }

    /// Cancel an in-flight request if its handler is still running.
    /// Returns whether a task was actually aborted.
    pub fn cancel(&self, session_id: Option<&str>, request_id: &RequestId) -> bool {
        let key: InFlightKey = (session_id.map(str::to_string), request_id.clone());
        let handle = self
            .in_flight
            .lock()
            .expect("in-flight table poisoned")
            .remove(&key);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(request_id = %request_id, "cancelled in-flight request");
                true
            }
            None => {
                warn!(request_id = %request_id, "cancellation for unknown or completed request");
                false
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight table poisoned").len()
    }
}
