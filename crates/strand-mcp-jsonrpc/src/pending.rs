//! Pending-request correlation table.
//!
//! Both protocol-engine roles own one of these per instance. An entry's
//! lifetime begins at `register` and ends on exactly one of: response
//! arrival, timeout, cancellation, or transport close — callers that time
//! out or cancel must `remove` the entry themselves.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::channel::oneshot;
use serde_json::Value;
use thiserror::Error;

use crate::message::JsonRpcMessage;
use crate::types::RequestId;

/// Callback invoked with `notifications/progress` params routed to the
/// request that registered it.
pub type ProgressSink = Box<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Error)]
pub enum PendingError {
    /// An in-flight request already uses this id within the session
    #[error("request id already in flight: {0}")]
    DuplicateId(RequestId),
}

struct Pending {
    completion: oneshot::Sender<JsonRpcMessage>,
    progress: Option<ProgressSink>,
}

/// Table of in-flight outgoing requests keyed by id.
///
/// The lock is never held across an await point; progress callbacks run
/// under it and must not block.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<RequestId, Pending>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight request. Returns the receiver that resolves
    /// with the correlated response or error message.
    pub fn register(
        &self,
        id: RequestId,
        progress: Option<ProgressSink>,
    ) -> Result<oneshot::Receiver<JsonRpcMessage>, PendingError> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().expect("pending table poisoned");
        if inner.contains_key(&id) {
            return Err(PendingError::DuplicateId(id));
        }
        inner.insert(
            id,
            Pending {
                completion: tx,
                progress,
            },
        );
        Ok(rx)
    }

    /// Complete the entry matching the reply's id. Returns false when no
    /// entry matches (the caller should drop and log the message).
    pub fn complete(&self, message: JsonRpcMessage) -> bool {
        let id = match message.id() {
            Some(id) => id.clone(),
            None => return false,
        };
        let entry = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            inner.remove(&id)
        };
        match entry {
            Some(pending) => pending.completion.send(message).is_ok(),
            None => false,
        }
    }

    /// Route progress params to the request identified by the token.
    /// Unknown tokens are dropped; returns whether a sink was found.
    pub fn progress(&self, token: &RequestId, params: Value) -> bool {
        let inner = self.inner.lock().expect("pending table poisoned");
        match inner.get(token).and_then(|p| p.progress.as_ref()) {
            Some(sink) => {
                sink(params);
                true
            }
            None => false,
        }
    }

    /// Drop an entry without completing it (timeout / cancellation paths).
    /// Returns whether the request was still in flight.
    pub fn remove(&self, id: &RequestId) -> bool {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        inner.remove(id).is_some()
    }

    /// Fail every in-flight request with the message produced per id.
    /// Used when the transport closes underneath the engine.
    pub fn fail_all(&self, mut make_reply: impl FnMut(&RequestId) -> JsonRpcMessage) {
        let drained: Vec<(RequestId, Pending)> = {
            let mut inner = self.inner.lock().expect("pending table poisoned");
            inner.drain().collect()
        };
        for (id, pending) in drained {
            let _ = pending.completion.send(make_reply(&id));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::JsonRpcResponse;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn response(id: RequestId) -> JsonRpcMessage {
        JsonRpcMessage::Response(JsonRpcResponse::new(id, json!({})))
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let pending = PendingRequests::new();
        let rx = pending.register(RequestId::Number(1), None).unwrap();

        assert!(pending.complete(response(RequestId::Number(1))));
        let msg = rx.await.unwrap();
        assert_eq!(msg.id(), Some(&RequestId::Number(1)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let pending = PendingRequests::new();
        let _rx = pending.register(RequestId::Number(1), None).unwrap();
        assert!(matches!(
            pending.register(RequestId::Number(1), None),
            Err(PendingError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_unmatched_response_dropped() {
        let pending = PendingRequests::new();
        assert!(!pending.complete(response(RequestId::String("ghost".into()))));
    }

    #[test]
    fn test_progress_routing() {
        let pending = PendingRequests::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        let _rx = pending
            .register(
                RequestId::Number(7),
                Some(Box::new(move |_| {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        assert!(pending.progress(&RequestId::Number(7), json!({"progress": 1})));
        assert!(!pending.progress(&RequestId::Number(8), json!({"progress": 1})));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(RequestId::Number(1), None).unwrap();
        let rx2 = pending.register(RequestId::Number(2), None).unwrap();

        pending.fail_all(|id| {
            JsonRpcMessage::Error(crate::error::JsonRpcError::internal_error(
                Some(id.clone()),
                Some("connection closed".to_string()),
            ))
        });

        assert!(matches!(rx1.await.unwrap(), JsonRpcMessage::Error(_)));
        assert!(matches!(rx2.await.unwrap(), JsonRpcMessage::Error(_)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_remove_then_complete_is_noop() {
        let pending = PendingRequests::new();
        let _rx = pending.register(RequestId::Number(3), None).unwrap();
        assert!(pending.remove(&RequestId::Number(3)));
        assert!(!pending.complete(response(RequestId::Number(3))));
    }
}
