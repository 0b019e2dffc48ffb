//! Pluggable append-only event storage for SSE resumability.
//!
//! Every SSE stream the server opens gets a stream id; messages written to
//! the stream are appended here first and the assigned event id rides the
//! SSE `id:` field. A reconnecting client presents `Last-Event-ID`;
//! replay yields every later event *on the same stream* in insertion
//! order and never leaks events from other streams. Priming events (empty
//! payload) anchor a stream's first id and are skipped during replay.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// Globally unique (per store) monotonically increasing event id
pub type EventId = u64;

/// One stored event
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub stream_id: String,
    /// Serialized JSON-RPC message; `None` marks a priming event
    pub payload: Option<String>,
}

impl StoredEvent {
    pub fn is_priming(&self) -> bool {
        self.payload.is_none()
    }
}

/// Result of a replay lookup: the stream the cursor belongs to and every
/// later message event on it
#[derive(Debug, Clone)]
pub struct ReplaySet {
    pub stream_id: String,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("event storage failed: {0}")]
    Storage(String),
}

/// Append-only per-stream event log with replay-after-id semantics
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event; `payload = None` stores a priming event. Returns
    /// the assigned id.
    async fn store_event(
        &self,
        stream_id: &str,
        payload: Option<String>,
    ) -> Result<EventId, EventStoreError>;

    /// Locate the stream `last_event_id` belongs to and return every
    /// later message event on it, oldest first. Unknown ids yield
    /// `Ok(None)`: there is no stream context to resume.
    async fn replay_events_after(
        &self,
        last_event_id: EventId,
    ) -> Result<Option<ReplaySet>, EventStoreError>;

    /// Drop a stream's log (stream closed for good / session terminated)
    async fn delete_stream(&self, stream_id: &str) -> Result<u64, EventStoreError>;

    /// Total stored events, for monitoring
    async fn event_count(&self) -> usize;
}

/// Shared handle to a store implementation
pub type SharedEventStore = Arc<dyn EventStore>;

/// In-memory store bounded per stream; the default for tests and
/// single-instance deployments.
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<String, VecDeque<StoredEvent>>>,
    /// event id → owning stream, for O(1) replay lookup
    index: RwLock<HashMap<EventId, String>>,
    counter: AtomicU64,
    max_events_per_stream: usize,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_events_per_stream: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(1),
            max_events_per_stream: max_events_per_stream.max(1),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store_event(
        &self,
        stream_id: &str,
        payload: Option<String>,
    ) -> Result<EventId, EventStoreError> {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let event = StoredEvent {
            id,
            stream_id: stream_id.to_string(),
            payload,
        };

        let mut streams = self.streams.write().await;
        let mut index = self.index.write().await;
        let log = streams.entry(stream_id.to_string()).or_default();

        // Bounded log: evict oldest rather than fail; replay loss is
        // recoverable because the client reconnects from its own cursor.
        while log.len() >= self.max_events_per_stream {
            if let Some(evicted) = log.pop_front() {
                index.remove(&evicted.id);
            }
        }

        index.insert(id, stream_id.to_string());
        log.push_back(event);
        debug!(stream_id = %stream_id, event_id = id, "event stored");
        Ok(id)
    }

    async fn replay_events_after(
        &self,
        last_event_id: EventId,
    ) -> Result<Option<ReplaySet>, EventStoreError> {
        let stream_id = {
            let index = self.index.read().await;
            match index.get(&last_event_id) {
                Some(stream_id) => stream_id.clone(),
                None => return Ok(None),
            }
        };

        let streams = self.streams.read().await;
        let events = streams
            .get(&stream_id)
            .map(|log| {
                log.iter()
                    .filter(|event| event.id > last_event_id && !event.is_priming())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(ReplaySet { stream_id, events }))
    }

    async fn delete_stream(&self, stream_id: &str) -> Result<u64, EventStoreError> {
        let mut streams = self.streams.write().await;
        let removed = match streams.remove(stream_id) {
            Some(log) => {
                let mut index = self.index.write().await;
                for event in &log {
                    index.remove(&event.id);
                }
                log.len() as u64
            }
            None => 0,
        };
        Ok(removed)
    }

    async fn event_count(&self) -> usize {
        self.streams.read().await.values().map(|l| l.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_is_scoped_to_one_stream() {
        let store = InMemoryEventStore::new();
        // interleave two streams
        let e1 = store.store_event("stream-a", Some("a1".into())).await.unwrap();
        let e2 = store.store_event("stream-b", Some("b1".into())).await.unwrap();
        let e3 = store.store_event("stream-a", Some("a2".into())).await.unwrap();
        let e4 = store.store_event("stream-b", Some("b2".into())).await.unwrap();
        assert!(e1 < e2 && e2 < e3 && e3 < e4);

        let replay = store.replay_events_after(e1).await.unwrap().unwrap();
        assert_eq!(replay.stream_id, "stream-a");
        assert_eq!(replay.events.len(), 1);
        assert_eq!(replay.events[0].id, e3);
        assert_eq!(replay.events[0].payload.as_deref(), Some("a2"));

        let replay = store.replay_events_after(e2).await.unwrap().unwrap();
        assert_eq!(replay.stream_id, "stream-b");
        assert_eq!(replay.events.len(), 1);
        assert_eq!(replay.events[0].payload.as_deref(), Some("b2"));
    }

    #[tokio::test]
    async fn test_replay_preserves_insertion_order() {
        let store = InMemoryEventStore::new();
        let first = store.store_event("s", Some("1".into())).await.unwrap();
        for i in 2..=5 {
            store
                .store_event("s", Some(i.to_string()))
                .await
                .unwrap();
        }

        let replay = store.replay_events_after(first).await.unwrap().unwrap();
        let payloads: Vec<_> = replay
            .events
            .iter()
            .map(|e| e.payload.clone().unwrap())
            .collect();
        assert_eq!(payloads, vec!["2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_unknown_cursor_yields_nothing() {
        let store = InMemoryEventStore::new();
        store.store_event("s", Some("x".into())).await.unwrap();
        assert!(store.replay_events_after(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priming_events_anchor_but_never_replay() {
        let store = InMemoryEventStore::new();
        let anchor = store.store_event("s", None).await.unwrap();
        store.store_event("s", None).await.unwrap();
        let msg = store.store_event("s", Some("payload".into())).await.unwrap();

        let replay = store.replay_events_after(anchor).await.unwrap().unwrap();
        assert_eq!(replay.events.len(), 1);
        assert_eq!(replay.events[0].id, msg);
    }

    #[tokio::test]
    async fn test_bounded_log_evicts_oldest() {
        let store = InMemoryEventStore::with_capacity(2);
        let e1 = store.store_event("s", Some("1".into())).await.unwrap();
        store.store_event("s", Some("2".into())).await.unwrap();
        store.store_event("s", Some("3".into())).await.unwrap();

        assert_eq!(store.event_count().await, 2);
        // evicted cursor no longer resolves to a stream
        assert!(store.replay_events_after(e1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let store = InMemoryEventStore::new();
        let id = store.store_event("s", Some("1".into())).await.unwrap();
        assert_eq!(store.delete_stream("s").await.unwrap(), 1);
        assert_eq!(store.event_count().await, 0);
        assert!(store.replay_events_after(id).await.unwrap().is_none());
    }
}
