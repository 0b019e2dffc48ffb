//! SSE stream registry with resumability.
//!
//! Every SSE channel the endpoint opens is a *stream* with a stable
//! stream-id: one long-lived GET stream per session plus one stream per
//! POST that carries requests. Outgoing messages are appended to the
//! event store first (when one is configured) and then pushed to the live
//! channel, so a dropped connection loses nothing the client cannot
//! replay with `Last-Event-ID`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use strand_mcp_jsonrpc::RequestId;
use strand_mcp_protocol::McpVersion;
use strand_mcp_session::{EventStoreError, SharedEventStore, StoredEvent};
use strand_mcp_transport::sse::{keepalive_comment, SseEvent};

/// Response body type shared by every SSE endpoint response
pub type SseBody = UnsyncBoxBody<Bytes, std::convert::Infallible>;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("a server-to-client stream is already open for session {0}")]
    GetStreamOpen(String),

    #[error("no delivery channel for session {0}")]
    NoChannel(String),

    #[error("event storage failed: {0}")]
    Storage(String),
}

impl From<EventStoreError> for StreamError {
    fn from(err: EventStoreError) -> Self {
        StreamError::Storage(err.to_string())
    }
}

#[derive(Default)]
struct Inner {
    /// stream-id → live channel of pre-formatted SSE frames
    live: HashMap<String, mpsc::Sender<String>>,
    /// (session, originating request id) → stream-id, for correlated
    /// server→client message routing
    request_index: HashMap<(String, RequestId), String>,
    /// session → every stream-id it owns, for termination cleanup
    session_streams: HashMap<String, HashSet<String>>,
}

/// Registry of live SSE channels for all sessions of one endpoint
pub struct StreamManager {
    event_store: Option<SharedEventStore>,
    retry_interval: Option<Duration>,
    keepalive_interval: Duration,
    /// Event ids when no store is configured; not resumable, but POST
    /// streams still emit `id:`-prefixed events
    fallback_ids: AtomicU64,
    inner: Mutex<Inner>,
}

impl StreamManager {
    pub fn new(
        event_store: Option<SharedEventStore>,
        retry_interval: Option<Duration>,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            event_store,
            retry_interval,
            keepalive_interval,
            fallback_ids: AtomicU64::new(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Stable id of a session's GET stream, so reconnects resume the same
    /// logical stream
    fn get_stream_id(session_id: &str) -> String {
        format!("get/{}", session_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("stream registry poisoned")
    }

    /// Append a message event and push it to the live channel if one is
    /// open. Returns the assigned event id; a full or closed channel only
    /// logs — the store is the source of truth for replay.
    pub async fn write_to_stream(
        &self,
        stream_id: &str,
        payload: String,
    ) -> Result<u64, StreamError> {
        let event_id = match &self.event_store {
            Some(store) => store.store_event(stream_id, Some(payload.clone())).await?,
            None => self.fallback_ids.fetch_add(1, Ordering::SeqCst),
        };

        let frame = SseEvent::message(event_id.to_string(), payload).format();
        let sender = self.lock().live.get(stream_id).cloned();
        if let Some(sender) = sender {
            if let Err(err) = sender.try_send(frame) {
                debug!(stream_id = %stream_id, error = %err, "live push failed, event kept for replay");
            }
        }
        Ok(event_id)
    }

    /// Route a server-initiated message: prefer the stream of the
    /// correlated in-flight request, then the GET stream; with an event
    /// store configured the GET stream log absorbs the message even while
    /// no connection is live, otherwise it is dropped.
    pub async fn deliver(
        &self,
        session_id: &str,
        payload: String,
        related_request_id: Option<&RequestId>,
    ) -> Result<(), StreamError> {
        let get_sid = Self::get_stream_id(session_id);
        let stream_id = {
            let inner = self.lock();
            let live_open = |sid: &str| {
                inner
                    .live
                    .get(sid)
                    .map(|sender| !sender.is_closed())
                    .unwrap_or(false)
            };

            related_request_id
                .and_then(|id| {
                    inner
                        .request_index
                        .get(&(session_id.to_string(), id.clone()))
                        .cloned()
                })
                .filter(|sid| live_open(sid))
                .or_else(|| {
                    if live_open(&get_sid) || self.event_store.is_some() {
                        Some(get_sid.clone())
                    } else {
                        None
                    }
                })
        };

        match stream_id {
            Some(stream_id) => {
                self.write_to_stream(&stream_id, payload).await?;
                Ok(())
            }
            None => {
                warn!(session_id = %session_id, "dropping server message: no stream and no event store");
                Err(StreamError::NoChannel(session_id.to_string()))
            }
        }
    }

    /// Register the SSE stream for one POST carrying requests. All request
    /// ids of the batch share the stream. Returns the stream id and the
    /// receiver the response body drains.
    pub fn create_request_stream(
        &self,
        session_id: &str,
        request_ids: &[RequestId],
    ) -> (String, mpsc::Receiver<String>) {
        let stream_id = format!("post/{}", uuid::Uuid::now_v7());
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let mut inner = self.lock();
        inner.live.insert(stream_id.clone(), tx);
        for id in request_ids {
            inner
                .request_index
                .insert((session_id.to_string(), id.clone()), stream_id.clone());
        }
        inner
            .session_streams
            .entry(session_id.to_string())
            .or_default()
            .insert(stream_id.clone());

        debug!(session_id = %session_id, stream_id = %stream_id, "request stream opened");
        (stream_id, rx)
    }

    /// Close a request stream once every response for the batch has been
    /// delivered; dropping the live sender ends the response body.
    pub fn finish_request_stream(
        &self,
        session_id: &str,
        request_ids: &[RequestId],
        stream_id: &str,
    ) {
        let mut inner = self.lock();
        inner.live.remove(stream_id);
        for id in request_ids {
            inner
                .request_index
                .remove(&(session_id.to_string(), id.clone()));
        }
        if let Some(streams) = inner.session_streams.get_mut(session_id) {
            streams.remove(stream_id);
        }
    }

    /// Turn a request-stream receiver into an SSE response body
    pub fn request_stream_body(&self, rx: mpsc::Receiver<String>) -> SseBody {
        let frames = ReceiverStream::new(rx)
            .map(|text| Ok::<_, std::convert::Infallible>(Frame::data(Bytes::from(text))));
        BodyExt::boxed_unsync(StreamBody::new(frames))
    }

    /// Open the session's GET stream, optionally resuming from
    /// `last_event_id`.
    ///
    /// Resumption binds the new connection to whatever stream the cursor
    /// belongs to and replays every later event on it before going live.
    /// A fresh GET on a ≥ 2025-11-25 session with an event store first
    /// emits a priming event so the client holds an anchor for later
    /// resumption. At most one live GET stream is allowed per session.
    pub async fn open_get_stream(
        &self,
        session_id: &str,
        version: McpVersion,
        last_event_id: Option<u64>,
    ) -> Result<SseBody, StreamError> {
        let get_sid = Self::get_stream_id(session_id);

        let mut replay: Vec<StoredEvent> = Vec::new();
        let mut bind_stream = get_sid.clone();
        if let (Some(cursor), Some(store)) = (last_event_id, &self.event_store) {
            // An unknown cursor has no stream context; treat as fresh.
            if let Some(set) = store.replay_events_after(cursor).await? {
                bind_stream = set.stream_id;
                replay = set.events;
            }
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        {
            let mut inner = self.lock();
            if bind_stream == get_sid {
                if let Some(existing) = inner.live.get(&get_sid) {
                    if !existing.is_closed() {
                        return Err(StreamError::GetStreamOpen(session_id.to_string()));
                    }
                }
            }
            inner.live.insert(bind_stream.clone(), tx);
            inner
                .session_streams
                .entry(session_id.to_string())
                .or_default()
                .insert(bind_stream.clone());
        }

        // Head frames delivered before going live: priming or replay.
        let mut head: Vec<String> = Vec::new();
        if last_event_id.is_none() && version.supports_priming_events() {
            if let Some(store) = &self.event_store {
                let anchor = store.store_event(&get_sid, None).await?;
                let mut priming = SseEvent::priming(anchor.to_string());
                if let Some(retry) = self.retry_interval {
                    priming = priming.with_retry(retry.as_millis() as u64);
                }
                head.push(priming.format());
            }
        }
        for event in replay {
            head.push(
                SseEvent::message(event.id.to_string(), event.payload.unwrap_or_default())
                    .format(),
            );
        }

        let keepalive = self.keepalive_interval;
        let body_stream = async_stream::stream! {
            for frame in head {
                yield frame;
            }
            let mut rx = rx;
            let mut ticker = tokio::time::interval(keepalive);
            ticker.tick().await; // the immediate first tick
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(frame) => yield frame,
                        None => break,
                    },
                    _ = ticker.tick() => yield keepalive_comment().to_string(),
                }
            }
        };

        let frames = body_stream
            .map(|text: String| Ok::<_, std::convert::Infallible>(Frame::data(Bytes::from(text))));
        Ok(BodyExt::boxed_unsync(StreamBody::new(frames)))
    }

    /// Whether a live GET stream is currently open for the session
    pub fn has_get_stream(&self, session_id: &str) -> bool {
        let get_sid = Self::get_stream_id(session_id);
        self.lock()
            .live
            .get(&get_sid)
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    /// Tear down every stream of a terminated session; live bodies end as
    /// their senders drop. Returns how many streams were closed.
    pub async fn close_session(&self, session_id: &str) -> usize {
        let stream_ids: Vec<String> = {
            let mut inner = self.lock();
            let streams = inner
                .session_streams
                .remove(session_id)
                .unwrap_or_default();
            for stream_id in &streams {
                inner.live.remove(stream_id);
            }
            inner
                .request_index
                .retain(|(session, _), _| session != session_id);
            streams.into_iter().collect()
        };

        if let Some(store) = &self.event_store {
            for stream_id in &stream_ids {
                let _ = store.delete_stream(stream_id).await;
            }
        }
        debug!(session_id = %session_id, count = stream_ids.len(), "session streams closed");
        stream_ids.len()
    }
}
