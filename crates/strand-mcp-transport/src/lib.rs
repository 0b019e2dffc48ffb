//! # Transport layer for strand MCP
//!
//! The uniform [`Transport`] contract plus the two built-in byte
//! transports: newline-delimited JSON over a pair of file descriptors
//! (stdio) and a channel-backed in-memory pair for tests. SSE framing
//! primitives live here too since both HTTP transports share them.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use async_trait::async_trait;
use thiserror::Error;

use strand_mcp_jsonrpc::RequestId;

pub mod framing;
pub mod memory;
pub mod sse;
pub mod stdio;

pub use framing::LineBuffer;
pub use memory::InMemoryTransport;
pub use sse::{SseEvent, SseParser};
pub use stdio::StdioTransport;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transport not connected")]
    NotConnected,

    #[error("transport closed")]
    Closed,

    #[error("receive stream already taken")]
    ReceiverTaken,

    #[error("invalid outgoing message: {0}")]
    InvalidMessage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-message routing context attached by the transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageContext {
    /// Session the message belongs to, when the transport tracks sessions
    pub session_id: Option<String>,
    /// Incoming request this message was received in reply context of
    pub request_id: Option<RequestId>,
}

/// One framed message as it crosses a transport
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub payload: Bytes,
    pub context: MessageContext,
}

impl TransportMessage {
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            context: MessageContext::default(),
        }
    }

    pub fn with_context(payload: Bytes, context: MessageContext) -> Self {
        Self { payload, context }
    }
}

/// Options accompanying an outgoing message
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Correlate the message to an in-flight incoming request so stateful
    /// transports can pick that request's response stream
    pub related_request_id: Option<RequestId>,
    /// Session to deliver on, for multi-session transports
    pub related_session_id: Option<String>,
}

/// Stream of incoming framed messages; ends cleanly on transport closure
pub type MessageStream = Pin<Box<dyn Stream<Item = TransportMessage> + Send>>;

/// Uniform transport interface.
///
/// `receive` is single-consumer unless an implementation documents
/// otherwise; a second call fails with [`TransportError::ReceiverTaken`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Idempotent setup; fails on resource acquisition problems
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Release resources and end the receive stream cleanly
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Enqueue one framed message
    async fn send(&self, payload: Bytes, options: SendOptions) -> Result<(), TransportError>;

    /// Take the stream of incoming messages
    fn receive(&mut self) -> Result<MessageStream, TransportError>;

    /// Whether this transport can carry server-initiated requests toward
    /// the client. Stdio and stateless HTTP cannot.
    fn supports_server_to_client_requests(&self) -> bool {
        false
    }
}
