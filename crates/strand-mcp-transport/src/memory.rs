//! In-memory transport: two linked endpoints backed by bounded channels.
//!
//! Test-only plumbing. A bounded capacity models back-pressure (`send`
//! awaits channel room); dropping or disconnecting one endpoint surfaces
//! as a clean end-of-stream on the peer's receive side.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    MessageContext, MessageStream, SendOptions, Transport, TransportError, TransportMessage,
};

/// One endpoint of a linked pair created by [`InMemoryTransport::pair`]
pub struct InMemoryTransport {
    to_peer: Option<mpsc::Sender<TransportMessage>>,
    from_peer: Option<mpsc::Receiver<TransportMessage>>,
    connected: AtomicBool,
}

impl InMemoryTransport {
    /// Create two linked endpoints sharing a pair of bounded queues
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_to_b, b_from_a) = mpsc::channel(capacity);
        let (b_to_a, a_from_b) = mpsc::channel(capacity);
        (
            Self {
                to_peer: Some(a_to_b),
                from_peer: Some(a_from_b),
                connected: AtomicBool::new(false),
            },
            Self {
                to_peer: Some(b_to_a),
                from_peer: Some(b_from_a),
                connected: AtomicBool::new(false),
            },
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender ends the peer's receive stream
        self.to_peer = None;
        Ok(())
    }

    async fn send(&self, payload: Bytes, options: SendOptions) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let sender = self.to_peer.as_ref().ok_or(TransportError::Closed)?;
        let message = TransportMessage::with_context(
            payload,
            MessageContext {
                session_id: options.related_session_id,
                request_id: options.related_request_id,
            },
        );
        sender
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn receive(&mut self) -> Result<MessageStream, TransportError> {
        let rx = self.from_peer.take().ok_or(TransportError::ReceiverTaken)?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn supports_server_to_client_requests(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_messages_preserve_order() {
        let (mut a, mut b) = InMemoryTransport::pair(16);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut incoming = b.receive().unwrap();

        for i in 0..3 {
            a.send(
                Bytes::from(format!("{{\"id\":{}}}", i)),
                SendOptions::default(),
            )
            .await
            .unwrap();
        }

        for i in 0..3 {
            let msg = incoming.next().await.unwrap();
            assert_eq!(msg.payload, Bytes::from(format!("{{\"id\":{}}}", i)));
        }
    }

    #[tokio::test]
    async fn test_disconnect_ends_peer_stream() {
        let (mut a, mut b) = InMemoryTransport::pair(4);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut incoming = b.receive().unwrap();

        a.send(Bytes::from_static(b"{}"), SendOptions::default())
            .await
            .unwrap();
        a.disconnect().await.unwrap();

        assert!(incoming.next().await.is_some());
        assert!(incoming.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_peer_gone() {
        let (mut a, b) = InMemoryTransport::pair(4);
        a.connect().await.unwrap();
        drop(b);
        let result = a
            .send(Bytes::from_static(b"{}"), SendOptions::default())
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_context_carried_through() {
        let (mut a, mut b) = InMemoryTransport::pair(4);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut incoming = b.receive().unwrap();

        a.send(
            Bytes::from_static(b"{}"),
            SendOptions {
                related_session_id: Some("s1".into()),
                related_request_id: None,
            },
        )
        .await
        .unwrap();

        let msg = incoming.next().await.unwrap();
        assert_eq!(msg.context.session_id.as_deref(), Some("s1"));
    }
}
