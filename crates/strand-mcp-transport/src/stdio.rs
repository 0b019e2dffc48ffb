//! Stdio transport: newline-delimited JSON over two file descriptors.
//!
//! A background reader task drains the input into a bounded channel of
//! framed messages; writes go through a mutex-guarded writer. Context is
//! always empty — stdio carries exactly one unnamed session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::framing::LineBuffer;
use crate::{MessageStream, SendOptions, Transport, TransportError, TransportMessage};

const READ_CHUNK: usize = 8 * 1024;
const CHANNEL_CAPACITY: usize = 256;

/// Transport over an arbitrary reader/writer pair. Use [`StdioTransport::stdio`]
/// for the process's own stdin/stdout; tests inject duplex streams.
pub struct StdioTransport<R, W> {
    reader: Option<R>,
    writer: Arc<Mutex<Option<W>>>,
    incoming: Option<mpsc::Receiver<TransportMessage>>,
    reader_task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl StdioTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Transport over the process's stdin/stdout
    pub fn stdio() -> Self {
        Self::with_streams(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn with_streams(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Arc::new(Mutex::new(Some(writer))),
            incoming: None,
            reader_task: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut reader = self
            .reader
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("input already consumed".into()))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = Arc::clone(&self.connected);

        let task = tokio::spawn(async move {
            let mut buffer = LineBuffer::new();
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => {
                        debug!(pending = buffer.pending(), "stdio input closed");
                        break;
                    }
                    Ok(n) => {
                        buffer.extend(&chunk[..n]);
                        while let Some(line) = buffer.next_line() {
                            if tx.send(TransportMessage::new(line)).await.is_err() {
                                debug!("stdio consumer dropped, stopping reader");
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "stdio read failed");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            // tx drops here, ending the receive stream cleanly
        });

        self.reader_task = Some(task);
        self.incoming = Some(rx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.incoming = None;
        debug!("stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, payload: Bytes, _options: SendOptions) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if payload.contains(&b'\n') {
            return Err(TransportError::InvalidMessage(
                "newline-delimited messages must not contain raw newlines".into(),
            ));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer.write_all(&payload).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn receive(&mut self) -> Result<MessageStream, TransportError> {
        let rx = self.incoming.take().ok_or(TransportError::ReceiverTaken)?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::{duplex, DuplexStream};

    fn transport_pair() -> (StdioTransport<DuplexStream, DuplexStream>, DuplexStream, DuplexStream)
    {
        let (input_remote, input_local) = duplex(4096);
        let (output_local, output_remote) = duplex(4096);
        (
            StdioTransport::with_streams(input_local, output_local),
            input_remote,
            output_remote,
        )
    }

    #[tokio::test]
    async fn test_reader_yields_framed_messages() {
        let (mut transport, mut feed, _out) = transport_pair();
        transport.connect().await.unwrap();
        let mut stream = transport.receive().unwrap();

        feed.write_all(b"{\"id\":1}\n{\"id\":2}\n").await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(&first.payload[..], b"{\"id\":1}");
        assert_eq!(first.context, crate::MessageContext::default());
        let second = stream.next().await.unwrap();
        assert_eq!(&second.payload[..], b"{\"id\":2}");
    }

    #[tokio::test]
    async fn test_trailing_partial_discarded_on_close() {
        let (mut transport, mut feed, _out) = transport_pair();
        transport.connect().await.unwrap();
        let mut stream = transport.receive().unwrap();

        feed.write_all(b"{\"id\":1}\n{\"id\":2").await.unwrap();
        drop(feed); // close input mid-message

        let first = stream.next().await.unwrap();
        assert_eq!(&first.payload[..], b"{\"id\":1}");
        // the unterminated tail never arrives; stream ends
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_appends_single_newline() {
        let (mut transport, _feed, mut out) = transport_pair();
        transport.connect().await.unwrap();

        transport
            .send(Bytes::from_static(b"{\"id\":3}"), SendOptions::default())
            .await
            .unwrap();

        let mut read = vec![0u8; 16];
        let n = out.read(&mut read).await.unwrap();
        assert_eq!(&read[..n], b"{\"id\":3}\n");
    }

    #[tokio::test]
    async fn test_send_rejects_embedded_newline() {
        let (mut transport, _feed, _out) = transport_pair();
        transport.connect().await.unwrap();

        let result = transport
            .send(Bytes::from_static(b"{\n}"), SendOptions::default())
            .await;
        assert!(matches!(result, Err(TransportError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (transport, _feed, _out) = transport_pair();
        let result = transport
            .send(Bytes::from_static(b"{}"), SendOptions::default())
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_receive_is_single_consumer() {
        let (mut transport, _feed, _out) = transport_pair();
        transport.connect().await.unwrap();
        let _stream = transport.receive().unwrap();
        assert!(matches!(
            transport.receive(),
            Err(TransportError::ReceiverTaken)
        ));
    }

    #[test]
    fn test_no_server_initiated_requests() {
        let (transport, _feed, _out) = transport_pair();
        assert!(!transport.supports_server_to_client_requests());
    }
}
