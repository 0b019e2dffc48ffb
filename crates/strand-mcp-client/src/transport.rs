//! Client-side transports.
//!
//! [`http::StreamableHttpClient`] speaks the Streamable-HTTP endpoint;
//! [`connect_byte_transport`] adapts any byte transport (stdio, the
//! in-memory pair) so the engine can drive it the same way.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use strand_mcp_jsonrpc::{message::parse_body, JsonRpcMessage};
use strand_mcp_protocol::McpError;
use strand_mcp_transport::{SendOptions, Transport};

use crate::client::ClientSender;
use crate::error::ClientResult;

pub mod http;

/// [`ClientSender`] over a connected byte transport
pub struct ByteTransportSender<T> {
    transport: Arc<T>,
}

#[async_trait]
impl<T> ClientSender for ByteTransportSender<T>
where
    T: Transport + 'static,
{
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), McpError> {
        let payload = serde_json::to_vec(message)
            .map_err(|err| McpError::internal(err.to_string()))?;
        self.transport
            .send(Bytes::from(payload), SendOptions::default())
            .await
            .map_err(|err| McpError::transport(err.to_string()))
    }
}

/// Connect a byte transport and split it into a sender plus the parsed
/// incoming stream the engine consumes. Frames that do not parse are
/// dropped with a warning — there is no HTTP status channel to answer on.
pub async fn connect_byte_transport<T>(
    mut transport: T,
) -> ClientResult<(
    Arc<ByteTransportSender<T>>,
    mpsc::UnboundedReceiver<JsonRpcMessage>,
)>
where
    T: Transport + 'static,
{
    transport
        .connect()
        .await
        .map_err(|err| McpError::transport(err.to_string()))?;
    let mut stream = transport
        .receive()
        .map_err(|err| McpError::transport(err.to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match std::str::from_utf8(&frame.payload) {
                Ok(text) => text,
                Err(_) => {
                    warn!("dropping non-UTF-8 frame");
                    continue;
                }
            };
            match parse_body(text) {
                Ok(parsed) => {
                    for message in parsed.messages() {
                        if tx.send(message.clone()).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => warn!(error = %err, "dropping unparseable frame"),
            }
        }
        // channel drops here: the engine fails pending requests
    });

    Ok((
        Arc::new(ByteTransportSender {
            transport: Arc::new(transport),
        }),
        rx,
    ))
}
