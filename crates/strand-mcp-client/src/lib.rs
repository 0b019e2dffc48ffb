//! # Client-role MCP protocol engine
//!
//! [`McpClient`] owns outgoing-request correlation (ids, timeouts,
//! cancellation, progress callbacks) over any [`ClientSender`]; the
//! bundled [`transport::http::StreamableHttpClient`] maps that onto the
//! Streamable-HTTP endpoint with session handling, SSE ingestion, and
//! resumable reconnection.

pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use client::{
    ClientHandler, ClientSender, McpClient, McpClientBuilder, NotificationHook, ProgressCallback,
    RequestOptions,
};
pub use config::{ClientConfig, ReconnectOptions};
pub use error::{classify_status, ClientError, ClientResult};
pub use transport::http::StreamableHttpClient;
pub use transport::{connect_byte_transport, ByteTransportSender};
