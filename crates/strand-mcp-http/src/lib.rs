//! # Streamable HTTP server transport
//!
//! One URL, three methods: POST submits client messages, GET opens the
//! long-lived server→client SSE stream, DELETE terminates the session.
//! Per-request SSE streams carry responses as they arrive; an injected
//! [`strand_mcp_session::EventStore`] makes streams resumable via
//! `Last-Event-ID` replay.

pub mod config;
pub mod protection;
pub mod server;
pub mod service;
pub mod stream_manager;

#[cfg(test)]
mod tests;

pub use config::{HttpServerConfig, SessionMode};
pub use protection::DnsRebindingProtection;
pub use server::serve;
pub use service::StreamableHttpService;
pub use stream_manager::{StreamError, StreamManager};

/// Session correlation header
pub const HEADER_SESSION_ID: &str = "Mcp-Session-Id";
/// Version guard header
pub const HEADER_PROTOCOL_VERSION: &str = "MCP-Protocol-Version";
/// Resumption cursor header
pub const HEADER_LAST_EVENT_ID: &str = "Last-Event-ID";
