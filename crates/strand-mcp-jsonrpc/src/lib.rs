//! # JSON-RPC 2.0 framing for the strand MCP engine
//!
//! Wire types, a message classifier, and the pending-request correlation
//! table shared by both protocol-engine roles. This crate is transport
//! agnostic: it knows nothing about HTTP, SSE, or stdio.
//!
//! The classifier distinguishes *parse errors* (malformed JSON, −32700)
//! from *invalid requests* (well-formed JSON that is not a JSON-RPC 2.0
//! message, −32600); the latter recover the offending `id` when possible
//! so the peer can correlate the error.

pub mod error;
pub mod message;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

#[cfg(feature = "async")]
pub mod pending;

pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use message::{JsonRpcMessage, ParsedBody};
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, RequestParams};
pub use response::JsonRpcResponse;
pub use types::{JsonRpcVersion, RequestId};

#[cfg(feature = "async")]
pub use pending::{PendingError, PendingRequests, ProgressSink};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes, plus the MCP extensions
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// MCP: requested resource does not exist
    pub const RESOURCE_NOT_FOUND: i64 = -32002;
    /// MCP: request was cancelled before a response was produced
    pub const REQUEST_CANCELLED: i64 = -32800;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
