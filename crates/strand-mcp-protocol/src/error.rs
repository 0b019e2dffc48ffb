//! Typed error taxonomy.
//!
//! One enum spans transport, session, and protocol failures so both engine
//! roles propagate a single error type. Conversion to JSON-RPC error
//! objects uses pre-authored strings only; internal error text never
//! leaks onto the wire.

use thiserror::Error;

use strand_mcp_jsonrpc::{error_codes, JsonRpcErrorObject};

#[derive(Debug, Error)]
pub enum McpError {
    #[error("parse error")]
    ParseError,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("transport error: {cause}")]
    Transport { cause: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport not connected")]
    NotConnected,

    #[error("peer has not completed initialization")]
    NotInitialized,

    #[error("session is already initialized")]
    AlreadyInitialized,

    #[error("request timed out")]
    RequestTimeout,

    #[error("request was cancelled")]
    Cancelled,

    #[error("session expired")]
    SessionExpired,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("forbidden")]
    Forbidden,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("too many requests")]
    TooManyRequests,

    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    #[error("capability not advertised: {which}")]
    CapabilityUnavailable { which: String },

    #[error("elicitation via URL is required")]
    UrlElicitationRequired,

    #[error("server returned status {status}")]
    ServerError { status: u16 },

    #[error("unsupported protocol version: {requested}")]
    UnsupportedProtocolVersion { requested: String },
}

impl McpError {
    pub fn internal(message: impl Into<String>) -> Self {
        McpError::Internal(message.into())
    }

    pub fn transport(cause: impl Into<String>) -> Self {
        McpError::Transport {
            cause: cause.into(),
        }
    }

    /// Convert to a JSON-RPC error object with a sanitized message. Codes
    /// follow the standard table; stateful failures use the -32000 range.
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        let (code, message) = match self {
            McpError::ParseError => (error_codes::PARSE_ERROR, "Parse error".to_string()),
            McpError::InvalidRequest(msg) => (error_codes::INVALID_REQUEST, msg.clone()),
            McpError::InvalidParams(msg) => (error_codes::INVALID_PARAMS, msg.clone()),
            McpError::MethodNotFound(method) => (
                error_codes::METHOD_NOT_FOUND,
                format!("Method '{}' not found", method),
            ),
            McpError::ResourceNotFound(msg) => (error_codes::RESOURCE_NOT_FOUND, msg.clone()),
            McpError::Cancelled => (
                error_codes::REQUEST_CANCELLED,
                "Request cancelled".to_string(),
            ),
            McpError::RequestTimeout => (-32001, "Request timed out".to_string()),
            McpError::NotInitialized => (
                error_codes::INVALID_REQUEST,
                "Server not initialized".to_string(),
            ),
            McpError::AlreadyInitialized => (
                error_codes::INVALID_REQUEST,
                "Server already initialized".to_string(),
            ),
            McpError::UnsupportedProtocolVersion { requested } => (
                error_codes::INVALID_PARAMS,
                format!("Unsupported protocol version: {}", requested),
            ),
            McpError::CapabilityUnavailable { which } => (
                error_codes::INVALID_REQUEST,
                format!("Capability not advertised: {}", which),
            ),
            // Everything else surfaces as a generic internal error; the
            // specific cause stays in the local logs.
            _ => (error_codes::INTERNAL_ERROR, "Internal error".to_string()),
        };
        JsonRpcErrorObject {
            code,
            message,
            data: None,
        }
    }

    /// Rebuild a typed error from a received JSON-RPC error object
    pub fn from_error_object(error: &JsonRpcErrorObject) -> Self {
        match error.code {
            error_codes::PARSE_ERROR => McpError::ParseError,
            error_codes::INVALID_REQUEST => McpError::InvalidRequest(error.message.clone()),
            error_codes::INVALID_PARAMS => McpError::InvalidParams(error.message.clone()),
            error_codes::METHOD_NOT_FOUND => McpError::MethodNotFound(error.message.clone()),
            error_codes::RESOURCE_NOT_FOUND => McpError::ResourceNotFound(error.message.clone()),
            error_codes::REQUEST_CANCELLED => McpError::Cancelled,
            -32001 => McpError::RequestTimeout,
            _ => McpError::Internal(error.message.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_code_mapping() {
        assert_eq!(McpError::ParseError.to_error_object().code, -32700);
        assert_eq!(
            McpError::MethodNotFound("x".into()).to_error_object().code,
            -32601
        );
        assert_eq!(
            McpError::ResourceNotFound("r".into()).to_error_object().code,
            -32002
        );
        assert_eq!(McpError::Cancelled.to_error_object().code, -32800);
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let error = McpError::internal("secret database path /var/db leaked");
        let object = error.to_error_object();
        assert_eq!(object.code, -32603);
        assert_eq!(object.message, "Internal error");
    }

    #[test]
    fn test_transport_errors_are_sanitized() {
        let error = McpError::transport("connection reset by 10.0.0.1");
        let object = error.to_error_object();
        assert_eq!(object.code, -32603);
        assert_eq!(object.message, "Internal error");
    }

    #[test]
    fn test_roundtrip_from_error_object() {
        let original = McpError::MethodNotFound("tools/call".into());
        let rebuilt = McpError::from_error_object(&original.to_error_object());
        assert!(matches!(rebuilt, McpError::MethodNotFound(_)));
    }
}
