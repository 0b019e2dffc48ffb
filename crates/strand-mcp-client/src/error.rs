//! Client error types and HTTP status mapping.

use thiserror::Error;

use strand_mcp_protocol::McpError;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Typed protocol/session errors (the taxonomy of the engine)
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// Network-level failures from the HTTP stack
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),
}

impl ClientError {
    /// The typed MCP error, when this wraps one
    pub fn as_mcp(&self) -> Option<&McpError> {
        match self {
            ClientError::Mcp(error) => Some(error),
            _ => None,
        }
    }
}

/// Map a non-2xx POST/GET/DELETE status to the typed error the caller
/// observes. A 404 on a session we hold means the server discarded the
/// session (expired) — unless this was the initialize itself, in which
/// case the endpoint is simply wrong.
pub fn classify_status(status: u16, has_session: bool, is_initialize: bool) -> Option<McpError> {
    match status {
        200..=299 => None,
        400 => Some(McpError::InvalidRequest("server rejected request".into())),
        401 => Some(McpError::AuthenticationRequired),
        403 => Some(McpError::Forbidden),
        404 => {
            if has_session && !is_initialize {
                Some(McpError::SessionExpired)
            } else {
                Some(McpError::ResourceNotFound("endpoint not found".into()))
            }
        }
        405 => Some(McpError::MethodNotAllowed),
        408 => Some(McpError::RequestTimeout),
        429 => Some(McpError::TooManyRequests),
        status if status >= 500 => Some(McpError::ServerError { status }),
        status => Some(McpError::Transport {
            cause: format!("unexpected status {}", status),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses_pass() {
        assert!(classify_status(200, false, false).is_none());
        assert!(classify_status(202, true, false).is_none());
    }

    #[test]
    fn test_status_table() {
        assert!(matches!(
            classify_status(401, false, false),
            Some(McpError::AuthenticationRequired)
        ));
        assert!(matches!(
            classify_status(403, false, false),
            Some(McpError::Forbidden)
        ));
        assert!(matches!(
            classify_status(405, false, false),
            Some(McpError::MethodNotAllowed)
        ));
        assert!(matches!(
            classify_status(408, false, false),
            Some(McpError::RequestTimeout)
        ));
        assert!(matches!(
            classify_status(429, false, false),
            Some(McpError::TooManyRequests)
        ));
        assert!(matches!(
            classify_status(503, false, false),
            Some(McpError::ServerError { status: 503 })
        ));
    }

    #[test]
    fn test_404_depends_on_session_state() {
        // holding a session: the server forgot us
        assert!(matches!(
            classify_status(404, true, false),
            Some(McpError::SessionExpired)
        ));
        // no session yet, or during initialize: wrong endpoint
        assert!(matches!(
            classify_status(404, false, false),
            Some(McpError::ResourceNotFound(_))
        ));
        assert!(matches!(
            classify_status(404, true, true),
            Some(McpError::ResourceNotFound(_))
        ));
    }
}
