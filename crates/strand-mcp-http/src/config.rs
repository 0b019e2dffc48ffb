//! Transport configuration.

use std::time::Duration;

use strand_mcp_session::{SessionCallback, SessionIdGenerator, SharedEventStore};

use crate::protection::DnsRebindingProtection;

/// Whether the endpoint tracks sessions
#[derive(Clone)]
pub enum SessionMode {
    /// One-shot POSTs: no session ids, no GET streams, DELETE is 405,
    /// server→client requests unsupported
    Stateless,
    /// Sessions allocated on initialize via the generator; supports
    /// server→client requests and resumable streams
    Stateful {
        session_id_generator: Option<SessionIdGenerator>,
    },
}

impl SessionMode {
    pub fn stateful() -> Self {
        SessionMode::Stateful {
            session_id_generator: None,
        }
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self, SessionMode::Stateful { .. })
    }
}

/// Configuration for [`crate::StreamableHttpService`]
#[derive(Clone)]
pub struct HttpServerConfig {
    pub session_mode: SessionMode,
    /// Return request responses as a single JSON body instead of SSE
    pub enable_json_response: bool,
    /// Backing store enabling `Last-Event-ID` resumption
    pub event_store: Option<SharedEventStore>,
    /// Advised client reconnection delay, sent as SSE `retry:`
    pub retry_interval: Option<Duration>,
    pub dns_rebinding_protection: DnsRebindingProtection,
    /// Fired when a session completes the handshake
    pub on_session_initialized: Option<SessionCallback>,
    /// Fired when a live session is actually closed
    pub on_session_closed: Option<SessionCallback>,
    /// Keep-alive comment interval on GET streams
    pub keepalive_interval: Duration,
    pub max_body_size: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            session_mode: SessionMode::stateful(),
            enable_json_response: false,
            event_store: None,
            retry_interval: None,
            dns_rebinding_protection: DnsRebindingProtection::None,
            on_session_initialized: None,
            on_session_closed: None,
            keepalive_interval: Duration::from_secs(30),
            max_body_size: 4 * 1024 * 1024,
        }
    }
}

impl HttpServerConfig {
    pub fn stateless() -> Self {
        Self {
            session_mode: SessionMode::Stateless,
            ..Default::default()
        }
    }

    pub fn with_event_store(mut self, store: SharedEventStore) -> Self {
        self.event_store = Some(store);
        self
    }

    pub fn with_json_response(mut self) -> Self {
        self.enable_json_response = true;
        self
    }

    pub fn with_dns_rebinding_protection(mut self, protection: DnsRebindingProtection) -> Self {
        self.dns_rebinding_protection = protection;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }
}
