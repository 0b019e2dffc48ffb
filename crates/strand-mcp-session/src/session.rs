//! Session lifecycle.
//!
//! A session is created on the first `initialize` POST, moves through
//! uninitialized → initializing → initialized, and terminates on DELETE,
//! explicit close, or transport teardown. Terminated sessions stay in the
//! registry so later requests bearing their id can be answered with 404
//! rather than treated as unknown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use strand_mcp_protocol::{ClientCapabilities, McpVersion, ServerCapabilities};

/// Session initialization state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// `initialize` received, `notifications/initialized` still pending
    Initializing,
    Initialized,
    Terminated,
}

/// Per-session state tracked by the server transport
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Opaque id, visible-ASCII only (see [`validate_session_id`])
    pub session_id: String,
    pub state: SessionState,
    /// Version negotiated during initialize
    pub protocol_version: Option<McpVersion>,
    pub client_capabilities: Option<ClientCapabilities>,
    pub server_capabilities: Option<ServerCapabilities>,
    /// Unix millis
    pub created_at: u64,
    pub last_activity: u64,
}

impl SessionInfo {
    pub fn new(session_id: String) -> Self {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        Self {
            session_id,
            state: SessionState::Uninitialized,
            protocol_version: None,
            client_capabilities: None,
            server_capabilities: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Update the last-activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = chrono::Utc::now().timestamp_millis() as u64;
    }

    pub fn is_expired(&self, max_idle: Duration) -> bool {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        now.saturating_sub(self.last_activity) > max_idle.as_millis() as u64
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }
}

/// Session ids must be non-empty and consist of visible ASCII (0x21–0x7E)
/// so they survive as HTTP header values.
pub fn validate_session_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| (0x21..=0x7E).contains(&b))
}

/// Produces session ids; injected so deployments can bring their own
/// scheme. The default is UUID v7 for temporal ordering.
pub type SessionIdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Lifecycle callback invoked with the affected session id
pub type SessionCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session terminated: {0}")]
    Terminated(String),

    #[error("session already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("session id generator produced an invalid id")]
    InvalidGeneratedId,
}

/// Registry of live and terminated sessions.
///
/// All mutation goes through the async `RwLock`; lookups clone the info
/// out so no lock is held across handler awaits.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    generator: SessionIdGenerator,
    on_initialized: Option<SessionCallback>,
    on_closed: Option<SessionCallback>,
}

impl SessionManager {
    pub fn new(generator: Option<SessionIdGenerator>) -> Self {
        let generator =
            generator.unwrap_or_else(|| Arc::new(|| Uuid::now_v7().to_string()) as SessionIdGenerator);
        Self {
            sessions: RwLock::new(HashMap::new()),
            generator,
            on_initialized: None,
            on_closed: None,
        }
    }

    pub fn with_callbacks(
        mut self,
        on_initialized: Option<SessionCallback>,
        on_closed: Option<SessionCallback>,
    ) -> Self {
        self.on_initialized = on_initialized;
        self.on_closed = on_closed;
        self
    }

    /// Allocate a new session from the configured generator. A generator
    /// that yields an id outside visible ASCII is a configuration error.
    pub async fn create_session(&self) -> Result<SessionInfo, SessionError> {
        let session_id = (self.generator)();
        if !validate_session_id(&session_id) {
            return Err(SessionError::InvalidGeneratedId);
        }
        let session = SessionInfo::new(session_id.clone());
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.clone(), session.clone());
        debug!(session_id = %session_id, "session created");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Record a received `initialize`: pins the negotiated version and the
    /// capability records and moves the session to `Initializing`. The
    /// handshake completes when `notifications/initialized` arrives.
    pub async fn begin_initialize(
        &self,
        session_id: &str,
        version: McpVersion,
        client_capabilities: ClientCapabilities,
        server_capabilities: ServerCapabilities,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        match session.state {
            SessionState::Terminated => {
                return Err(SessionError::Terminated(session_id.to_string()))
            }
            SessionState::Initializing | SessionState::Initialized => {
                return Err(SessionError::AlreadyInitialized(session_id.to_string()))
            }
            SessionState::Uninitialized => {}
        }
        session.state = SessionState::Initializing;
        session.protocol_version = Some(version);
        session.client_capabilities = Some(client_capabilities);
        session.server_capabilities = Some(server_capabilities);
        session.touch();
        debug!(session_id = %session_id, version = %version, "initialize received");
        Ok(())
    }

    /// Complete the handshake on `notifications/initialized`. Fires
    /// `on_initialized` the first time only; a stray repeat is a no-op.
    pub async fn confirm_initialized(&self, session_id: &str) -> Result<(), SessionError> {
        let newly_ready = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            match session.state {
                SessionState::Initializing => {
                    session.state = SessionState::Initialized;
                    session.touch();
                    true
                }
                SessionState::Initialized => false,
                SessionState::Terminated => {
                    return Err(SessionError::Terminated(session_id.to_string()))
                }
                SessionState::Uninitialized => false,
            }
        };
        if newly_ready {
            if let Some(callback) = &self.on_initialized {
                callback(session_id);
            }
            info!(session_id = %session_id, "session initialized");
        }
        Ok(())
    }

    /// Refresh activity on any request bearing the session id
    pub async fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.touch();
        }
    }

    /// Terminate a session. Fires `on_closed` only when a live session was
    /// actually closed; returns whether that happened.
    pub async fn terminate_session(&self, session_id: &str) -> bool {
        let closed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(session_id) {
                Some(session) if !session.is_terminated() => {
                    session.state = SessionState::Terminated;
                    session.touch();
                    true
                }
                _ => false,
            }
        };
        if closed {
            if let Some(callback) = &self.on_closed {
                callback(session_id);
            }
            info!(session_id = %session_id, "session terminated");
        }
        closed
    }

    /// Terminate every live session (server shutdown)
    pub async fn terminate_all(&self) -> Vec<String> {
        let ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| !s.is_terminated())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &ids {
            self.terminate_session(id).await;
        }
        ids
    }

    /// Drop sessions idle longer than `max_idle`; returns the removed ids
    pub async fn expire_sessions(&self, max_idle: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|id, session| {
                if session.is_expired(max_idle) {
                    expired.push(id.clone());
                    false
                } else {
                    true
                }
            });
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired idle sessions");
        }
        expired
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
