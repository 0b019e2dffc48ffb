//! # MCP protocol types
//!
//! Protocol versions, capability records, the initialize handshake, the
//! control-notification payloads (progress, cancellation), and the typed
//! error taxonomy shared by both engine roles. Wire schema beyond framing
//! and control methods is out of scope; application payloads pass through
//! as raw `serde_json::Value`s.

pub mod capabilities;
pub mod error;
pub mod initialize;
pub mod meta;
pub mod notifications;
pub mod version;

pub use capabilities::{
    ClientCapabilities, CompletionsCapability, ElicitationCapability, LoggingCapability,
    PromptsCapability, ResourcesCapability, RootsCapability, SamplingCapability, ServerCapabilities,
    TasksCapability, ToolsCapability,
};
pub use error::McpError;
pub use initialize::{Implementation, InitializeRequest, InitializeResult};
pub use meta::inject_progress_token;
pub use notifications::{CancelledParams, ProgressParams};
pub use version::McpVersion;

/// MCP method names used by the engine itself
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";

    pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
    pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
    pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";
    pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
    pub const NOTIFICATION_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const NOTIFICATION_RESOURCES_UPDATED: &str = "notifications/resources/updated";
    pub const NOTIFICATION_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const NOTIFICATION_PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
}
