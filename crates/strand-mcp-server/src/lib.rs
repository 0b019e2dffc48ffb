//! # Server-role MCP protocol engine
//!
//! Transport-agnostic request handling: a method-keyed handler registry,
//! concurrent per-request dispatch with cancellation, initialize
//! negotiation with capability inference, and capability-gated outbound
//! messaging toward the client. Transports (HTTP, stdio) sit on top and
//! feed classified messages in.

pub mod capabilities;
pub mod engine;
pub mod handler;
pub mod outbound;
pub mod router;
pub mod serve;

pub use capabilities::infer_capabilities;
pub use engine::{EngineBuilder, McpServerEngine, RequestOutcome};
pub use handler::{HandlerRegistry, McpHandler, RequestContext};
pub use outbound::{OutboundSink, ServerToClient};
pub use router::RequestRouter;
pub use serve::serve_transport;
