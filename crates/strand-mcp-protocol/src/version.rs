//! MCP protocol version support.
//!
//! Versions are date-stamped strings negotiated during initialize and then
//! pinned per session via the `MCP-Protocol-Version` header.

use serde::{Deserialize, Serialize};

use crate::error::McpError;

/// Supported MCP protocol versions, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum McpVersion {
    /// Original protocol with HTTP+SSE transport
    #[serde(rename = "2024-11-05")]
    V2024_11_05,
    /// Introduced Streamable HTTP
    #[serde(rename = "2025-03-26")]
    V2025_03_26,
    /// Structured _meta, progressToken, elicitation
    #[serde(rename = "2025-06-18")]
    V2025_06_18,
    /// Priming events for resumable GET streams
    #[serde(rename = "2025-11-25")]
    V2025_11_25,
}

impl McpVersion {
    /// Every version this engine speaks, oldest first
    pub const SUPPORTED: &'static [McpVersion] = &[
        McpVersion::V2024_11_05,
        McpVersion::V2025_03_26,
        McpVersion::V2025_06_18,
        McpVersion::V2025_11_25,
    ];

    /// The newest version this engine speaks
    pub const LATEST: McpVersion = McpVersion::V2025_11_25;

    /// The version assumed when a request carries no
    /// `MCP-Protocol-Version` header
    pub const DEFAULT_NEGOTIATED: McpVersion = McpVersion::V2025_03_26;

    /// Parse a version string like "2025-03-26"
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2024-11-05" => Some(McpVersion::V2024_11_05),
            "2025-03-26" => Some(McpVersion::V2025_03_26),
            "2025-06-18" => Some(McpVersion::V2025_06_18),
            "2025-11-25" => Some(McpVersion::V2025_11_25),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            McpVersion::V2024_11_05 => "2024-11-05",
            McpVersion::V2025_03_26 => "2025-03-26",
            McpVersion::V2025_06_18 => "2025-06-18",
            McpVersion::V2025_11_25 => "2025-11-25",
        }
    }

    /// Whether this version maps JSON-RPC onto the single-endpoint
    /// Streamable HTTP transport
    pub fn supports_streamable_http(&self) -> bool {
        *self >= McpVersion::V2025_03_26
    }

    /// Whether GET streams anchor resumption with a priming event
    pub fn supports_priming_events(&self) -> bool {
        *self >= McpVersion::V2025_11_25
    }

    /// Pick the version for a session from the client's requested string.
    /// The requested version wins when supported; anything else is a typed
    /// negotiation failure.
    pub fn negotiate(requested: &str) -> Result<Self, McpError> {
        Self::parse(requested).ok_or_else(|| McpError::UnsupportedProtocolVersion {
            requested: requested.to_string(),
        })
    }
}

impl std::fmt::Display for McpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for McpVersion {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::negotiate(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for version in McpVersion::SUPPORTED {
            assert_eq!(McpVersion::parse(version.as_str()), Some(*version));
        }
        assert_eq!(McpVersion::parse("2023-01-01"), None);
    }

    #[test]
    fn test_ordering() {
        assert!(McpVersion::V2024_11_05 < McpVersion::V2025_03_26);
        assert!(McpVersion::V2025_11_25 > McpVersion::V2025_06_18);
        assert_eq!(McpVersion::LATEST, McpVersion::V2025_11_25);
    }

    #[test]
    fn test_feature_gates() {
        assert!(!McpVersion::V2024_11_05.supports_streamable_http());
        assert!(McpVersion::V2025_03_26.supports_streamable_http());
        assert!(!McpVersion::V2025_06_18.supports_priming_events());
        assert!(McpVersion::V2025_11_25.supports_priming_events());
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(
            McpVersion::negotiate("2025-06-18").unwrap(),
            McpVersion::V2025_06_18
        );
        assert!(matches!(
            McpVersion::negotiate("2099-01-01"),
            Err(McpError::UnsupportedProtocolVersion { .. })
        ));
    }

    #[test]
    fn test_serde_rename() {
        let version: McpVersion = serde_json::from_str("\"2025-11-25\"").unwrap();
        assert_eq!(version, McpVersion::V2025_11_25);
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"2025-11-25\"");
    }
}
