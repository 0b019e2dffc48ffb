//! Initialize handshake types.

use serde::{Deserialize, Serialize};

use crate::capabilities::{ClientCapabilities, ServerCapabilities};
use crate::version::McpVersion;

/// Name and version of an MCP implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Parameters of the client's `initialize` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Version the client wants to use, as a date-stamped string
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: Implementation,
}

impl InitializeRequest {
    pub fn new(
        protocol_version: McpVersion,
        capabilities: ClientCapabilities,
        client_info: Implementation,
    ) -> Self {
        Self {
            protocol_version: protocol_version.as_str().to_string(),
            capabilities,
            client_info,
        }
    }
}

/// Result payload of a successful `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Version the server selected for the session
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    pub fn new(
        protocol_version: McpVersion,
        capabilities: ServerCapabilities,
        server_info: Implementation,
    ) -> Self {
        Self {
            protocol_version: protocol_version.as_str().to_string(),
            capabilities,
            server_info,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_request_serialization() {
        let request = InitializeRequest::new(
            McpVersion::V2025_06_18,
            ClientCapabilities::default(),
            Implementation::new("test-client", "0.1.0"),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["protocolVersion"], "2025-06-18");
        assert_eq!(json["clientInfo"]["name"], "test-client");
    }

    #[test]
    fn test_initialize_result_instructions_optional() {
        let result = InitializeResult::new(
            McpVersion::LATEST,
            ServerCapabilities::default(),
            Implementation::new("test-server", "0.1.0"),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json.get("instructions"), None);

        let with = result.with_instructions("read the manual");
        let json = serde_json::to_value(&with).unwrap();
        assert_eq!(json["instructions"], "read the manual");
    }
}
