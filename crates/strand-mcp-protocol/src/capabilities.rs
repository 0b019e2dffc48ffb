//! Client and server capability records.
//!
//! A sub-capability's *presence* signals support; its fields carry
//! sub-semantics such as `listChanged` or `subscribe`. `Some(Default)`
//! serializes as `{}` — distinct from an omitted record — so builders keep
//! the `Option` wrapping rather than flattening to booleans.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::McpError;
use crate::methods;

/// Client support for filesystem roots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Client support for model sampling requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SamplingCapability {}

/// Client support for structured user elicitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ElicitationCapability {}

/// Support for long-running task augmentation (either side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TasksCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server support for structured log notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingCapability {}

/// Server support for prompt templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server support for resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server support for tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Server support for argument completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsCapability {}

/// Capabilities a client may advertise during initialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<ElicitationCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksCapability>,
}

/// Capabilities a server advertises in its initialize result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<CompletionsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksCapability>,
}

impl ServerCapabilities {
    /// Merge capabilities inferred from registered handlers with explicit
    /// declarations; explicit records win field-by-field.
    pub fn merged_with(mut self, inferred: ServerCapabilities) -> ServerCapabilities {
        self.logging = self.logging.or(inferred.logging);
        self.prompts = self.prompts.or(inferred.prompts);
        self.resources = self.resources.or(inferred.resources);
        self.tools = self.tools.or(inferred.tools);
        self.completions = self.completions.or(inferred.completions);
        self.experimental = self.experimental.or(inferred.experimental);
        self.tasks = self.tasks.or(inferred.tasks);
        self
    }

    /// Check that a server-initiated notification is covered by an
    /// advertised capability before it goes out on the wire.
    pub fn check_notification(&self, method: &str) -> Result<(), McpError> {
        let allowed = match method {
            methods::NOTIFICATION_RESOURCES_LIST_CHANGED
            | methods::NOTIFICATION_RESOURCES_UPDATED => self.resources.is_some(),
            methods::NOTIFICATION_TOOLS_LIST_CHANGED => self.tools.is_some(),
            methods::NOTIFICATION_PROMPTS_LIST_CHANGED => self.prompts.is_some(),
            methods::NOTIFICATION_MESSAGE => self.logging.is_some(),
            // Control notifications (progress, cancelled, ...) are always
            // permitted.
            _ => true,
        };
        if allowed {
            Ok(())
        } else {
            Err(McpError::CapabilityUnavailable {
                which: method.to_string(),
            })
        }
    }

    /// Strict-mode lookup: does the server advertise support for the
    /// capability family a request method belongs to?
    pub fn supports_method(&self, method: &str) -> bool {
        match method.split('/').next() {
            Some("tools") => self.tools.is_some(),
            Some("resources") => self.resources.is_some(),
            Some("prompts") => self.prompts.is_some(),
            Some("completion") => self.completions.is_some(),
            Some("logging") => self.logging.is_some(),
            // initialize, ping, and anything unrecognized are not gated
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_present_but_empty_serializes_as_empty_object() {
        let caps = ClientCapabilities {
            sampling: Some(SamplingCapability::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(&caps).unwrap();
        assert_eq!(value, json!({"sampling": {}}));
    }

    #[test]
    fn test_unset_is_omitted() {
        let caps = ServerCapabilities::default();
        assert_eq!(serde_json::to_value(&caps).unwrap(), json!({}));
    }

    #[test]
    fn test_merge_prefers_explicit() {
        let explicit = ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            ..Default::default()
        };
        let inferred = ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: None }),
            resources: Some(ResourcesCapability::default()),
            ..Default::default()
        };
        let merged = explicit.merged_with(inferred);
        assert_eq!(merged.tools.unwrap().list_changed, Some(true));
        assert!(merged.resources.is_some());
    }

    #[test]
    fn test_notification_gating() {
        let caps = ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        };
        assert!(caps
            .check_notification(methods::NOTIFICATION_TOOLS_LIST_CHANGED)
            .is_ok());
        assert!(matches!(
            caps.check_notification(methods::NOTIFICATION_RESOURCES_LIST_CHANGED),
            Err(McpError::CapabilityUnavailable { .. })
        ));
        // control notifications never gate
        assert!(caps
            .check_notification(methods::NOTIFICATION_PROGRESS)
            .is_ok());
    }

    #[test]
    fn test_supports_method() {
        let caps = ServerCapabilities {
            resources: Some(ResourcesCapability::default()),
            ..Default::default()
        };
        assert!(caps.supports_method("resources/list"));
        assert!(!caps.supports_method("tools/call"));
        assert!(caps.supports_method("ping"));
    }
}
