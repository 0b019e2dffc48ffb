//! Capability inference.
//!
//! Capabilities are a pure function of the registry state plus explicit
//! overrides: a registered `resources/list` handler implies the
//! `resources` capability, and so on. The merge (explicit wins) happens in
//! [`strand_mcp_protocol::ServerCapabilities::merged_with`].

use strand_mcp_protocol::{
    CompletionsCapability, LoggingCapability, PromptsCapability, ResourcesCapability,
    ServerCapabilities, ToolsCapability,
};

/// Derive server capabilities from the set of registered method names
pub fn infer_capabilities<'a>(methods: impl IntoIterator<Item = &'a str>) -> ServerCapabilities {
    let mut caps = ServerCapabilities::default();

    for method in methods {
        match method.split('/').next() {
            Some("tools") => {
                caps.tools.get_or_insert(ToolsCapability {
                    list_changed: Some(true),
                });
            }
            Some("resources") => {
                let resources = caps.resources.get_or_insert(ResourcesCapability {
                    subscribe: None,
                    list_changed: Some(true),
                });
                if method == "resources/subscribe" {
                    resources.subscribe = Some(true);
                }
            }
            Some("prompts") => {
                caps.prompts.get_or_insert(PromptsCapability {
                    list_changed: Some(true),
                });
            }
            Some("completion") => {
                caps.completions.get_or_insert(CompletionsCapability::default());
            }
            Some("logging") => {
                caps.logging.get_or_insert(LoggingCapability::default());
            }
            _ => {}
        }
    }

    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tools_handler_implies_tools_capability() {
        let caps = infer_capabilities(["tools/list", "tools/call"]);
        assert!(caps.tools.is_some());
        assert!(caps.resources.is_none());
        assert!(caps.prompts.is_none());
    }

    #[test]
    fn test_subscribe_handler_sets_subscribe_flag() {
        let caps = infer_capabilities(["resources/list", "resources/subscribe"]);
        let resources = caps.resources.unwrap();
        assert_eq!(resources.subscribe, Some(true));
        assert_eq!(resources.list_changed, Some(true));

        let caps = infer_capabilities(["resources/list"]);
        assert_eq!(caps.resources.unwrap().subscribe, None);
    }

    #[test]
    fn test_unrelated_methods_infer_nothing() {
        let caps = infer_capabilities(["ping", "custom/thing"]);
        assert_eq!(caps, ServerCapabilities::default());
    }

    #[test]
    fn test_explicit_overrides_win_in_merge() {
        let explicit = ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
            ..Default::default()
        };
        let merged = explicit.merged_with(infer_capabilities(["tools/list"]));
        assert_eq!(merged.tools.unwrap().list_changed, Some(false));
    }
}
