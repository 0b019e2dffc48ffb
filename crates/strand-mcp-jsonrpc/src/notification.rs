use serde::{Deserialize, Serialize};

use crate::request::RequestParams;
use crate::types::JsonRpcVersion;

/// A JSON-RPC notification (a request without an id; no response follows)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }

    /// Get a named parameter (object params only)
    pub fn get_param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.as_ref()?.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json.get("id"), None);
        assert_eq!(json["jsonrpc"], "2.0");
    }

    #[test]
    fn test_notification_params() {
        let params = RequestParams::from_value(json!({"requestId": 3, "reason": "user"}));
        let notification = JsonRpcNotification::new("notifications/cancelled", params);
        assert_eq!(notification.get_param("requestId"), Some(&json!(3)));
    }
}
