use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{JsonRpcVersion, RequestId};

/// Parameters for a JSON-RPC request or notification
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
}

impl RequestParams {
    /// Get a named parameter (object params only)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            RequestParams::Object(map) => map.get(key),
            RequestParams::Array(_) => None,
        }
    }

    /// Convert to a `serde_json::Value`
    pub fn to_value(&self) -> Value {
        match self {
            RequestParams::Object(map) => Value::Object(map.clone()),
            RequestParams::Array(arr) => Value::Array(arr.clone()),
        }
    }

    /// Build params from a JSON value. Objects and arrays become params;
    /// anything else (including `null`) is treated as absent.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(RequestParams::Object(map)),
            Value::Array(arr) => Some(RequestParams::Array(arr)),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(map: Map<String, Value>) -> Self {
        RequestParams::Object(map)
    }
}

/// A JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Get a named parameter (object params only)
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    /// The `params._meta` object, if present
    pub fn meta(&self) -> Option<&Value> {
        self.get_param("_meta")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(RequestId::Number(1), "tools/list", None);

        let json = serde_json::to_string(&request).unwrap();
        let parsed: JsonRpcRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, RequestId::Number(1));
        assert_eq!(parsed.method, "tools/list");
        assert!(parsed.params.is_none());
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_request_with_object_params() {
        let params = RequestParams::from_value(json!({"name": "echo", "arguments": {"x": 1}}));
        let request = JsonRpcRequest::new(RequestId::String("r1".into()), "tools/call", params);

        assert_eq!(request.get_param("name"), Some(&json!("echo")));
        assert_eq!(request.get_param("missing"), None);
    }

    #[test]
    fn test_params_from_scalar_is_none() {
        assert!(RequestParams::from_value(json!(3)).is_none());
        assert!(RequestParams::from_value(json!(null)).is_none());
    }
}
