use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC request identifier.
///
/// Serializes as a JSON string or number and preserves the original form
/// on the way back out; a sender must not reuse an in-flight id within a
/// session (enforced by [`crate::pending::PendingRequests`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// Recover an id from a raw JSON value, if it has a legal shape.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(RequestId::String(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(RequestId::Number),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// The `jsonrpc` protocol marker. Only `"2.0"` is valid; anything else is
/// rejected at deserialization time, which the classifier downgrades to an
/// invalid-request error rather than a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JsonRpcVersion {
    #[default]
    #[serde(rename = "2.0")]
    V2_0,
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &'static str {
        "2.0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_roundtrip() {
        let string_id: RequestId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(string_id, RequestId::String("abc".to_string()));
        assert_eq!(serde_json::to_value(&string_id).unwrap(), json!("abc"));

        let number_id: RequestId = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(number_id, RequestId::Number(42));
        assert_eq!(serde_json::to_value(&number_id).unwrap(), json!(42));
    }

    #[test]
    fn test_request_id_from_value() {
        assert_eq!(
            RequestId::from_value(&json!("x")),
            Some(RequestId::String("x".to_string()))
        );
        assert_eq!(RequestId::from_value(&json!(7)), Some(RequestId::Number(7)));
        assert_eq!(RequestId::from_value(&json!(null)), None);
        assert_eq!(RequestId::from_value(&json!({})), None);
    }

    #[test]
    fn test_version_rejects_other_strings() {
        assert!(serde_json::from_value::<JsonRpcVersion>(json!("2.0")).is_ok());
        assert!(serde_json::from_value::<JsonRpcVersion>(json!("1.0")).is_err());
    }
}
