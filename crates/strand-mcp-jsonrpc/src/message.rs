//! Incoming message classification.
//!
//! Classification inspects the presence of `method`, `id`, `result`, and
//! `error` rather than relying on untagged deserialization, so that the
//! failure mode is controlled: malformed JSON is a parse error (−32700),
//! while well-formed JSON that is not a JSON-RPC 2.0 message is an invalid
//! request (−32600) carrying the recovered id where one exists.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::JsonRpcError;
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcResponse;
use crate::types::RequestId;
use crate::JSONRPC_VERSION;

/// Any single JSON-RPC 2.0 message
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl JsonRpcMessage {
    /// The message id, when the variant carries one
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Notification(_) => None,
            JsonRpcMessage::Response(r) => Some(&r.id),
            JsonRpcMessage::Error(e) => e.id.as_ref(),
        }
    }

    /// The method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    /// Whether this is a response or error (i.e. a reply, not a call)
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_)
        )
    }

    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(_))
    }

    /// Classify a raw JSON value as a single message.
    pub fn from_value(value: Value) -> Result<Self, JsonRpcError> {
        let obj = match &value {
            Value::Object(map) => map,
            _ => return Err(JsonRpcError::invalid_request(None)),
        };

        // Recover the id up front so validation failures stay correlatable.
        let id = obj.get("id").and_then(RequestId::from_value);

        let version_ok = obj
            .get("jsonrpc")
            .and_then(|v| v.as_str())
            .map(|v| v == JSONRPC_VERSION)
            .unwrap_or(false);
        if !version_ok {
            return Err(JsonRpcError::invalid_request(id));
        }

        let has_method = obj.get("method").map(|m| m.is_string()).unwrap_or(false);
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");

        let invalid = || JsonRpcError::invalid_request(id.clone());

        let classified = match (has_method, has_result, has_error) {
            (true, false, false) => {
                if obj.contains_key("id") {
                    serde_json::from_value::<JsonRpcRequest>(value.clone())
                        .map(JsonRpcMessage::Request)
                } else {
                    serde_json::from_value::<JsonRpcNotification>(value.clone())
                        .map(JsonRpcMessage::Notification)
                }
            }
            (false, true, false) => serde_json::from_value::<JsonRpcResponse>(value.clone())
                .map(JsonRpcMessage::Response),
            (false, false, true) => {
                serde_json::from_value::<JsonRpcError>(value.clone()).map(JsonRpcMessage::Error)
            }
            // Exactly one of result/error; method never carries either.
            _ => return Err(invalid()),
        };

        classified.map_err(|_| invalid())
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// A parsed POST body or framed line: one message or a batch
#[derive(Debug, Clone)]
pub enum ParsedBody {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

impl ParsedBody {
    /// Iterate the contained messages in order
    pub fn messages(&self) -> impl Iterator<Item = &JsonRpcMessage> {
        match self {
            ParsedBody::Single(msg) => std::slice::from_ref(msg).iter(),
            ParsedBody::Batch(msgs) => msgs.iter(),
        }
    }

    /// Whether the body contains at least one request (vs. only
    /// notifications and replies, which need no streamed response)
    pub fn contains_request(&self) -> bool {
        self.messages().any(JsonRpcMessage::is_request)
    }

    /// Whether any contained message calls the given method
    pub fn contains_method(&self, method: &str) -> bool {
        self.messages().any(|m| m.method() == Some(method))
    }
}

/// Parse a request body into classified messages.
///
/// Malformed JSON, an empty body, or a body that is neither an object nor
/// an array of objects is a parse error; structural JSON-RPC violations
/// are invalid requests.
pub fn parse_body(body: &str) -> Result<ParsedBody, JsonRpcError> {
    if body.trim().is_empty() {
        return Err(JsonRpcError::parse_error());
    }

    let value: Value = serde_json::from_str(body).map_err(|_| JsonRpcError::parse_error())?;

    match value {
        Value::Object(_) => JsonRpcMessage::from_value(value).map(ParsedBody::Single),
        Value::Array(items) => {
            if items.is_empty() {
                return Err(JsonRpcError::invalid_request(None));
            }
            if items.iter().any(|item| !item.is_object()) {
                return Err(JsonRpcError::parse_error());
            }
            items
                .into_iter()
                .map(JsonRpcMessage::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(ParsedBody::Batch)
        }
        _ => Err(JsonRpcError::parse_error()),
    }
}
