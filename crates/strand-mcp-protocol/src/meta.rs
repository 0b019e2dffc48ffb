//! `_meta` injection.
//!
//! Typed request parameters cannot generically gain a `_meta` member, so
//! the engine performs the merge at the JSON layer: decode to a generic
//! map, merge, re-encode. This helper is the only place the
//! decode-mutate-encode pattern lives.

use serde_json::{Map, Value};

use strand_mcp_jsonrpc::RequestId;

/// Merge `{_meta: {progressToken: <id>}}` into request params.
///
/// Every other `_meta` key the caller supplied is preserved; a
/// caller-supplied `progressToken` is overwritten by the engine id. Params
/// that are not an object (positional arrays) are returned unchanged —
/// there is nowhere to attach the token.
pub fn inject_progress_token(params: Option<Value>, token: &RequestId) -> Value {
    let mut map = match params {
        Some(Value::Object(map)) => map,
        Some(other) => return other,
        None => Map::new(),
    };

    let mut meta = match map.remove("_meta") {
        Some(Value::Object(meta)) => meta,
        _ => Map::new(),
    };
    meta.insert(
        "progressToken".to_string(),
        serde_json::to_value(token).unwrap_or(Value::Null),
    );
    map.insert("_meta".to_string(), Value::Object(meta));

    Value::Object(map)
}

/// Extract the progress token from notification or request params
pub fn progress_token(params: &Value) -> Option<RequestId> {
    params
        .get("_meta")
        .and_then(|meta| meta.get("progressToken"))
        .and_then(RequestId::from_value)
}
