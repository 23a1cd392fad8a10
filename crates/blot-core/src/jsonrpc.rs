//! JSONRPC 2.0 envelope types and error codes.
//!
//! The same envelopes travel over every transport: one JSON object per
//! WebSocket text frame, or one per `Content-Length` frame on stdio.

use serde_json::{json, Map, Value};

/// Malformed JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Missing `jsonrpc`/`method`, wrong envelope shape.
pub const INVALID_REQUEST: i64 = -32600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Missing or rejected parameters, stale tokens, unknown files.
pub const INVALID_PARAMS: i64 = -32602;
/// Unexpected failures, including compiler failures (which carry data).
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSONRPC error ready to be attached to a response.
#[derive(Debug, Clone)]
pub struct RpcError {
    /// Wire error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    pub data: Option<Value>,
}

impl RpcError {
    /// An `INVALID_PARAMS` error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
            data: None,
        }
    }

    /// An `INTERNAL_ERROR` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }

    /// A `METHOD_NOT_FOUND` error naming the method.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    /// Attaches structured detail.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A parsed incoming message: request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Request id; absent for notifications.
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Params object or array, if any.
    pub params: Option<Value>,
}

/// Why an incoming message could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The payload was not valid JSON.
    Parse,
    /// The payload was JSON but not a JSONRPC 2.0 request.
    Invalid {
        /// The id, if one could be salvaged.
        id: Option<Value>,
    },
}

/// Parses one raw frame into a [`Request`].
///
/// # Errors
///
/// [`FrameError::Parse`] on malformed JSON, [`FrameError::Invalid`] on a
/// well-formed payload with the wrong shape (the salvaged id, when
/// present, lets the caller address the error response).
pub fn parse_request(raw: &str) -> Result<Request, FrameError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| FrameError::Parse)?;

    let Some(object) = value.as_object() else {
        return Err(FrameError::Invalid { id: None });
    };
    let id = object.get("id").cloned();

    let version_ok = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .is_some_and(|v| v == "2.0");
    let method = object.get("method").and_then(Value::as_str);
    match (version_ok, method) {
        (true, Some(method)) => Ok(Request {
            id,
            method: method.to_owned(),
            params: object.get("params").cloned(),
        }),
        _ => Err(FrameError::Invalid { id }),
    }
}

/// Builds a success response for `id`.
pub fn make_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Builds an error response for `id` (use `Value::Null` when no id could
/// be read from the request).
pub fn make_error(id: &Value, error: &RpcError) -> Value {
    let mut body = Map::new();
    body.insert(String::from("code"), json!(error.code));
    body.insert(String::from("message"), json!(error.message));
    if let Some(data) = &error.data {
        body.insert(String::from("data"), data.clone());
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": Value::Object(body),
    })
}

/// Builds a server-originated notification.
pub fn make_notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn parses_request_with_params() {
        let request = parse_request(
            r#"{"jsonrpc":"2.0","id":7,"method":"blot/infer","params":{"file":"a.cpp"}}"#,
        )
        .expect("parse");

        assert_eq!(request.id, Some(json!(7)));
        assert_eq!(request.method, "blot/infer");
        assert_eq!(request.params, Some(json!({"file": "a.cpp"})));
    }

    #[rstest]
    fn parses_notification_without_id() {
        let request = parse_request(r#"{"jsonrpc":"2.0","method":"exit"}"#).expect("parse");
        assert!(request.id.is_none());
    }

    #[rstest]
    fn rejects_malformed_json() {
        assert_eq!(parse_request("not json"), Err(FrameError::Parse));
    }

    #[rstest]
    fn rejects_missing_version() {
        let result = parse_request(r#"{"id":1,"method":"initialize"}"#);
        assert_eq!(result, Err(FrameError::Invalid { id: Some(json!(1)) }));
    }

    #[rstest]
    fn rejects_missing_method_but_salvages_id() {
        let result = parse_request(r#"{"jsonrpc":"2.0","id":3}"#);
        assert_eq!(result, Err(FrameError::Invalid { id: Some(json!(3)) }));
    }

    #[rstest]
    fn error_response_carries_data() {
        let error = RpcError::internal("compiler exploded")
            .with_data(json!({"stderr": ["boom"]}));
        let response = make_error(&json!(5), &error);

        assert_eq!(response["error"]["code"], json!(INTERNAL_ERROR));
        assert_eq!(response["error"]["data"]["stderr"], json!(["boom"]));
    }

    #[rstest]
    fn result_response_echoes_id() {
        let response = make_result(&json!("abc"), json!({"ok": true}));
        assert_eq!(response["id"], json!("abc"));
        assert_eq!(response["result"]["ok"], json!(true));
    }
}
