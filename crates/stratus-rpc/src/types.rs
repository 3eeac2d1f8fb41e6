//! RPC wire-format types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;

/// Caller-supplied request identifier, echoed back verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String id (`"1"`).
    String(String),
    /// Numeric id (`1`).
    Number(serde_json::Number),
    /// No usable id; only produced for responses to unparseable bodies.
    Null,
}

impl RequestId {
    /// Read an id out of a raw JSON value. Only strings and numbers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Incoming call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcCall {
    /// Request identifier.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Argument object. `null` or absent means no arguments.
    #[serde(default, alias = "params")]
    pub args: Value,
}

impl RpcCall {
    /// Build a call.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            args,
        }
    }
}

/// Outgoing response: exactly one of `result` or `error` is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request identifier.
    pub id: RequestId,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Structured error body inside an [`RpcResponse`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Error kind name (e.g. `MethodNotFound`).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure response from an error.
    pub fn failure(id: RequestId, error: &RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.to_error_body()),
        }
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Error kind name, if this is a failure.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }

    /// Serialize to a JSON text frame.
    pub fn to_json_string(&self) -> String {
        serde_json::to_value(self).map_or_else(|_| String::from("{}"), |v| v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_with_args() {
        let call: RpcCall =
            serde_json::from_value(json!({"id": "1", "method": "echo", "args": {"msg": "hi"}}))
                .unwrap();
        assert_eq!(call.id, RequestId::from("1"));
        assert_eq!(call.method, "echo");
        assert_eq!(call.args["msg"], "hi");
    }

    #[test]
    fn call_params_alias() {
        let call: RpcCall =
            serde_json::from_value(json!({"id": 7, "method": "echo", "params": {"msg": "hi"}}))
                .unwrap();
        assert_eq!(call.id, RequestId::from(7));
        assert_eq!(call.args["msg"], "hi");
    }

    #[test]
    fn call_without_args_is_null() {
        let call: RpcCall = serde_json::from_value(json!({"id": "1", "method": "ping"})).unwrap();
        assert!(call.args.is_null());
    }

    #[test]
    fn success_serializes_without_error() {
        let resp = RpcResponse::success("1".into(), json!("hi"));
        let v: Value = serde_json::from_str(&resp.to_json_string()).unwrap();
        assert_eq!(v, json!({"id": "1", "result": "hi"}));
    }

    #[test]
    fn null_result_is_kept() {
        let resp = RpcResponse::success(RequestId::from(3), Value::Null);
        let v: Value = serde_json::from_str(&resp.to_json_string()).unwrap();
        assert_eq!(v, json!({"id": 3, "result": null}));
    }

    #[test]
    fn failure_serializes_kind() {
        let resp = RpcResponse::failure("2".into(), &RpcError::MethodNotFound("missing".into()));
        let v: Value = serde_json::from_str(&resp.to_json_string()).unwrap();
        assert_eq!(v["id"], "2");
        assert_eq!(v["error"]["kind"], "MethodNotFound");
        assert!(v.get("result").is_none());
        assert!(v["error"].get("details").is_none());
        assert_eq!(resp.error_kind(), Some("MethodNotFound"));
    }

    #[test]
    fn null_id_serializes_as_null() {
        let resp = RpcResponse::failure(RequestId::Null, &RpcError::invalid_params("bad"));
        let v: Value = serde_json::from_str(&resp.to_json_string()).unwrap();
        assert!(v["id"].is_null());
    }

    #[test]
    fn request_id_from_value() {
        assert_eq!(RequestId::from_value(&json!("a")), Some("a".into()));
        assert_eq!(RequestId::from_value(&json!(5)), Some(5.into()));
        assert_eq!(RequestId::from_value(&json!(null)), None);
        assert_eq!(RequestId::from_value(&json!([1])), None);
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::from("abc").to_string(), "abc");
        assert_eq!(RequestId::from(42).to_string(), "42");
    }
}
