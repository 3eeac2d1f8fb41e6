//! Classify inbound text as an RPC call or a plain application message.

use serde_json::Value;

use crate::types::{RequestId, RpcCall};

/// What an inbound payload turned out to be.
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed call.
    Call(RpcCall),
    /// Looks like a call (has `method` and `id`) but the envelope is broken.
    Malformed {
        /// The id the caller sent, so the error can be correlated.
        id: RequestId,
        /// What is wrong.
        message: String,
    },
    /// Not an RPC call; goes to the application's message callback.
    Plain,
}

/// Classify a text payload.
///
/// A payload is a call iff it is a JSON object with a string `method` and a
/// string or number `id`. Everything else is plain.
pub fn classify(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound::Plain;
    };
    classify_value(value)
}

/// Classify an already-parsed JSON value.
pub fn classify_value(value: Value) -> Inbound {
    let Some(obj) = value.as_object() else {
        return Inbound::Plain;
    };
    if !obj.get("method").is_some_and(Value::is_string) {
        return Inbound::Plain;
    }
    let Some(id) = obj.get("id").and_then(RequestId::from_value) else {
        return Inbound::Plain;
    };
    match serde_json::from_value::<RpcCall>(value) {
        Ok(call) => Inbound::Call(call),
        Err(e) => Inbound::Malformed {
            id,
            message: format!("malformed call: {e}"),
        },
    }
}
