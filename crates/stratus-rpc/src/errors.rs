//! RPC error taxonomy.

use serde::Serialize;
use serde_json::Value;

use crate::types::RpcErrorBody;

/// Machine-readable error kinds carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller's session is gone (destroyed or expired).
    SessionNotFound,
    /// The caller is not authenticated.
    AuthenticationRequired,
    /// No method registered under the requested name.
    MethodNotFound,
    /// Arguments do not match the method's declared parameters.
    InvalidParams,
    /// The handler failed, panicked or timed out.
    HandlerError,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionNotFound => "SessionNotFound",
            Self::AuthenticationRequired => "AuthenticationRequired",
            Self::MethodNotFound => "MethodNotFound",
            Self::InvalidParams => "InvalidParams",
            Self::HandlerError => "HandlerError",
        }
    }
}

/// Offending argument names of an `InvalidParams` error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParamErrors {
    /// Required parameters that were not supplied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    /// Supplied arguments the method does not declare.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<String>,
    /// Supplied arguments of the wrong type.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mistyped: Vec<String>,
}

impl ParamErrors {
    /// Whether no problem was recorded.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty() && self.mistyped.is_empty()
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing required: {}", self.missing.join(", ")));
        }
        if !self.unknown.is_empty() {
            parts.push(format!("unknown: {}", self.unknown.join(", ")));
        }
        if !self.mistyped.is_empty() {
            parts.push(format!("wrong type: {}", self.mistyped.join(", ")));
        }
        format!("invalid arguments ({})", parts.join("; "))
    }
}

/// Error returned by a call. Every variant maps to one [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The caller's session is gone.
    #[error("session not found")]
    SessionNotFound,

    /// The caller is not authenticated.
    #[error("authentication required")]
    AuthenticationRequired,

    /// No handler for the method.
    #[error("method '{0}' not found")]
    MethodNotFound(String),

    /// Arguments rejected before the handler ran.
    #[error("{message}")]
    InvalidParams {
        /// Human-readable description.
        message: String,
        /// Offending names.
        details: ParamErrors,
    },

    /// Failure reported by (or caught around) the handler.
    #[error("{message}")]
    Handler {
        /// Human-readable description.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },
}

impl RpcError {
    /// An `InvalidParams` error with only a message.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            details: ParamErrors::default(),
        }
    }

    /// An `InvalidParams` error built from the offending names.
    pub fn from_param_errors(details: ParamErrors) -> Self {
        Self::InvalidParams {
            message: details.describe(),
            details,
        }
    }

    /// A generic handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
            details: None,
        }
    }

    /// A handler failure with structured details.
    pub fn handler_with_details(message: impl Into<String>, details: Value) -> Self {
        Self::Handler {
            message: message.into(),
            details: Some(details),
        }
    }

    /// The kind reported on the wire.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::AuthenticationRequired => ErrorKind::AuthenticationRequired,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::Handler { .. } => ErrorKind::HandlerError,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        let details = match self {
            Self::InvalidParams { details, .. } if !details.is_empty() => {
                serde_json::to_value(details).ok()
            }
            Self::Handler { details, .. } => details.clone(),
            _ => None,
        };
        RpcErrorBody {
            kind: self.kind().as_str().to_owned(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<stratus_core::Error> for RpcError {
    fn from(err: stratus_core::Error) -> Self {
        match err {
            stratus_core::Error::SessionNotFound(_) => Self::SessionNotFound,
            stratus_core::Error::AuthenticationRequired => Self::AuthenticationRequired,
            other => Self::handler(other.to_string()),
        }
    }
}

/// Errors raised while populating a method registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A method with this name is already registered.
    #[error("method '{0}' is already registered")]
    DuplicateMethod(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratus_core::{ConnectionId, SessionId};

    #[test]
    fn kinds_match_wire_names() {
        assert_eq!(RpcError::SessionNotFound.kind().as_str(), "SessionNotFound");
        assert_eq!(
            RpcError::MethodNotFound("x".into()).kind().as_str(),
            "MethodNotFound"
        );
        assert_eq!(RpcError::handler("boom").kind().as_str(), "HandlerError");
        assert_eq!(
            RpcError::invalid_params("bad").kind().as_str(),
            "InvalidParams"
        );
    }

    #[test]
    fn invalid_params_body_lists_names() {
        let err = RpcError::from_param_errors(ParamErrors {
            missing: vec!["msg".into()],
            unknown: vec!["extra".into()],
            mistyped: vec![],
        });
        let body = err.to_error_body();
        assert_eq!(body.kind, "InvalidParams");
        assert!(body.message.contains("msg"));
        assert!(body.message.contains("extra"));
        assert_eq!(
            body.details.unwrap(),
            json!({"missing": ["msg"], "unknown": ["extra"]})
        );
    }

    #[test]
    fn invalid_params_without_names_has_no_details() {
        let body = RpcError::invalid_params("args must be an object").to_error_body();
        assert!(body.details.is_none());
    }

    #[test]
    fn handler_details_pass_through() {
        let body = RpcError::handler_with_details("nope", json!({"retry": false})).to_error_body();
        assert_eq!(body.details.unwrap()["retry"], false);
    }

    #[test]
    fn from_core_error() {
        let err: RpcError = stratus_core::Error::SessionNotFound(SessionId::from_raw("s")).into();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);

        let err: RpcError = stratus_core::Error::AuthenticationRequired.into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationRequired);

        let err: RpcError = stratus_core::Error::ConnectionClosed(ConnectionId::from_raw("c")).into();
        assert_eq!(err.kind(), ErrorKind::HandlerError);
    }

    #[test]
    fn duplicate_method_display() {
        let err = RegistryError::DuplicateMethod("echo".into());
        assert_eq!(err.to_string(), "method 'echo' is already registered");
    }
}
