//! Declared method parameters and argument validation.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::{ParamErrors, RpcError};

/// Expected JSON type of a parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParamKind {
    /// Any JSON value.
    #[default]
    Any,
    /// JSON string.
    String,
    /// Integer. A float with no fractional part is accepted and converted.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Bool,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ParamKind {
    /// Check `value` against this kind, converting where allowed.
    fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (Self::Any, v) => Some(v),
            (Self::String, v @ Value::String(_))
            | (Self::Number, v @ Value::Number(_))
            | (Self::Bool, v @ Value::Bool(_))
            | (Self::Array, v @ Value::Array(_))
            | (Self::Object, v @ Value::Object(_)) => Some(v),
            (Self::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    return Some(Value::Number(n));
                }
                let f = n.as_f64()?;
                #[allow(clippy::cast_possible_truncation)]
                let as_int = f as i64;
                #[allow(clippy::cast_precision_loss)]
                let exact = f.fract() == 0.0 && (as_int as f64) == f;
                exact.then(|| Value::from(as_int))
            }
            _ => None,
        }
    }
}

/// One declared parameter of a method.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
    default: Option<Value>,
}

impl ParamSpec {
    /// A parameter that must be supplied.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Any,
            default: None,
        }
    }

    /// A parameter that falls back to `default` when omitted.
    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Any,
            default: Some(default.into()),
        }
    }

    /// Restrict the parameter to a JSON kind.
    #[must_use]
    pub fn of(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind.
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Whether the parameter has a default.
    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// Check `args` against `specs`, filling in defaults.
///
/// `null` stands for an empty argument object. Any other non-object is
/// rejected outright. Otherwise every problem is collected before failing,
/// so the caller sees all offending names at once.
pub fn validate(specs: &[ParamSpec], args: Value) -> Result<Args, RpcError> {
    let mut supplied = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        _ => return Err(RpcError::invalid_params("args must be an object")),
    };

    let mut errors = ParamErrors::default();
    errors.unknown = supplied
        .keys()
        .filter(|k| !specs.iter().any(|s| s.name == **k))
        .cloned()
        .collect();

    let mut resolved = Map::new();
    for spec in specs {
        match supplied.remove(&spec.name) {
            Some(Value::Null) if spec.default.is_some() => {
                let _ = resolved.insert(spec.name.clone(), spec.default.clone().unwrap_or_default());
            }
            Some(value) => match spec.kind.coerce(value) {
                Some(v) => {
                    let _ = resolved.insert(spec.name.clone(), v);
                }
                None => errors.mistyped.push(spec.name.clone()),
            },
            None => match &spec.default {
                Some(default) => {
                    let _ = resolved.insert(spec.name.clone(), default.clone());
                }
                None => errors.missing.push(spec.name.clone()),
            },
        }
    }

    if errors.is_empty() {
        Ok(Args(resolved))
    } else {
        Err(RpcError::from_param_errors(errors))
    }
}

/// Validated arguments handed to a handler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    /// Raw value of an argument.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String argument.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Integer argument.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    /// Numeric argument.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    /// Boolean argument.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    /// Deserialize an argument into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, RpcError> {
        let value = self
            .0
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::invalid_params(format!("missing '{name}'")))?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::invalid_params(format!("invalid '{name}': {e}")))
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The arguments as a JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
