//! # stratus-rpc
//!
//! Request/response layer on top of a session-bound connection.
//!
//! Methods are registered with a declared parameter list. Every call is
//! checked against that list before the handler runs, so handlers only ever
//! see validated, defaulted arguments.

#![deny(unsafe_code)]

pub mod context;
pub mod envelope;
pub mod errors;
pub mod params;
pub mod registry;
pub mod types;

pub use context::CallContext;
pub use envelope::{Inbound, classify, classify_value};
pub use errors::{ErrorKind, ParamErrors, RegistryError, RpcError};
pub use params::{Args, ParamKind, ParamSpec};
pub use registry::{MethodHandler, MethodRegistry, from_fn};
pub use types::{RequestId, RpcCall, RpcErrorBody, RpcResponse};
