//! The RPC seam: allow-listed method names and the transport trait.
//!
//! # Design
//! The facade only ever calls the methods listed in `RpcMethod`, each with a
//! typed argument list. `Shotgun::invoke` is the one place where an
//! arbitrary method name can be forwarded, for server methods this client
//! does not know about yet.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Credentials sent as the first positional argument of every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Auth {
    pub script_name: String,
    pub script_key: String,
}

/// Methods the typed facade is allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    Read,
    Create,
    Update,
    Delete,
    Batch,
    SchemaRead,
    SchemaEntityRead,
    SchemaFieldRead,
    SchemaFieldCreate,
    SchemaFieldUpdate,
    SchemaFieldDelete,
    /// Legacy endpoint only: exchanges script credentials for a session id.
    GetSessionToken,
}

impl RpcMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::Read => "read",
            RpcMethod::Create => "create",
            RpcMethod::Update => "update",
            RpcMethod::Delete => "delete",
            RpcMethod::Batch => "batch",
            RpcMethod::SchemaRead => "schema_read",
            RpcMethod::SchemaEntityRead => "schema_entity_read",
            RpcMethod::SchemaFieldRead => "schema_field_read",
            RpcMethod::SchemaFieldCreate => "schema_field_create",
            RpcMethod::SchemaFieldUpdate => "schema_field_update",
            RpcMethod::SchemaFieldDelete => "schema_field_delete",
            RpcMethod::GetSessionToken => "getSessionToken",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The server processed the call and answered with a fault.
    Fault { code: i64, message: String },
    /// No usable answer was received.
    Transport(String),
}

/// Performs one remote call against a fixed endpoint.
///
/// `params` are the positional arguments, already including the auth
/// argument where the method needs one. The returned value is the decoded
/// response document.
pub trait RpcTransport: Send + Sync {
    fn call(&self, method: &str, params: &[Value]) -> Result<Value, RpcError>;

    /// Endpoint URL, used in error messages.
    fn endpoint(&self) -> &str;
}
