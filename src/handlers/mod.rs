//! Per-namespace request handlers.
//!
//! Every method an extension can invoke on the host belongs to exactly one
//! handler; the router maps method namespaces to handlers once at host
//! construction. Handlers validate payloads, consult the caller's
//! [`PermissionChecker`](crate::permissions::PermissionChecker), and carry
//! out the operation. A payload shape problem is always reported before any
//! side effect.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{HostError, HostResult};
use crate::host::LoadedExtension;

pub mod chat;
pub mod events;
pub mod network;
pub mod registry;
pub mod scheduler;
pub mod secrets;
pub mod storage;
pub mod user;

pub use chat::ChatHandler;
pub use events::EventsHandler;
pub use network::NetworkHandler;
pub use registry::RegistrationHandler;
pub use scheduler::SchedulerHandler;
pub use secrets::SecretsHandler;
pub use storage::StorageHandler;
pub use user::UserHandler;

/// Identity of the calling extension for the duration of one request.
#[derive(Clone)]
pub struct HandlerContext {
    pub extension_id: String,
    pub extension: Arc<LoadedExtension>,
}

impl HandlerContext {
    pub fn new(extension: Arc<LoadedExtension>) -> Self {
        Self {
            extension_id: extension.id.clone(),
            extension,
        }
    }
}

/// One namespace of the host's RPC surface.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// The full method names this handler serves.
    fn methods(&self) -> &'static [&'static str];

    async fn handle(&self, ctx: &HandlerContext, method: &str, payload: Value)
        -> HostResult<Value>;
}

fn invalid(message: impl Into<String>) -> HostError {
    HostError::PayloadInvalid(message.into())
}

/// Payload must be a JSON object; returns its map.
pub(crate) fn require_object(payload: &Value) -> HostResult<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| invalid("Request payload must be an object"))
}

/// A required, non-empty string field.
pub(crate) fn require_str<'a>(obj: &'a Map<String, Value>, field: &str) -> HostResult<&'a str> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        Some(_) => Err(invalid(format!("Field '{field}' must not be empty"))),
        None => Err(invalid(format!("Field '{field}' must be a string"))),
    }
}

/// An optional string field; present but non-string is an error.
pub(crate) fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> HostResult<Option<&'a str>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(format!("Field '{field}' must be a string"))),
    }
}

/// A required array field.
pub(crate) fn require_array<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> HostResult<&'a Vec<Value>> {
    obj.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("Field '{field}' must be an array")))
}

/// An optional object field; present but non-object is an error.
pub(crate) fn optional_object<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
) -> HostResult<Option<&'a Map<String, Value>>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(invalid(format!("Field '{field}' must be an object"))),
    }
}
