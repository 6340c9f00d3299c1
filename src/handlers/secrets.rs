//! `secrets.*` namespace: key/value credential storage.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{require_object, require_str, HandlerContext, RequestHandler};
use crate::error::{HostError, HostResult};
use crate::store::{shared_namespace, user_namespace, SecretStore};

pub struct SecretsHandler {
    secrets: Arc<SecretStore>,
}

impl SecretsHandler {
    pub fn new(secrets: Arc<SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl RequestHandler for SecretsHandler {
    fn methods(&self) -> &'static [&'static str] {
        &[
            "secrets.set",
            "secrets.setForUser",
            "secrets.get",
            "secrets.getForUser",
            "secrets.delete",
            "secrets.deleteForUser",
            "secrets.list",
            "secrets.listForUser",
        ]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let op = method
            .strip_prefix("secrets.")
            .ok_or_else(|| HostError::UnknownMethod(method.to_string()))?;

        let obj = require_object(&payload)?;
        let (op, namespace) = match op.strip_suffix("ForUser") {
            Some(base) => {
                let user_id = require_str(obj, "userId")?;
                (base, user_namespace(&ctx.extension_id, user_id))
            }
            None => (op, shared_namespace(&ctx.extension_id)),
        };

        ctx.extension.permissions.check_secrets()?;

        match op {
            "set" => {
                let key = require_str(obj, "key")?;
                let value = require_str(obj, "value")?;
                self.secrets.set(&namespace, key, value.to_string())?;
                Ok(Value::Null)
            }
            "get" => {
                let key = require_str(obj, "key")?;
                let value = self.secrets.get(&namespace, key)?;
                Ok(value.map(Value::String).unwrap_or(Value::Null))
            }
            "delete" => {
                let key = require_str(obj, "key")?;
                let deleted = self.secrets.delete(&namespace, key)?;
                Ok(json!({"deleted": deleted}))
            }
            "list" => {
                let keys = self.secrets.list(&namespace)?;
                Ok(json!(keys))
            }
            _ => Err(HostError::UnknownMethod(method.to_string())),
        }
    }
}
