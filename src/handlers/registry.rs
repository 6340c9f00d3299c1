//! Runtime registration of providers, tools, and actions.
//!
//! One handler claims all three namespaces. Records land in the calling
//! extension's own maps, so an extension can never register into (or shadow)
//! another extension's entries.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{require_object, require_str, HandlerContext, RequestHandler};
use crate::error::{HostError, HostResult};
use crate::host::{ActionInfo, ProviderInfo, ToolInfo};
use crate::manifest::LocalizedString;

pub struct RegistrationHandler;

fn localized(obj: &Map<String, Value>, field: &str) -> HostResult<LocalizedString> {
    let value = obj.get(field).ok_or_else(|| {
        HostError::PayloadInvalid(format!("Field '{field}' is required"))
    })?;
    serde_json::from_value(value.clone()).map_err(|_| {
        HostError::PayloadInvalid(format!(
            "Field '{field}' must be a string or a locale map"
        ))
    })
}

#[async_trait]
impl RequestHandler for RegistrationHandler {
    fn methods(&self) -> &'static [&'static str] {
        &["provider.register", "tools.register", "actions.register"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let obj = require_object(&payload)?;
        let id = require_str(obj, "id")?;

        match method {
            "provider.register" => {
                ctx.extension.permissions.check_provider_register()?;
                let record = ProviderInfo {
                    id: id.to_string(),
                    extension_id: ctx.extension_id.clone(),
                    name: localized(obj, "name")?,
                    config_schema: obj.get("configSchema").cloned(),
                };
                let mut providers = ctx.extension.registered_providers.lock().unwrap();
                if providers.contains_key(id) {
                    return Err(HostError::PayloadInvalid(format!(
                        "Provider '{id}' is already registered"
                    )));
                }
                info!(extension_id = %ctx.extension_id, provider_id = id, "provider registered");
                providers.insert(id.to_string(), record);
            }
            "tools.register" => {
                ctx.extension.permissions.check_tools_register()?;
                let record = ToolInfo {
                    id: id.to_string(),
                    extension_id: ctx.extension_id.clone(),
                    name: localized(obj, "name")?,
                    description: localized(obj, "description")?,
                };
                let mut tools = ctx.extension.registered_tools.lock().unwrap();
                if tools.contains_key(id) {
                    return Err(HostError::PayloadInvalid(format!(
                        "Tool '{id}' is already registered"
                    )));
                }
                info!(extension_id = %ctx.extension_id, tool_id = id, "tool registered");
                tools.insert(id.to_string(), record);
            }
            "actions.register" => {
                ctx.extension.permissions.check_actions_register()?;
                let record = ActionInfo {
                    id: id.to_string(),
                    extension_id: ctx.extension_id.clone(),
                    title: localized(obj, "title")?,
                };
                let mut actions = ctx.extension.registered_actions.lock().unwrap();
                if actions.contains_key(id) {
                    return Err(HostError::PayloadInvalid(format!(
                        "Action '{id}' is already registered"
                    )));
                }
                info!(extension_id = %ctx.extension_id, action_id = id, "action registered");
                actions.insert(id.to_string(), record);
            }
            other => return Err(HostError::UnknownMethod(other.to_string())),
        }

        Ok(json!({"id": id}))
    }
}
