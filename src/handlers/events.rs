//! `events.*` namespace: extension-emitted events forwarded to the platform.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{require_object, require_str, HandlerContext, RequestHandler};
use crate::callbacks::EmitEventCallback;
use crate::error::{HostError, HostResult};

pub struct EventsHandler {
    events: Arc<dyn EmitEventCallback>,
}

impl EventsHandler {
    pub fn new(events: Arc<dyn EmitEventCallback>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl RequestHandler for EventsHandler {
    fn methods(&self) -> &'static [&'static str] {
        &["events.emit"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        if method != "events.emit" {
            return Err(HostError::UnknownMethod(method.to_string()));
        }

        let obj = require_object(&payload)?;
        let name = require_str(obj, "name")?;
        let event_payload = match obj.get("payload") {
            None | Some(Value::Null) => None,
            Some(Value::Object(_)) => obj.get("payload").cloned(),
            Some(_) => {
                return Err(HostError::PayloadInvalid(
                    "Event payload must be an object".to_string(),
                ))
            }
        };

        ctx.extension.permissions.check_events()?;

        debug!(extension_id = %ctx.extension_id, event = name, "forwarding extension event");
        self.events.emit(&ctx.extension_id, name, event_payload);
        Ok(Value::Null)
    }
}
