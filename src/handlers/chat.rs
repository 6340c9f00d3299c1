//! `chat.*` namespace: additions to the assistant conversation.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{require_object, require_str, HandlerContext, RequestHandler};
use crate::callbacks::ChatCallbacks;
use crate::error::{HostError, HostResult};

pub struct ChatHandler {
    chat: Arc<dyn ChatCallbacks>,
}

impl ChatHandler {
    pub fn new(chat: Arc<dyn ChatCallbacks>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl RequestHandler for ChatHandler {
    fn methods(&self) -> &'static [&'static str] {
        &["chat.append-instruction"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        if method != "chat.append-instruction" {
            return Err(HostError::UnknownMethod(method.to_string()));
        }

        let obj = require_object(&payload)?;
        let text = require_str(obj, "text")?;

        ctx.extension.permissions.check_chat_write()?;

        self.chat
            .append_instruction(&ctx.extension_id, text)
            .await
            .map_err(HostError::callback)?;
        Ok(Value::Null)
    }
}
