//! `user.*` namespace: read-only user directory access.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{require_object, require_str, HandlerContext, RequestHandler};
use crate::callbacks::UserCallbacks;
use crate::error::{HostError, HostResult};

pub struct UserHandler {
    users: Arc<dyn UserCallbacks>,
}

impl UserHandler {
    pub fn new(users: Arc<dyn UserCallbacks>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl RequestHandler for UserHandler {
    fn methods(&self) -> &'static [&'static str] {
        &["user.get-profile", "user.list-ids"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        ctx.extension.permissions.check_user_read()?;

        match method {
            "user.get-profile" => {
                let obj = require_object(&payload)?;
                let user_id = require_str(obj, "userId")?;
                let profile = self
                    .users
                    .get_profile(user_id)
                    .await
                    .map_err(HostError::callback)?;
                match profile {
                    Some(profile) => Ok(serde_json::to_value(profile)?),
                    None => Ok(Value::Null),
                }
            }
            "user.list-ids" => {
                let ids = self.users.list_ids().await.map_err(HostError::callback)?;
                Ok(json!(ids))
            }
            other => Err(HostError::UnknownMethod(other.to_string())),
        }
    }
}
