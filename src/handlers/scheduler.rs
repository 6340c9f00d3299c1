//! `scheduler.*` namespace: job registration against the external scheduler.
//!
//! The handler always passes the caller's own extension id to the scheduler
//! callback, so an extension cannot register or cancel jobs for another.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::{require_object, require_str, HandlerContext, RequestHandler};
use crate::callbacks::SchedulerCallbacks;
use crate::error::{HostError, HostResult};

pub struct SchedulerHandler {
    scheduler: Arc<dyn SchedulerCallbacks>,
}

impl SchedulerHandler {
    pub fn new(scheduler: Arc<dyn SchedulerCallbacks>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl RequestHandler for SchedulerHandler {
    fn methods(&self) -> &'static [&'static str] {
        &["scheduler.register", "scheduler.cancel"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let obj = require_object(&payload)?;
        let job_id = require_str(obj, "jobId")?;

        ctx.extension.permissions.check_scheduler()?;

        match method {
            "scheduler.register" => {
                let schedule = obj
                    .get("schedule")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| {
                        HostError::PayloadInvalid("Field 'schedule' is required".into())
                    })?;
                debug!(extension_id = %ctx.extension_id, job_id, "registering scheduled job");
                self.scheduler
                    .schedule(&ctx.extension_id, job_id, schedule)
                    .await
                    .map_err(HostError::callback)?;
                Ok(json!({"jobId": job_id}))
            }
            "scheduler.cancel" => {
                self.scheduler
                    .cancel(&ctx.extension_id, job_id)
                    .await
                    .map_err(HostError::callback)?;
                Ok(Value::Null)
            }
            other => Err(HostError::UnknownMethod(other.to_string())),
        }
    }
}
