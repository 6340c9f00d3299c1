//! Injected platform callbacks.
//!
//! The host stays platform-neutral: every outward effect (network, event
//! emission, scheduling, chat, user lookup) goes through one of these traits,
//! injected at construction. Tests substitute fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::streaming::StreamEvent;

/// HTTP request forwarded on behalf of an extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: FetchMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// HTTP method for fetch requests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

/// Flattened response returned to the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Network effects.
#[async_trait]
pub trait NetworkCallbacks: Send + Sync {
    /// Perform a request/response fetch.
    async fn fetch(&self, extension_id: &str, request: FetchRequest)
        -> anyhow::Result<FetchResponse>;

    /// Start a streaming fetch; the returned stream's events are pumped into
    /// the per-request buffer out-of-band.
    async fn fetch_stream(
        &self,
        extension_id: &str,
        request: FetchRequest,
    ) -> anyhow::Result<BoxStream<'static, StreamEvent>>;
}

/// Fire-and-forget event emission into the application.
pub trait EmitEventCallback: Send + Sync {
    fn emit(&self, extension_id: &str, name: &str, payload: Option<Value>);
}

/// Outcome of a host-initiated scheduled-job fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { message: String },
}

/// External scheduler. The host only forwards registrations and reports
/// results; timer and cron logic live behind this seam.
#[async_trait]
pub trait SchedulerCallbacks: Send + Sync {
    async fn schedule(
        &self,
        extension_id: &str,
        job_id: &str,
        schedule: Value,
    ) -> anyhow::Result<()>;

    async fn cancel(&self, extension_id: &str, job_id: &str) -> anyhow::Result<()>;

    async fn update_job_result(&self, extension_id: &str, job_id: &str, outcome: JobOutcome);
}

/// Chat surface.
#[async_trait]
pub trait ChatCallbacks: Send + Sync {
    async fn append_instruction(&self, extension_id: &str, text: &str) -> anyhow::Result<()>;
}

/// A user profile visible to extensions holding `user.profile.read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

/// User directory.
#[async_trait]
pub trait UserCallbacks: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>>;
    async fn list_ids(&self) -> anyhow::Result<Vec<String>>;
}

/// Bundle of all injected callbacks, passed to the host at construction.
#[derive(Clone)]
pub struct PlatformCallbacks {
    pub network: Arc<dyn NetworkCallbacks>,
    pub events: Arc<dyn EmitEventCallback>,
    pub scheduler: Arc<dyn SchedulerCallbacks>,
    pub chat: Arc<dyn ChatCallbacks>,
    pub users: Arc<dyn UserCallbacks>,
}
