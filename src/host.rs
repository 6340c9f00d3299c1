//! The extension host.
//!
//! Owns the extension lifecycle (load, activate, disable, unload), routes
//! inbound RPC requests to their namespace handlers, and makes
//! host-initiated calls back into extensions (scheduler fires, tool and
//! action invocations). Lifecycle and background-task transitions are
//! published on a broadcast bus the embedding application can subscribe to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use semver::{Version, VersionReq};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::background::{BackgroundTaskSupervisor, RestartPolicy};
use crate::callbacks::{JobOutcome, PlatformCallbacks};
use crate::error::{HostError, HostResult};
use crate::handlers::{
    ChatHandler, EventsHandler, HandlerContext, NetworkHandler, RegistrationHandler,
    RequestHandler, SchedulerHandler, SecretsHandler, StorageHandler, UserHandler,
};
use crate::manifest::{validate_manifest, ExtensionManifest, LocalizedString};
use crate::permissions::PermissionChecker;
use crate::rpc::{ExtensionChannel, ExtensionRpc};
use crate::store::{DocumentStore, SecretStore};
use crate::streaming::StreamingRequestManager;

/// Lifecycle state of one extension.
///
/// `loading → active | error`; `active ⇄ disabled`; any state `→ unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionStatus {
    Loading,
    Active,
    Disabled,
    Error,
    Unloaded,
}

impl ExtensionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionStatus::Loading => "loading",
            ExtensionStatus::Active => "active",
            ExtensionStatus::Disabled => "disabled",
            ExtensionStatus::Error => "error",
            ExtensionStatus::Unloaded => "unloaded",
        }
    }
}

/// Snapshot of an extension's state, safe to hand out.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub id: String,
    pub status: ExtensionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub manifest: Option<ExtensionManifest>,
}

/// A provider registered at runtime by an extension.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub extension_id: String,
    pub name: LocalizedString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
}

/// A tool registered at runtime by an extension.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub id: String,
    pub extension_id: String,
    pub name: LocalizedString,
    pub description: LocalizedString,
}

/// An action registered at runtime by an extension.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    pub id: String,
    pub extension_id: String,
    pub title: LocalizedString,
}

/// Runtime state of an active extension.
///
/// The permission checker is derived once from the validated manifest and
/// never changes; widening permissions requires a full reload. Registration
/// maps are only ever mutated by handlers acting on behalf of this same
/// extension.
pub struct LoadedExtension {
    pub id: String,
    pub manifest: ExtensionManifest,
    pub permissions: PermissionChecker,
    pub settings: HashMap<String, Value>,
    pub registered_providers: Mutex<HashMap<String, ProviderInfo>>,
    pub registered_tools: Mutex<HashMap<String, ToolInfo>>,
    pub registered_actions: Mutex<HashMap<String, ActionInfo>>,
}

impl LoadedExtension {
    pub fn new(manifest: ExtensionManifest, settings: HashMap<String, Value>) -> Self {
        let permissions = PermissionChecker::new(manifest.id.clone(), &manifest.permissions);
        Self {
            id: manifest.id.clone(),
            manifest,
            permissions,
            settings,
            registered_providers: Mutex::new(HashMap::new()),
            registered_tools: Mutex::new(HashMap::new()),
            registered_actions: Mutex::new(HashMap::new()),
        }
    }
}

/// Events published on the host's broadcast bus.
#[derive(Debug, Clone)]
pub enum HostEvent {
    ExtensionLoaded {
        extension_id: String,
    },
    ExtensionFailed {
        extension_id: String,
        message: String,
    },
    ExtensionDisabled {
        extension_id: String,
    },
    ExtensionEnabled {
        extension_id: String,
    },
    ExtensionUnloaded {
        extension_id: String,
    },
    BackgroundTaskRestarting {
        extension_id: String,
        task_id: String,
        restart_count: u32,
        delay_ms: u64,
    },
    BackgroundTaskExhausted {
        extension_id: String,
        task_id: String,
    },
}

/// Host construction parameters.
#[derive(Debug, Clone)]
pub struct ExtensionHostConfig {
    /// Root directory for the document and secret stores.
    pub data_dir: PathBuf,
    /// Application version checked against each manifest's `engines.app`.
    pub app_version: Version,
    /// Timeout for host→extension calls.
    pub request_timeout: Duration,
    pub restart_policy: RestartPolicy,
    /// Locale used when resolving localized display text.
    pub preferred_locale: String,
}

impl Default for ExtensionHostConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("meridian")
            .join("extensions");
        let app_version =
            Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 1, 0));
        Self {
            data_dir,
            app_version,
            request_timeout: Duration::from_secs(30),
            restart_policy: RestartPolicy::default(),
            preferred_locale: "en".to_string(),
        }
    }
}

struct ExtensionRecord {
    manifest: Option<ExtensionManifest>,
    status: ExtensionStatus,
    error: Option<String>,
    loaded: Option<Arc<LoadedExtension>>,
}

pub struct ExtensionHost {
    config: ExtensionHostConfig,
    extensions: RwLock<HashMap<String, ExtensionRecord>>,
    routes: HashMap<&'static str, Arc<dyn RequestHandler>>,
    rpc: ExtensionRpc,
    streams: StreamingRequestManager,
    supervisor: BackgroundTaskSupervisor,
    events: broadcast::Sender<HostEvent>,
    callbacks: PlatformCallbacks,
}

impl ExtensionHost {
    pub fn new(
        config: ExtensionHostConfig,
        callbacks: PlatformCallbacks,
        channel: Arc<dyn ExtensionChannel>,
    ) -> Self {
        let (events, _) = broadcast::channel(128);
        let streams = StreamingRequestManager::new();
        let supervisor =
            BackgroundTaskSupervisor::new(config.restart_policy.clone(), events.clone());
        let rpc = ExtensionRpc::new(channel, config.request_timeout);

        let document_store = Arc::new(DocumentStore::new(config.data_dir.join("storage")));
        let secret_store = Arc::new(SecretStore::new(config.data_dir.join("secrets")));

        let handlers: Vec<Arc<dyn RequestHandler>> = vec![
            Arc::new(EventsHandler::new(callbacks.events.clone())),
            Arc::new(NetworkHandler::new(
                callbacks.network.clone(),
                streams.clone(),
            )),
            Arc::new(StorageHandler::new(document_store)),
            Arc::new(SecretsHandler::new(secret_store)),
            Arc::new(SchedulerHandler::new(callbacks.scheduler.clone())),
            Arc::new(RegistrationHandler),
            Arc::new(ChatHandler::new(callbacks.chat.clone())),
            Arc::new(UserHandler::new(callbacks.users.clone())),
        ];

        // Namespace routing table, built once. Every method a handler
        // declares maps its namespace to that handler.
        let mut routes: HashMap<&'static str, Arc<dyn RequestHandler>> = HashMap::new();
        for handler in handlers {
            for &method in handler.methods() {
                let namespace = method.split('.').next().unwrap_or(method);
                routes.entry(namespace).or_insert_with(|| handler.clone());
            }
        }

        Self {
            config,
            extensions: RwLock::new(HashMap::new()),
            routes,
            rpc,
            streams,
            supervisor,
            events,
            callbacks,
        }
    }

    /// Subscribe to lifecycle and background-task events.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// The streaming buffers, for consuming `network.fetch-stream` results.
    pub fn streams(&self) -> &StreamingRequestManager {
        &self.streams
    }

    /// Validate, check compatibility, and activate an extension from its raw
    /// manifest JSON.
    ///
    /// On validation or activation failure the extension is recorded in
    /// `error` status (when its id is recoverable) so it shows up in
    /// listings with a reason.
    pub async fn load_extension(
        &self,
        raw: &Value,
        settings: HashMap<String, Value>,
    ) -> HostResult<()> {
        let errors = validate_manifest(raw);
        if !errors.is_empty() {
            if let Some(id) = raw.get("id").and_then(Value::as_str) {
                self.record_failure(id, None, format!("Invalid manifest: {}", errors.join("; ")))
                    .await;
            }
            return Err(HostError::ManifestInvalid(errors));
        }

        let manifest = ExtensionManifest::from_value(raw)?;
        let id = manifest.id.clone();

        let requirement = VersionReq::parse(&manifest.engines.app).map_err(|e| {
            HostError::ManifestInvalid(vec![format!(
                "Field 'engines.app' is not a valid version requirement: {e}"
            )])
        })?;
        if !requirement.matches(&self.config.app_version) {
            let message = format!(
                "Extension requires app {}, but this app is {}",
                manifest.engines.app, self.config.app_version
            );
            self.record_failure(&id, Some(manifest), message.clone())
                .await;
            return Err(HostError::ActivationFailed { id, message });
        }

        // A load over an existing id supersedes the old incarnation; its
        // supervised tasks must not outlive it.
        self.supervisor.abort_tasks(&id);

        {
            let mut extensions = self.extensions.write().await;
            extensions.insert(
                id.clone(),
                ExtensionRecord {
                    manifest: Some(manifest.clone()),
                    status: ExtensionStatus::Loading,
                    error: None,
                    loaded: None,
                },
            );
        }

        info!(extension_id = %id, version = %manifest.version, "activating extension");
        let loaded = Arc::new(LoadedExtension::new(manifest, settings));

        let activation = self
            .rpc
            .call(
                &id,
                "lifecycle.activate",
                json!({"settings": loaded.settings}),
            )
            .await;

        match activation {
            Ok(_) => {
                let mut extensions = self.extensions.write().await;
                if let Some(record) = extensions.get_mut(&id) {
                    record.status = ExtensionStatus::Active;
                    record.loaded = Some(loaded);
                }
                drop(extensions);
                let _ = self.events.send(HostEvent::ExtensionLoaded {
                    extension_id: id.clone(),
                });
                info!(extension_id = %id, "extension active");
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.record_failure(&id, None, message.clone()).await;
                Err(HostError::ActivationFailed { id, message })
            }
        }
    }

    /// Reload an extension: stop the old incarnation (abort its background
    /// tasks, best-effort deactivation), then validate and activate the new
    /// manifest. The permission checker is re-derived, so this is the only
    /// way to widen an extension's grants.
    pub async fn reload_extension(
        &self,
        raw: &Value,
        settings: HashMap<String, Value>,
    ) -> HostResult<()> {
        if let Some(id) = raw.get("id").and_then(Value::as_str) {
            let was_active = {
                let extensions = self.extensions.read().await;
                extensions
                    .get(id)
                    .map(|record| record.status == ExtensionStatus::Active)
                    .unwrap_or(false)
            };
            self.supervisor.abort_tasks(id);
            if was_active {
                if let Err(err) = self.rpc.call(id, "lifecycle.deactivate", json!({})).await {
                    warn!(extension_id = %id, error = %err, "deactivation call failed during reload");
                }
            }
        }
        self.load_extension(raw, settings).await
    }

    async fn record_failure(&self, id: &str, manifest: Option<ExtensionManifest>, message: String) {
        warn!(extension_id = %id, %message, "extension failed");
        let mut extensions = self.extensions.write().await;
        let record = extensions
            .entry(id.to_string())
            .or_insert_with(|| ExtensionRecord {
                manifest: None,
                status: ExtensionStatus::Error,
                error: None,
                loaded: None,
            });
        if manifest.is_some() {
            record.manifest = manifest;
        }
        record.status = ExtensionStatus::Error;
        record.error = Some(message.clone());
        record.loaded = None;
        drop(extensions);
        let _ = self.events.send(HostEvent::ExtensionFailed {
            extension_id: id.to_string(),
            message,
        });
    }

    async fn active_extension(&self, extension_id: &str) -> HostResult<Arc<LoadedExtension>> {
        let extensions = self.extensions.read().await;
        let record = extensions
            .get(extension_id)
            .ok_or_else(|| HostError::ExtensionNotFound(extension_id.to_string()))?;
        match (&record.status, &record.loaded) {
            (ExtensionStatus::Active, Some(loaded)) => Ok(Arc::clone(loaded)),
            _ => Err(HostError::ExtensionNotActive {
                id: extension_id.to_string(),
                status: record.status.as_str(),
            }),
        }
    }

    /// Route one inbound extension request to its namespace handler.
    ///
    /// Fails closed: unknown namespace, unknown method, non-active extension
    /// and handler errors all come back as errors, never as panics.
    pub async fn dispatch(
        &self,
        extension_id: &str,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let loaded = self.active_extension(extension_id).await?;

        let namespace = method
            .split_once('.')
            .map(|(ns, _)| ns)
            .ok_or_else(|| HostError::UnknownMethod(method.to_string()))?;
        let handler = self
            .routes
            .get(namespace)
            .cloned()
            .ok_or_else(|| HostError::UnknownMethod(method.to_string()))?;

        let ctx = HandlerContext::new(loaded);
        handler.handle(&ctx, method, payload).await
    }

    /// Disable an active extension. Its state and registrations are kept;
    /// requests are refused until it is enabled again.
    pub async fn disable_extension(&self, extension_id: &str) -> HostResult<()> {
        self.transition(
            extension_id,
            ExtensionStatus::Active,
            ExtensionStatus::Disabled,
        )
        .await?;
        let _ = self.events.send(HostEvent::ExtensionDisabled {
            extension_id: extension_id.to_string(),
        });
        Ok(())
    }

    /// Re-enable a disabled extension.
    pub async fn enable_extension(&self, extension_id: &str) -> HostResult<()> {
        self.transition(
            extension_id,
            ExtensionStatus::Disabled,
            ExtensionStatus::Active,
        )
        .await?;
        let _ = self.events.send(HostEvent::ExtensionEnabled {
            extension_id: extension_id.to_string(),
        });
        Ok(())
    }

    async fn transition(
        &self,
        extension_id: &str,
        from: ExtensionStatus,
        to: ExtensionStatus,
    ) -> HostResult<()> {
        let mut extensions = self.extensions.write().await;
        let record = extensions
            .get_mut(extension_id)
            .ok_or_else(|| HostError::ExtensionNotFound(extension_id.to_string()))?;
        if record.status != from {
            return Err(HostError::ExtensionNotActive {
                id: extension_id.to_string(),
                status: record.status.as_str(),
            });
        }
        record.status = to;
        Ok(())
    }

    /// Unload an extension from any state: abort its background tasks, give
    /// it a best-effort deactivation call, and drop its runtime state.
    pub async fn unload_extension(&self, extension_id: &str) -> HostResult<()> {
        let was_active = {
            let extensions = self.extensions.read().await;
            let record = extensions
                .get(extension_id)
                .ok_or_else(|| HostError::ExtensionNotFound(extension_id.to_string()))?;
            record.status == ExtensionStatus::Active
        };

        self.supervisor.abort_tasks(extension_id);

        if was_active {
            // Best effort; an unresponsive extension must not block unload.
            if let Err(err) = self
                .rpc
                .call(extension_id, "lifecycle.deactivate", json!({}))
                .await
            {
                warn!(extension_id, error = %err, "deactivation call failed during unload");
            }
        }

        let mut extensions = self.extensions.write().await;
        if let Some(record) = extensions.get_mut(extension_id) {
            record.status = ExtensionStatus::Unloaded;
            record.loaded = None;
        }
        drop(extensions);
        let _ = self.events.send(HostEvent::ExtensionUnloaded {
            extension_id: extension_id.to_string(),
        });
        info!(extension_id, "extension unloaded");
        Ok(())
    }

    pub async fn list_extensions(&self) -> Vec<ExtensionInfo> {
        let extensions = self.extensions.read().await;
        let mut infos: Vec<ExtensionInfo> = extensions
            .iter()
            .map(|(id, record)| ExtensionInfo {
                id: id.clone(),
                status: record.status,
                error: record.error.clone(),
                manifest: record.manifest.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn extension_info(&self, extension_id: &str) -> HostResult<ExtensionInfo> {
        let extensions = self.extensions.read().await;
        let record = extensions
            .get(extension_id)
            .ok_or_else(|| HostError::ExtensionNotFound(extension_id.to_string()))?;
        Ok(ExtensionInfo {
            id: extension_id.to_string(),
            status: record.status,
            error: record.error.clone(),
            manifest: record.manifest.clone(),
        })
    }

    /// Tools registered by an active extension, with display text resolved
    /// for the configured locale.
    pub async fn list_tools(&self, extension_id: &str) -> HostResult<Vec<Value>> {
        let loaded = self.active_extension(extension_id).await?;
        let locale = &self.config.preferred_locale;
        let tools = loaded.registered_tools.lock().unwrap();
        let mut listed: Vec<Value> = tools
            .values()
            .map(|tool| {
                json!({
                    "id": tool.id,
                    "extensionId": tool.extension_id,
                    "name": tool.name.resolve(locale),
                    "description": tool.description.resolve(locale),
                })
            })
            .collect();
        listed.sort_by_key(|v| v["id"].as_str().map(str::to_string));
        Ok(listed)
    }

    /// Fire a scheduled job inside an extension and report the outcome back
    /// to the scheduler. A timeout counts as a job failure.
    pub async fn fire_scheduled_job(&self, extension_id: &str, job_id: &str) -> HostResult<()> {
        self.active_extension(extension_id).await?;

        let result = self
            .rpc
            .call(extension_id, "scheduler.fire", json!({"jobId": job_id}))
            .await;

        let outcome = match &result {
            Ok(_) => JobOutcome::Succeeded,
            Err(err) => JobOutcome::Failed {
                message: err.to_string(),
            },
        };
        self.callbacks
            .scheduler
            .update_job_result(extension_id, job_id, outcome)
            .await;

        result.map(|_| ())
    }

    /// Invoke a tool an extension registered earlier.
    pub async fn invoke_tool(
        &self,
        extension_id: &str,
        tool_id: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let loaded = self.active_extension(extension_id).await?;
        if !loaded.registered_tools.lock().unwrap().contains_key(tool_id) {
            return Err(HostError::PayloadInvalid(format!(
                "Tool '{tool_id}' is not registered by extension '{extension_id}'"
            )));
        }
        self.rpc
            .call(
                extension_id,
                "tools.invoke",
                json!({"toolId": tool_id, "payload": payload}),
            )
            .await
    }

    /// Invoke an action an extension registered earlier.
    pub async fn invoke_action(
        &self,
        extension_id: &str,
        action_id: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let loaded = self.active_extension(extension_id).await?;
        if !loaded
            .registered_actions
            .lock()
            .unwrap()
            .contains_key(action_id)
        {
            return Err(HostError::PayloadInvalid(format!(
                "Action '{action_id}' is not registered by extension '{extension_id}'"
            )));
        }
        self.rpc
            .call(
                extension_id,
                "actions.invoke",
                json!({"actionId": action_id, "payload": payload}),
            )
            .await
    }

    /// Start a supervised background task for an active extension.
    pub async fn spawn_background_task<F, Fut>(
        &self,
        extension_id: &str,
        task_id: &str,
        factory: F,
    ) -> HostResult<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.active_extension(extension_id).await?;
        self.supervisor.spawn(extension_id, task_id, factory);
        Ok(())
    }

    /// Resolve a pending host→extension request with the extension's reply.
    pub fn handle_extension_response(
        &self,
        request_id: &str,
        result: Result<Value, String>,
    ) -> bool {
        self.rpc.resolve(request_id, result)
    }
}
