//! Meridian extension host.
//!
//! A capability-gated runtime for assistant extensions. Extensions declare
//! everything they need in a JSON manifest; the host validates the manifest,
//! derives an immutable permission checker, and routes every request the
//! extension makes through a namespace handler that checks the relevant
//! grant before any side effect.
//!
//! Layout:
//!
//! ```text
//! src/
//! ├── manifest.rs    manifest types + collect-all-errors validation
//! ├── permissions.rs permission allow-list, network grammar, checker
//! ├── host.rs        lifecycle state machine, router, host→extension calls
//! ├── handlers/      one module per RPC namespace
//! ├── streaming.rs   push/park buffers for streaming responses
//! ├── store.rs       file-backed document and secret stores
//! ├── rpc.rs         request correlation for host-initiated calls
//! ├── background.rs  supervised background tasks with restart backoff
//! ├── callbacks.rs   injected platform effect traits
//! └── error.rs       error taxonomy
//! ```
//!
//! The host itself performs no I/O beyond its own stores: networking,
//! scheduling, chat and user lookups are traits implemented by the embedding
//! application (see [`callbacks::PlatformCallbacks`]).

pub mod background;
pub mod callbacks;
pub mod error;
pub mod handlers;
pub mod host;
pub mod manifest;
pub mod permissions;
pub mod rpc;
pub mod store;
pub mod streaming;

pub use background::{BackgroundTaskSupervisor, RestartPolicy, TaskStatus};
pub use callbacks::{
    ChatCallbacks, EmitEventCallback, FetchMethod, FetchRequest, FetchResponse, JobOutcome,
    NetworkCallbacks, PlatformCallbacks, SchedulerCallbacks, UserCallbacks, UserProfile,
};
pub use error::{HostError, HostResult};
pub use host::{
    ActionInfo, ExtensionHost, ExtensionHostConfig, ExtensionInfo, ExtensionStatus, HostEvent,
    LoadedExtension, ProviderInfo, ToolInfo,
};
pub use manifest::{validate_manifest, ExtensionManifest, LocalizedString};
pub use permissions::{is_valid_permission, PermissionChecker, PermissionError};
pub use rpc::{ExtensionChannel, ExtensionRpc, OutboundCall};
pub use streaming::{StreamEvent, StreamingRequestManager};
