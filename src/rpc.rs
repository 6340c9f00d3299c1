//! Host-initiated calls into extensions.
//!
//! The host assumes only a bidirectional message channel to whatever runs
//! extension code. Outbound calls (scheduler fires, tool/action invocations,
//! lifecycle activation) are correlated by request id and bounded by a timer;
//! the pending entry is removed on response or timeout, whichever comes
//! first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::error::{HostError, HostResult};

/// A host→extension call handed to the isolation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCall {
    pub extension_id: String,
    pub request_id: String,
    pub method: String,
    pub payload: Value,
}

/// The bidirectional message channel to the isolation layer.
///
/// `send` must not block: delivery is asynchronous and the reply comes back
/// through [`ExtensionRpc::resolve`].
pub trait ExtensionChannel: Send + Sync {
    fn send(&self, call: OutboundCall) -> anyhow::Result<()>;
}

type Pending = oneshot::Sender<Result<Value, String>>;

/// Correlation table for in-flight host→extension requests.
pub struct ExtensionRpc {
    channel: Arc<dyn ExtensionChannel>,
    pending: Mutex<HashMap<String, Pending>>,
    timeout: Duration,
}

impl ExtensionRpc {
    pub fn new(channel: Arc<dyn ExtensionChannel>, timeout: Duration) -> Self {
        Self {
            channel,
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Call into an extension and await its reply, bounded by the timeout.
    pub async fn call(
        &self,
        extension_id: &str,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id.clone(), tx);

        let call = OutboundCall {
            extension_id: extension_id.to_string(),
            request_id: request_id.clone(),
            method: method.to_string(),
            payload,
        };

        if let Err(err) = self.channel.send(call) {
            self.pending.lock().unwrap().remove(&request_id);
            warn!(extension_id, method, error = %err, "failed to send call to extension");
            return Err(HostError::ChannelClosed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(HostError::ExtensionError(message)),
            // Sender dropped without a reply: the channel went away.
            Ok(Err(_)) => Err(HostError::ChannelClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&request_id);
                Err(HostError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Resolve a pending request with the extension's reply.
    ///
    /// Returns false when no request with this id is pending (already
    /// resolved, or timed out).
    pub fn resolve(&self, request_id: &str, result: Result<Value, String>) -> bool {
        match self.pending.lock().unwrap().remove(request_id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Number of in-flight requests (test visibility).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct TestChannel {
        tx: mpsc::UnboundedSender<OutboundCall>,
    }

    impl ExtensionChannel for TestChannel {
        fn send(&self, call: OutboundCall) -> anyhow::Result<()> {
            self.tx
                .send(call)
                .map_err(|_| anyhow::anyhow!("channel closed"))
        }
    }

    fn rpc_pair(timeout: Duration) -> (Arc<ExtensionRpc>, mpsc::UnboundedReceiver<OutboundCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rpc = Arc::new(ExtensionRpc::new(Arc::new(TestChannel { tx }), timeout));
        (rpc, rx)
    }

    #[tokio::test]
    async fn test_call_resolved_by_response() {
        let (rpc, mut rx) = rpc_pair(Duration::from_secs(5));

        let responder = Arc::clone(&rpc);
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            assert_eq!(call.method, "tools.invoke");
            responder.resolve(&call.request_id, Ok(json!({"result": 42})));
        });

        let value = rpc
            .call("acme.weather", "tools.invoke", json!({"toolId": "t"}))
            .await
            .unwrap();
        assert_eq!(value, json!({"result": 42}));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_extension_error_surfaces() {
        let (rpc, mut rx) = rpc_pair(Duration::from_secs(5));

        let responder = Arc::clone(&rpc);
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            responder.resolve(&call.request_id, Err("tool exploded".to_string()));
        });

        let err = rpc
            .call("acme.weather", "tools.invoke", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::ExtensionError(_)));
        assert!(err.to_string().contains("tool exploded"));
    }

    #[tokio::test]
    async fn test_call_times_out_and_cleans_up() {
        let (rpc, _rx) = rpc_pair(Duration::from_millis(20));

        let err = rpc
            .call("acme.weather", "scheduler.fire", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::RequestTimeout { .. }));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_late_resolve_is_ignored() {
        let (rpc, mut rx) = rpc_pair(Duration::from_millis(20));

        let _ = rpc.call("acme.weather", "scheduler.fire", json!({})).await;
        let call = rx.recv().await.unwrap();
        assert!(!rpc.resolve(&call.request_id, Ok(json!(null))));
    }
}
