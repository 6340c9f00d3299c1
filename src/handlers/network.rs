//! `network.*` namespace: outbound fetch, request/response and streaming.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{optional_str, require_object, require_str, HandlerContext, RequestHandler};
use crate::callbacks::{FetchMethod, FetchRequest, NetworkCallbacks};
use crate::error::{HostError, HostResult};
use crate::streaming::StreamingRequestManager;

pub struct NetworkHandler {
    network: Arc<dyn NetworkCallbacks>,
    streams: StreamingRequestManager,
}

impl NetworkHandler {
    pub fn new(network: Arc<dyn NetworkCallbacks>, streams: StreamingRequestManager) -> Self {
        Self { network, streams }
    }

    /// Parse the request, enforce the network grant for its host and port,
    /// and build the callback-facing request.
    fn prepare(&self, ctx: &HandlerContext, obj: &Map<String, Value>) -> HostResult<FetchRequest> {
        let raw_url = require_str(obj, "url")?;
        let url = url::Url::parse(raw_url)
            .map_err(|e| HostError::PayloadInvalid(format!("Invalid URL '{raw_url}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| HostError::PayloadInvalid(format!("URL '{raw_url}' has no host")))?;

        // Scheme-default ports count as the port itself, so a grant like
        // `network:api.example.com:443` covers `https://api.example.com/`.
        ctx.extension
            .permissions
            .check_network(host, url.port_or_known_default())?;

        let method = match optional_str(obj, "method")? {
            None => FetchMethod::Get,
            Some(m) => parse_method(m)?,
        };

        let mut headers = HashMap::new();
        if let Some(map) = super::optional_object(obj, "headers")? {
            for (key, value) in map {
                let value = value.as_str().ok_or_else(|| {
                    HostError::PayloadInvalid(format!("Header '{key}' must be a string"))
                })?;
                headers.insert(key.clone(), value.to_string());
            }
        }

        let body = optional_str(obj, "body")?.map(str::to_string);

        Ok(FetchRequest {
            url: raw_url.to_string(),
            method,
            headers,
            body,
        })
    }
}

fn parse_method(raw: &str) -> HostResult<FetchMethod> {
    let method = match raw.to_ascii_uppercase().as_str() {
        "GET" => FetchMethod::Get,
        "POST" => FetchMethod::Post,
        "PUT" => FetchMethod::Put,
        "DELETE" => FetchMethod::Delete,
        "PATCH" => FetchMethod::Patch,
        "HEAD" => FetchMethod::Head,
        "OPTIONS" => FetchMethod::Options,
        _ => {
            return Err(HostError::PayloadInvalid(format!(
                "Unsupported HTTP method '{raw}'"
            )))
        }
    };
    Ok(method)
}

#[async_trait]
impl RequestHandler for NetworkHandler {
    fn methods(&self) -> &'static [&'static str] {
        &["network.fetch", "network.fetch-stream"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let obj = require_object(&payload)?;

        match method {
            "network.fetch" => {
                let request = self.prepare(ctx, obj)?;
                debug!(extension_id = %ctx.extension_id, url = %request.url, "fetch");
                let response = self
                    .network
                    .fetch(&ctx.extension_id, request)
                    .await
                    .map_err(HostError::callback)?;
                Ok(serde_json::to_value(response)?)
            }
            "network.fetch-stream" => {
                let request = self.prepare(ctx, obj)?;
                let request_id = match optional_str(obj, "requestId")? {
                    Some(id) => id.to_string(),
                    None => Uuid::new_v4().to_string(),
                };

                let stream = self
                    .network
                    .fetch_stream(&ctx.extension_id, request)
                    .await
                    .map_err(HostError::callback)?;

                self.streams.start(&request_id);

                // Pump runs independently of the consumer; buffered events
                // wait until someone iterates the stream.
                let streams = self.streams.clone();
                let pump_id = request_id.clone();
                let extension_id = ctx.extension_id.clone();
                tokio::spawn(async move {
                    let mut stream = stream;
                    while let Some(event) = stream.next().await {
                        if !streams.add_event(&pump_id, event) {
                            warn!(%extension_id, request_id = %pump_id, "stream consumer gone");
                            return;
                        }
                    }
                    streams.complete(&pump_id);
                });

                Ok(json!({"status": "streaming", "requestId": request_id}))
            }
            other => Err(HostError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::FetchResponse;
    use crate::host::LoadedExtension;
    use crate::manifest::ExtensionManifest;
    use crate::streaming::StreamEvent;
    use futures::stream::BoxStream;
    use serde_json::json;

    struct FakeNetwork;

    #[async_trait]
    impl NetworkCallbacks for FakeNetwork {
        async fn fetch(
            &self,
            _extension_id: &str,
            request: FetchRequest,
        ) -> anyhow::Result<FetchResponse> {
            Ok(FetchResponse {
                status: 200,
                status_text: "OK".to_string(),
                headers: HashMap::new(),
                body: format!("fetched {}", request.url),
            })
        }

        async fn fetch_stream(
            &self,
            _extension_id: &str,
            _request: FetchRequest,
        ) -> anyhow::Result<BoxStream<'static, StreamEvent>> {
            let events = vec![
                StreamEvent::Data {
                    payload: json!({"chunk": 1}),
                },
                StreamEvent::Data {
                    payload: json!({"chunk": 2}),
                },
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn context(permissions: &[&str]) -> HandlerContext {
        let manifest = ExtensionManifest::from_value(&json!({
            "id": "acme.weather",
            "version": "1.0.0",
            "name": "Weather",
            "type": "feature",
            "engines": {"app": ">=1.0.0"},
            "permissions": permissions,
        }))
        .unwrap();
        HandlerContext::new(Arc::new(LoadedExtension::new(manifest, Default::default())))
    }

    fn handler() -> NetworkHandler {
        NetworkHandler::new(Arc::new(FakeNetwork), StreamingRequestManager::default())
    }

    #[tokio::test]
    async fn test_fetch_with_matching_grant() {
        let ctx = context(&["network:api.example.com"]);
        let response = handler()
            .handle(
                &ctx,
                "network.fetch",
                json!({"url": "https://api.example.com/v1/data"}),
            )
            .await
            .unwrap();
        assert_eq!(response["status"], 200);
        assert_eq!(response["body"], "fetched https://api.example.com/v1/data");
    }

    #[tokio::test]
    async fn test_fetch_denied_for_other_host() {
        let ctx = context(&["network:api.example.com"]);
        let err = handler()
            .handle(&ctx, "network.fetch", json!({"url": "https://evil.com/"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_port_grant_covers_scheme_default_port() {
        let ctx = context(&["network:api.example.com:443"]);
        let response = handler()
            .handle(
                &ctx,
                "network.fetch",
                json!({"url": "https://api.example.com/v1/data"}),
            )
            .await
            .unwrap();
        assert_eq!(response["status"], 200);

        // Same grant must not cover another port.
        let err = handler()
            .handle(
                &ctx,
                "network.fetch",
                json!({"url": "https://api.example.com:8443/v1/data"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_localhost_port_grant_covers_scheme_default_port() {
        let ctx = context(&["network:localhost:80"]);
        handler()
            .handle(&ctx, "network.fetch", json!({"url": "http://localhost/health"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_wildcard_does_not_cover_localhost() {
        let ctx = context(&["network:*"]);
        let err = handler()
            .handle(
                &ctx,
                "network.fetch",
                json!({"url": "http://localhost:8080/"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_fetch_invalid_url_is_payload_error() {
        let ctx = context(&["network:*"]);
        let err = handler()
            .handle(&ctx, "network.fetch", json!({"url": "not a url"}))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_fetch_stream_buffers_until_iterated() {
        let handler = handler();
        let ctx = context(&["network:api.example.com"]);

        let reply = handler
            .handle(
                &ctx,
                "network.fetch-stream",
                json!({"url": "https://api.example.com/stream", "requestId": "req-1"}),
            )
            .await
            .unwrap();
        assert_eq!(reply["status"], "streaming");
        assert_eq!(reply["requestId"], "req-1");

        let stream = handler.streams.iterate("req-1");
        let chunks: Vec<Value> = futures::StreamExt::collect::<Vec<_>>(stream)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(chunks, vec![json!({"chunk": 1}), json!({"chunk": 2})]);
    }
}
