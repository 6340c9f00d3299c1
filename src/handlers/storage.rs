//! `storage.*` namespace: document store, shared and per-user flavors.
//!
//! Every method has a `ForUser` twin that takes a `userId` and operates on
//! that user's namespace instead of the extension's shared one. Isolation is
//! purely namespace-based; both flavors are gated by the same grant.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{
    optional_object, require_array, require_object, require_str, HandlerContext, RequestHandler,
};
use crate::error::{HostError, HostResult};
use crate::store::{shared_namespace, user_namespace, DocumentStore};

pub struct StorageHandler {
    store: Arc<DocumentStore>,
}

impl StorageHandler {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

/// Resolve the namespace for a method, stripping the `ForUser` suffix.
/// Returns the bare operation name and the namespace to run it against.
fn resolve_namespace<'a>(
    ctx: &HandlerContext,
    op: &'a str,
    obj: &Map<String, Value>,
) -> HostResult<(&'a str, String)> {
    match op.strip_suffix("ForUser") {
        Some(base) => {
            let user_id = require_str(obj, "userId")?;
            Ok((base, user_namespace(&ctx.extension_id, user_id)))
        }
        None => Ok((op, shared_namespace(&ctx.extension_id))),
    }
}

/// The document itself: an object carrying a string `id`.
fn require_document(obj: &Map<String, Value>) -> HostResult<(String, Value)> {
    let doc = obj
        .get("document")
        .and_then(Value::as_object)
        .ok_or_else(|| HostError::PayloadInvalid("Field 'document' must be an object".into()))?;
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            HostError::PayloadInvalid("Document must have a non-empty string 'id'".into())
        })?;
    Ok((id.to_string(), Value::Object(doc.clone())))
}

fn optional_filter(obj: &Map<String, Value>) -> HostResult<Option<Value>> {
    Ok(optional_object(obj, "filter")?.map(|m| Value::Object(m.clone())))
}

#[async_trait]
impl RequestHandler for StorageHandler {
    fn methods(&self) -> &'static [&'static str] {
        &[
            "storage.put",
            "storage.putForUser",
            "storage.putMany",
            "storage.putManyForUser",
            "storage.get",
            "storage.getForUser",
            "storage.delete",
            "storage.deleteForUser",
            "storage.deleteMany",
            "storage.deleteManyForUser",
            "storage.find",
            "storage.findForUser",
            "storage.findOne",
            "storage.findOneForUser",
            "storage.count",
            "storage.countForUser",
            "storage.dropCollection",
            "storage.dropCollectionForUser",
            "storage.listCollections",
            "storage.listCollectionsForUser",
        ]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        method: &str,
        payload: Value,
    ) -> HostResult<Value> {
        let op = method
            .strip_prefix("storage.")
            .ok_or_else(|| HostError::UnknownMethod(method.to_string()))?;

        let obj = require_object(&payload)?;
        let (op, namespace) = resolve_namespace(ctx, op, obj)?;

        ctx.extension.permissions.check_storage()?;

        match op {
            "put" => {
                let collection = require_str(obj, "collection")?;
                let (id, doc) = require_document(obj)?;
                self.store.put(&namespace, collection, &id, doc)?;
                Ok(json!({"id": id}))
            }
            "putMany" => {
                let collection = require_str(obj, "collection")?;
                let mut docs = Vec::new();
                for entry in require_array(obj, "documents")? {
                    let entry_obj = entry.as_object().ok_or_else(|| {
                        HostError::PayloadInvalid("Each document must be an object".into())
                    })?;
                    let id = entry_obj
                        .get("id")
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| {
                            HostError::PayloadInvalid(
                                "Document must have a non-empty string 'id'".into(),
                            )
                        })?;
                    docs.push((id.to_string(), entry.clone()));
                }
                let inserted = self.store.put_many(&namespace, collection, docs)?;
                Ok(json!({"inserted": inserted}))
            }
            "get" => {
                let collection = require_str(obj, "collection")?;
                let id = require_str(obj, "id")?;
                let doc = self.store.get(&namespace, collection, id)?;
                Ok(doc.unwrap_or(Value::Null))
            }
            "delete" => {
                let collection = require_str(obj, "collection")?;
                let id = require_str(obj, "id")?;
                let deleted = self.store.delete(&namespace, collection, id)?;
                Ok(json!({"deleted": deleted}))
            }
            "deleteMany" => {
                let collection = require_str(obj, "collection")?;
                let ids: Vec<String> = require_array(obj, "ids")?
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            HostError::PayloadInvalid("Each id must be a string".into())
                        })
                    })
                    .collect::<HostResult<_>>()?;
                let deleted = self.store.delete_many(&namespace, collection, &ids)?;
                Ok(json!({"deleted": deleted}))
            }
            "find" => {
                let collection = require_str(obj, "collection")?;
                let filter = optional_filter(obj)?;
                let docs = self.store.find(&namespace, collection, filter.as_ref())?;
                Ok(Value::Array(docs))
            }
            "findOne" => {
                let collection = require_str(obj, "collection")?;
                let filter = optional_filter(obj)?;
                let doc = self
                    .store
                    .find_one(&namespace, collection, filter.as_ref())?;
                Ok(doc.unwrap_or(Value::Null))
            }
            "count" => {
                let collection = require_str(obj, "collection")?;
                let filter = optional_filter(obj)?;
                let count = self.store.count(&namespace, collection, filter.as_ref())?;
                Ok(json!({"count": count}))
            }
            "dropCollection" => {
                let collection = require_str(obj, "collection")?;
                let dropped = self.store.drop_collection(&namespace, collection)?;
                Ok(json!({"dropped": dropped}))
            }
            "listCollections" => {
                let names = self.store.list_collections(&namespace)?;
                Ok(json!(names))
            }
            _ => Err(HostError::UnknownMethod(method.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LoadedExtension;
    use crate::manifest::ExtensionManifest;
    use serde_json::json;
    use tempfile::TempDir;

    fn context(permissions: &[&str]) -> HandlerContext {
        let manifest = ExtensionManifest::from_value(&json!({
            "id": "acme.notes",
            "version": "1.0.0",
            "name": "Notes",
            "type": "feature",
            "engines": {"app": ">=1.0.0"},
            "permissions": permissions,
        }))
        .unwrap();
        HandlerContext::new(Arc::new(LoadedExtension::new(manifest, Default::default())))
    }

    fn handler(dir: &TempDir) -> StorageHandler {
        StorageHandler::new(Arc::new(DocumentStore::new(dir.path().to_path_buf())))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        let put = handler
            .handle(
                &ctx,
                "storage.put",
                json!({"collection": "notes", "document": {"id": "n1", "title": "Hello"}}),
            )
            .await
            .unwrap();
        assert_eq!(put, json!({"id": "n1"}));

        let got = handler
            .handle(&ctx, "storage.get", json!({"collection": "notes", "id": "n1"}))
            .await
            .unwrap();
        assert_eq!(got["title"], "Hello");
    }

    #[tokio::test]
    async fn test_get_missing_returns_null() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        let got = handler
            .handle(&ctx, "storage.get", json!({"collection": "notes", "id": "nope"}))
            .await
            .unwrap();
        assert_eq!(got, Value::Null);
    }

    #[tokio::test]
    async fn test_denied_without_grant() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&[]);

        let err = handler
            .handle(
                &ctx,
                "storage.put",
                json!({"collection": "notes", "document": {"id": "n1"}}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_for_user_isolated_from_shared() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        handler
            .handle(
                &ctx,
                "storage.putForUser",
                json!({
                    "userId": "u1",
                    "collection": "prefs",
                    "document": {"id": "theme", "value": "dark"},
                }),
            )
            .await
            .unwrap();

        let shared = handler
            .handle(&ctx, "storage.get", json!({"collection": "prefs", "id": "theme"}))
            .await
            .unwrap();
        assert_eq!(shared, Value::Null);

        let scoped = handler
            .handle(
                &ctx,
                "storage.getForUser",
                json!({"userId": "u1", "collection": "prefs", "id": "theme"}),
            )
            .await
            .unwrap();
        assert_eq!(scoped["value"], "dark");
    }

    #[tokio::test]
    async fn test_for_user_requires_user_id() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        let err = handler
            .handle(
                &ctx,
                "storage.getForUser",
                json!({"collection": "prefs", "id": "theme"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_find_count_and_delete_many() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        handler
            .handle(
                &ctx,
                "storage.putMany",
                json!({
                    "collection": "notes",
                    "documents": [
                        {"id": "a", "tag": "work"},
                        {"id": "b", "tag": "home"},
                        {"id": "c", "tag": "work"},
                    ],
                }),
            )
            .await
            .unwrap();

        let found = handler
            .handle(
                &ctx,
                "storage.find",
                json!({"collection": "notes", "filter": {"tag": "work"}}),
            )
            .await
            .unwrap();
        assert_eq!(found.as_array().unwrap().len(), 2);

        let count = handler
            .handle(&ctx, "storage.count", json!({"collection": "notes"}))
            .await
            .unwrap();
        assert_eq!(count, json!({"count": 3}));

        let deleted = handler
            .handle(
                &ctx,
                "storage.deleteMany",
                json!({"collection": "notes", "ids": ["a", "c", "zz"]}),
            )
            .await
            .unwrap();
        assert_eq!(deleted, json!({"deleted": 2}));
    }

    #[tokio::test]
    async fn test_document_without_id_rejected() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        let err = handler
            .handle(
                &ctx,
                "storage.put",
                json!({"collection": "notes", "document": {"title": "no id"}}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::PayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_drop_and_list_collections() {
        let dir = TempDir::new().unwrap();
        let handler = handler(&dir);
        let ctx = context(&["database.own"]);

        handler
            .handle(
                &ctx,
                "storage.put",
                json!({"collection": "notes", "document": {"id": "n1"}}),
            )
            .await
            .unwrap();

        let names = handler
            .handle(&ctx, "storage.listCollections", json!({}))
            .await
            .unwrap();
        assert_eq!(names, json!(["notes"]));

        let dropped = handler
            .handle(&ctx, "storage.dropCollection", json!({"collection": "notes"}))
            .await
            .unwrap();
        assert_eq!(dropped, json!({"dropped": true}));
    }
}
