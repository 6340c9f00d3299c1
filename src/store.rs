//! Persistent stores backing the storage and secrets RPC surfaces.
//!
//! Each extension gets isolated namespaces: `ext/<id>` for data shared across
//! users and `ext/<id>/user/<user-id>` for per-user data. A namespace is
//! backed by one JSON file under the host data directory, cached in memory
//! and written through on modification.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostResult;

/// Build the shared namespace for an extension.
pub fn shared_namespace(extension_id: &str) -> String {
    format!("ext/{extension_id}")
}

/// Build the per-user namespace for an extension.
pub fn user_namespace(extension_id: &str, user_id: &str) -> String {
    format!("ext/{extension_id}/user/{user_id}")
}

/// Turn a namespace into a safe file stem.
///
/// The encoding is injective: every byte outside the safe set (including
/// `%` itself) becomes `%XX`, so distinct namespaces can never share a
/// backing file.
fn encode_namespace(namespace: &str) -> String {
    let mut encoded = String::with_capacity(namespace.len());
    for byte in namespace.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' => encoded.push(byte as char),
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}

/// One namespace's collections: collection name → id → document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NamespaceData {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Minimal embedded document store.
///
/// Documents are JSON objects keyed by a caller-supplied string id inside
/// named collections. Filters are top-level equality matches.
pub struct DocumentStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, NamespaceData>>,
}

impl DocumentStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_namespace(namespace)))
    }

    fn load(&self, namespace: &str) -> NamespaceData {
        let path = self.path_for(namespace);
        if !path.exists() {
            return NamespaceData::default();
        }
        fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default()
    }

    fn with_namespace<T>(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut NamespaceData) -> (T, bool),
    ) -> HostResult<T> {
        let mut cache = self.cache.lock().unwrap();
        if !cache.contains_key(namespace) {
            let data = self.load(namespace);
            cache.insert(namespace.to_string(), data);
        }
        let data = cache.get_mut(namespace).expect("namespace just inserted");
        let (result, dirty) = f(data);
        if dirty {
            fs::create_dir_all(&self.root)?;
            let contents = serde_json::to_string_pretty(data)?;
            fs::write(self.path_for(namespace), contents)?;
        }
        Ok(result)
    }

    /// Insert or replace a document.
    pub fn put(&self, namespace: &str, collection: &str, id: &str, doc: Value) -> HostResult<()> {
        self.with_namespace(namespace, |data| {
            data.collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc);
            ((), true)
        })
    }

    /// Insert or replace several documents in one write.
    pub fn put_many(
        &self,
        namespace: &str,
        collection: &str,
        docs: Vec<(String, Value)>,
    ) -> HostResult<usize> {
        self.with_namespace(namespace, |data| {
            let target = data.collections.entry(collection.to_string()).or_default();
            let count = docs.len();
            for (id, doc) in docs {
                target.insert(id, doc);
            }
            (count, count > 0)
        })
    }

    pub fn get(&self, namespace: &str, collection: &str, id: &str) -> HostResult<Option<Value>> {
        self.with_namespace(namespace, |data| {
            let found = data
                .collections
                .get(collection)
                .and_then(|c| c.get(id))
                .cloned();
            (found, false)
        })
    }

    /// Delete a document; returns whether it existed.
    pub fn delete(&self, namespace: &str, collection: &str, id: &str) -> HostResult<bool> {
        self.with_namespace(namespace, |data| {
            let removed = data
                .collections
                .get_mut(collection)
                .map(|c| c.remove(id).is_some())
                .unwrap_or(false);
            (removed, removed)
        })
    }

    /// Delete several documents; returns how many existed.
    pub fn delete_many(
        &self,
        namespace: &str,
        collection: &str,
        ids: &[String],
    ) -> HostResult<usize> {
        self.with_namespace(namespace, |data| {
            let Some(target) = data.collections.get_mut(collection) else {
                return (0, false);
            };
            let removed = ids.iter().filter(|id| target.remove(*id).is_some()).count();
            (removed, removed > 0)
        })
    }

    /// Find all documents matching a top-level equality filter, in id order.
    pub fn find(
        &self,
        namespace: &str,
        collection: &str,
        filter: Option<&Value>,
    ) -> HostResult<Vec<Value>> {
        self.with_namespace(namespace, |data| {
            let found = data
                .collections
                .get(collection)
                .map(|c| {
                    c.values()
                        .filter(|doc| matches_filter(doc, filter))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            (found, false)
        })
    }

    /// Find the first matching document, in id order.
    pub fn find_one(
        &self,
        namespace: &str,
        collection: &str,
        filter: Option<&Value>,
    ) -> HostResult<Option<Value>> {
        self.with_namespace(namespace, |data| {
            let found = data.collections.get(collection).and_then(|c| {
                c.values()
                    .find(|doc| matches_filter(doc, filter))
                    .cloned()
            });
            (found, false)
        })
    }

    /// Count matching documents.
    pub fn count(
        &self,
        namespace: &str,
        collection: &str,
        filter: Option<&Value>,
    ) -> HostResult<usize> {
        self.with_namespace(namespace, |data| {
            let count = data
                .collections
                .get(collection)
                .map(|c| c.values().filter(|doc| matches_filter(doc, filter)).count())
                .unwrap_or(0);
            (count, false)
        })
    }

    /// Drop an entire collection; returns whether it existed.
    pub fn drop_collection(&self, namespace: &str, collection: &str) -> HostResult<bool> {
        self.with_namespace(namespace, |data| {
            let removed = data.collections.remove(collection).is_some();
            (removed, removed)
        })
    }

    /// List collection names in a namespace.
    pub fn list_collections(&self, namespace: &str) -> HostResult<Vec<String>> {
        self.with_namespace(namespace, |data| {
            (data.collections.keys().cloned().collect(), false)
        })
    }
}

/// Top-level equality match: every filter field must be present and equal.
fn matches_filter(doc: &Value, filter: Option<&Value>) -> bool {
    let Some(filter) = filter.and_then(Value::as_object) else {
        return true;
    };
    let Some(doc) = doc.as_object() else {
        return filter.is_empty();
    };
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

/// Per-namespace secret storage.
///
/// Secrets are kept apart from the document store in their own directory so
/// the backing files can be permissioned (or swapped for an OS keychain)
/// independently of ordinary extension data.
pub struct SecretStore {
    root: PathBuf,
    cache: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl SecretStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_namespace(namespace)))
    }

    fn with_namespace<T>(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> HostResult<T> {
        let mut cache = self.cache.lock().unwrap();
        if !cache.contains_key(namespace) {
            let path = self.path_for(namespace);
            let data = if path.exists() {
                fs::read_to_string(&path)
                    .ok()
                    .and_then(|contents| serde_json::from_str(&contents).ok())
                    .unwrap_or_default()
            } else {
                BTreeMap::new()
            };
            cache.insert(namespace.to_string(), data);
        }
        let data = cache.get_mut(namespace).expect("namespace just inserted");
        let (result, dirty) = f(data);
        if dirty {
            fs::create_dir_all(&self.root)?;
            let contents = serde_json::to_string(data)?;
            fs::write(self.path_for(namespace), contents)?;
        }
        Ok(result)
    }

    pub fn set(&self, namespace: &str, key: &str, value: String) -> HostResult<()> {
        self.with_namespace(namespace, |secrets| {
            secrets.insert(key.to_string(), value);
            ((), true)
        })
    }

    pub fn get(&self, namespace: &str, key: &str) -> HostResult<Option<String>> {
        self.with_namespace(namespace, |secrets| (secrets.get(key).cloned(), false))
    }

    /// Delete a secret; returns whether it existed.
    pub fn delete(&self, namespace: &str, key: &str) -> HostResult<bool> {
        self.with_namespace(namespace, |secrets| {
            let removed = secrets.remove(key).is_some();
            (removed, removed)
        })
    }

    /// List secret keys (never values).
    pub fn list(&self, namespace: &str) -> HostResult<Vec<String>> {
        self.with_namespace(namespace, |secrets| (secrets.keys().cloned().collect(), false))
    }
}
