//! In-memory document store with optional JSON-file persistence.
//!
//! Documents live in a flat map keyed by full path; subtree reads assemble
//! nested objects on the fly. Each path carries a version counter so the
//! transaction loop can detect conflicting writers and retry.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;

use super::DocumentStore;

/// Maximum transaction attempts before giving up with a conflict error.
const TRANSACTION_RETRIES: usize = 25;

#[derive(Default)]
struct Shelf {
    docs: BTreeMap<String, Value>,
    versions: HashMap<String, u64>,
}

impl Shelf {
    fn write(&mut self, path: &str, value: Value) {
        *self.versions.entry(path.to_string()).or_insert(0) += 1;
        self.docs.insert(path.to_string(), value);
    }

    fn version(&self, path: &str) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }
}

/// Process-local [`DocumentStore`] used for local runs and tests.
///
/// The whole document map can be loaded from and saved to a JSON file, so
/// one-shot CLI invocations see each other's writes between processes.
pub struct MemoryStore {
    shelf: RwLock<Shelf>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            shelf: RwLock::new(Shelf::default()),
        }
    }

    /// Loads a store from a JSON snapshot file, or starts empty if the file
    /// does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No store snapshot, starting empty");
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading store snapshot {}", path.display()))?;
        let docs: BTreeMap<String, Value> = serde_json::from_str(&content)
            .with_context(|| format!("parsing store snapshot {}", path.display()))?;

        debug!(path = %path.display(), documents = docs.len(), "Store snapshot loaded");
        Ok(Self {
            shelf: RwLock::new(Shelf {
                docs,
                versions: HashMap::new(),
            }),
        })
    }

    /// Writes the current document map to a JSON snapshot file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let shelf = self.shelf.read().await;
        let content = serde_json::to_string_pretty(&shelf.docs)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing store snapshot {}", path.display()))?;
        debug!(path = %path.display(), documents = shelf.docs.len(), "Store snapshot saved");
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves `path` to either its leaf document or the assembled subtree.
fn value_at(docs: &BTreeMap<String, Value>, path: &str) -> Option<Value> {
    if let Some(doc) = docs.get(path) {
        return Some(doc.clone());
    }

    let prefix = format!("{}/", path.trim_end_matches('/'));
    let mut root = serde_json::Map::new();
    for (key, doc) in docs.range(prefix.clone()..) {
        if !key.starts_with(&prefix) {
            break;
        }
        insert_nested(&mut root, &key[prefix.len()..], doc.clone());
    }

    if root.is_empty() {
        None
    } else {
        Some(Value::Object(root))
    }
}

fn insert_nested(map: &mut serde_json::Map<String, Value>, rel_path: &str, doc: Value) {
    match rel_path.split_once('/') {
        None => {
            map.insert(rel_path.to_string(), doc);
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(child) = slot {
                insert_nested(child, rest, doc);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, path: &str, value: Value) -> Result<()> {
        let mut shelf = self.shelf.write().await;
        shelf.write(path, value);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let shelf = self.shelf.read().await;
        Ok(value_at(&shelf.docs, path))
    }

    async fn children(&self, path: &str) -> Result<BTreeMap<String, Value>> {
        let shelf = self.shelf.read().await;
        match value_at(&shelf.docs, path) {
            Some(Value::Object(map)) => Ok(map.into_iter().collect()),
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn update(&self, writes: BTreeMap<String, Value>) -> Result<()> {
        let mut shelf = self.shelf.write().await;
        for (path, value) in writes {
            shelf.write(&path, value);
        }
        Ok(())
    }

    async fn transaction(
        &self,
        path: &str,
        apply: &(dyn Fn(Option<Value>) -> Value + Send + Sync),
    ) -> Result<()> {
        for attempt in 1..=TRANSACTION_RETRIES {
            let (current, version) = {
                let shelf = self.shelf.read().await;
                (shelf.docs.get(path).cloned(), shelf.version(path))
            };

            let next = apply(current);

            let mut shelf = self.shelf.write().await;
            if shelf.version(path) == version {
                shelf.write(path, next);
                return Ok(());
            }
            debug!(path, attempt, "Transaction conflict, retrying");
        }

        Err(anyhow!(
            "transaction on {path} exhausted {TRANSACTION_RETRIES} attempts"
        ))
    }
}
