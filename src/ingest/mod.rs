//! Periodic ingestion of external observation feeds.
//!
//! Both feeds share the same shape: fetch, parse, deduplicate against the
//! natural keys already in the store, cap the batch, persist under strictly
//! decreasing keys so newest-first ordering falls out of key order.

pub mod cloud;
pub mod sky;

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

use crate::store::DocumentStore;

/// Rebuilds the deduplication index for one feed: the set of natural-key
/// values (`field`) across every record stored under `path`.
///
/// A full scan per run; the feeds are small enough that no secondary index
/// is kept.
pub(crate) async fn load_existing_keys(
    store: &dyn DocumentStore,
    path: &str,
    field: &str,
) -> Result<HashSet<String>> {
    let records = store.children(path).await?;

    let mut keys = HashSet::new();
    for record in records.values() {
        if let Some(key) = record.get(field).and_then(Value::as_str) {
            keys.insert(key.to_string());
        }
    }

    info!(path, count = keys.len(), "Loaded existing dedup keys");
    Ok(keys)
}

/// Issues strictly decreasing record keys within one ingestion run.
///
/// Keys are `key_{-millis}`; negating the ingestion time makes lexicographic
/// key order newest-first. The millis value ticks forward per record so two
/// records accepted in the same run never collide.
pub(crate) struct RecordKeys {
    next_millis: i64,
}

impl RecordKeys {
    pub fn starting_now() -> Self {
        Self {
            next_millis: Utc::now().timestamp_millis(),
        }
    }

    #[cfg(test)]
    pub fn starting_at(millis: i64) -> Self {
        Self {
            next_millis: millis,
        }
    }

    /// Returns the next `(store key, negated timestamp)` pair.
    pub fn next(&mut self) -> (String, i64) {
        let negated = -self.next_millis;
        self.next_millis += 1;
        (format!("key_{negated}"), negated)
    }
}
