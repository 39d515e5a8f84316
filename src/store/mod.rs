//! Hierarchical keyed document store.
//!
//! All pipeline components communicate exclusively through this interface;
//! nothing shares in-process state across runs. The store supports point
//! writes, point and subtree reads, multi-path updates, and an optimistic
//! read-modify-write transaction with automatic retry on conflict.

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Logical root paths used by the pipeline.
pub mod paths {
    /// Raw readings as uploaded by devices.
    pub const LIGHT_SENSOR_DATA: &str = "/light_sensor_data";
    /// Aggregated buckets, keyed `/{geohash}/{time_slot}`.
    pub const AGGREGATED_DATA: &str = "/aggregated_data";
    /// Sky-brightness feed records, newest-first by key.
    pub const OPEN_DATA: &str = "/open_data";
    /// Cloud-cover feed records, newest-first by key.
    pub const CLOUD_DATA: &str = "/cloud_data";
    /// Single analysis document, overwritten wholesale each run.
    pub const ANALYSIS_RESULTS: &str = "/analysis_results";
}

/// Abstraction over the keyed document store backing the pipeline.
///
/// Paths are `/`-separated; documents live at leaf paths. A read of an
/// interior path assembles the nested object below it. No query or index
/// capability is assumed beyond subtree enumeration.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes (or overwrites) the document at `path`.
    async fn put(&self, path: &str, value: Value) -> Result<()>;

    /// Reads the document at `path`, or the assembled subtree below it.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Enumerates the direct children of `path`.
    async fn children(&self, path: &str) -> Result<BTreeMap<String, Value>>;

    /// Applies several point writes as one atomic update.
    async fn update(&self, writes: BTreeMap<String, Value>) -> Result<()>;

    /// Read-modify-write on a single path under optimistic concurrency.
    ///
    /// `apply` maps the current document (or `None`) to its replacement. It
    /// must be a pure function of its input: on a write conflict the store
    /// re-reads and re-invokes it, up to a bounded number of attempts.
    async fn transaction(
        &self,
        path: &str,
        apply: &(dyn Fn(Option<Value>) -> Value + Send + Sync),
    ) -> Result<()>;
}
