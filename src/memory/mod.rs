//! Shared Memory: the single in-run data bus between nodes (spec §3.1, §5).
//!
//! `SharedMemory` is a keyed store of `serde_json::Value`. Nodes never touch
//! it directly: the executor hands each node a [`ScopedMemory`] view limited
//! to the keys the node's [`NodeSpec`](crate::graph::NodeSpec) declares, the
//! way the teacher's `Store` is namespace-scoped per caller.

mod error;
mod scoped;

pub use error::MemoryError;
pub use scoped::ScopedMemory;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// Keyed store shared across all node visits in one run.
///
/// Cloning is cheap (`Arc` inside); every clone sees the same underlying
/// map. Writes are serialized by the lock because the executor's main loop
/// is single-threaded (spec §5) — the lock exists for API uniformity with
/// async collaborators, not to arbitrate real contention.
#[derive(Clone, Debug, Default)]
pub struct SharedMemory {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds memory from a resumed session's snapshot, then overlays `input`
    /// on top per spec §4.1 Initialization ("new input wins").
    pub async fn restore(session_memory: Option<HashMap<String, Value>>, input: Option<HashMap<String, Value>>) -> Self {
        let mem = Self::new();
        if let Some(snapshot) = session_memory {
            let mut guard = mem.inner.write().await;
            for (k, v) in snapshot {
                guard.insert(k, v);
            }
        }
        if let Some(input) = input {
            let mut guard = mem.inner.write().await;
            for (k, v) in input {
                guard.insert(k, v);
            }
        }
        mem
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.write().await.insert(key.into(), value);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.contains_key(key)
    }

    /// Full snapshot, used for `ExecutionResult::output` and session bundles.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().await.clone()
    }

    /// A view restricted to `input_keys`/`output_keys` for one node visit.
    pub fn scoped(&self, input_keys: Vec<String>, output_keys: Vec<String>) -> ScopedMemory {
        ScopedMemory::new(self.clone(), input_keys, output_keys)
    }
}
