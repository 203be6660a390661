// src/exec/context.rs

//! Shared, write-once execution context for one workflow run.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Plain key → value map used for task inputs and outputs.
pub type ContextMap = BTreeMap<String, Value>;

/// The workflow-wide context.
///
/// Reads take a snapshot; writes happen once per stage completion through
/// [`ExecutionContext::commit`], which holds the write lock for the whole
/// batch so concurrently finishing stages never interleave their keys.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Arc<RwLock<ContextMap>>,
}

impl ExecutionContext {
    pub fn new(seed: ContextMap) -> Self {
        Self {
            values: Arc::new(RwLock::new(seed)),
        }
    }

    pub async fn snapshot(&self) -> ContextMap {
        self.values.read().await.clone()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.values.read().await.get(key).cloned()
    }

    /// Commit a stage's outputs.
    ///
    /// Keys are write-once: if any key already exists nothing is written and
    /// the offending key is returned.
    pub async fn commit(&self, outputs: ContextMap) -> Result<(), String> {
        let mut values = self.values.write().await;

        if let Some(existing) = outputs.keys().find(|k| values.contains_key(*k)) {
            return Err(existing.clone());
        }

        debug!(keys = ?outputs.keys().collect::<Vec<_>>(), "committing stage outputs");
        values.extend(outputs);
        Ok(())
    }
}

/// Restrict `available` to `keys`.
///
/// Returns the names of every missing key on failure.
pub fn project(available: &ContextMap, keys: &[String]) -> Result<ContextMap, Vec<String>> {
    let mut view = ContextMap::new();
    let mut missing = Vec::new();

    for key in keys {
        match available.get(key) {
            Some(v) => {
                view.insert(key.clone(), v.clone());
            }
            None => missing.push(key.clone()),
        }
    }

    if missing.is_empty() {
        Ok(view)
    } else {
        Err(missing)
    }
}
