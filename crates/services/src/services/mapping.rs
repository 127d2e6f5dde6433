//! Persistent task <-> thread identity map.

use std::{collections::BTreeMap, sync::Arc};

use db::{DbError, MetadataStore, RetryPolicy, models::task::Task, with_store_retry};
use serde::{Deserialize, Serialize};

use super::surface::ThreadId;

pub const MAPPING_BLOB_KEY: &str = "task_thread_mappings";

/// Forward and reverse maps, always mutated together so an entry is in both or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMapping {
    #[serde(default)]
    task_to_thread: BTreeMap<String, ThreadId>,
    #[serde(default)]
    thread_to_task: BTreeMap<ThreadId, String>,
}

impl ThreadMapping {
    pub fn thread_for(&self, task_key: &str) -> Option<ThreadId> {
        self.task_to_thread.get(task_key).copied()
    }

    pub fn task_for(&self, thread: ThreadId) -> Option<&str> {
        self.thread_to_task.get(&thread).map(String::as_str)
    }

    /// Record `task_key <-> thread`, dropping whatever either side pointed at before.
    pub fn link(&mut self, task_key: &str, thread: ThreadId) {
        if let Some(previous) = self.task_to_thread.insert(task_key.to_string(), thread)
            && previous != thread
        {
            self.thread_to_task.remove(&previous);
        }
        if let Some(previous) = self.thread_to_task.insert(thread, task_key.to_string())
            && previous != task_key
        {
            self.task_to_thread.remove(&previous);
        }
    }

    pub fn unlink_task(&mut self, task_key: &str) -> Option<ThreadId> {
        let thread = self.task_to_thread.remove(task_key)?;
        self.thread_to_task.remove(&thread);
        Some(thread)
    }

    pub fn unlink_thread(&mut self, thread: ThreadId) -> Option<String> {
        let task_key = self.thread_to_task.remove(&thread)?;
        self.task_to_thread.remove(&task_key);
        Some(task_key)
    }

    /// Rehome an entry recorded under one of the task's legacy keys onto its
    /// current key. Returns true when the mapping changed.
    pub fn migrate_legacy(&mut self, task: &Task) -> bool {
        let key = task.key();
        if self.task_to_thread.contains_key(&key) {
            return false;
        }
        for legacy in task.legacy_keys() {
            if let Some(thread) = self.task_to_thread.remove(legacy) {
                self.thread_to_task.remove(&thread);
                self.link(&key, thread);
                tracing::info!(task_id = %key, legacy_key = legacy, thread_id = %thread, "Migrated legacy thread mapping");
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.task_to_thread.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_to_thread.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ThreadId)> {
        self.task_to_thread
            .iter()
            .map(|(key, thread)| (key.as_str(), *thread))
    }

    /// Rebuild both maps so they agree. Forward entries win; reverse-only
    /// entries are kept when neither side is already claimed.
    fn repaired(self) -> Self {
        let mut repaired = ThreadMapping::default();
        for (task_key, thread) in &self.task_to_thread {
            if !repaired.thread_to_task.contains_key(thread) {
                repaired.link(task_key, *thread);
            }
        }
        for (thread, task_key) in &self.thread_to_task {
            if !repaired.thread_to_task.contains_key(thread)
                && !repaired.task_to_thread.contains_key(task_key)
            {
                repaired.link(task_key, *thread);
            }
        }
        if repaired != self {
            tracing::warn!(
                before = self.task_to_thread.len(),
                after = repaired.task_to_thread.len(),
                "Repaired inconsistent thread mapping"
            );
        }
        repaired
    }
}

/// Loads and saves the whole mapping as one metadata blob.
#[derive(Clone)]
pub struct MappingStore {
    metadata: Arc<dyn MetadataStore>,
    retry: RetryPolicy,
}

impl MappingStore {
    pub fn new(metadata: Arc<dyn MetadataStore>, retry: RetryPolicy) -> Self {
        Self { metadata, retry }
    }

    pub async fn load(&self) -> Result<ThreadMapping, DbError> {
        let blob = with_store_retry(&self.retry, || self.metadata.get_blob(MAPPING_BLOB_KEY)).await?;
        match blob {
            Some(value) => Ok(serde_json::from_value::<ThreadMapping>(value)?.repaired()),
            None => Ok(ThreadMapping::default()),
        }
    }

    pub async fn save(&self, mapping: &ThreadMapping) -> Result<(), DbError> {
        let value = serde_json::to_value(mapping)?;
        with_store_retry(&self.retry, || {
            self.metadata.set_blob(MAPPING_BLOB_KEY, &value)
        })
        .await
    }
}
