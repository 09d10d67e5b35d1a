//! In-process stores for tests and `--dry-run`.
//!
//! Both keep a full history of what was written so tests can assert on the
//! exact sequence of status changes and uploads, and both can be told to fail
//! specific calls.

use super::{ObjectStore, RecordStore};
use crate::error::{StoreError, UploadError};
use crate::job::{field, Fields};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

type Key = (String, String);

fn key(table: &str, id: &str) -> Key {
    (table.to_string(), id.to_string())
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RecordState {
    records: HashMap<Key, Fields>,
    initial: HashMap<Key, Fields>,
    updates: HashMap<Key, Vec<Fields>>,
}

/// [`RecordStore`] over a `HashMap`, with per-record update history.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<RecordState>,
    fail_status: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record.
    pub fn insert(&self, table: &str, id: &str, mut fields: Fields) {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
        let mut state = locked(&self.state);
        state.initial.insert(key(table, id), fields.clone());
        state.records.insert(key(table, id), fields);
    }

    /// Seed a record in `submitted` state.
    pub fn insert_submitted(&self, table: &str, id: &str) {
        let mut fields = Fields::new();
        fields.insert(field::STATUS.into(), Value::String("submitted".into()));
        self.insert(table, id, fields);
    }

    /// Make every update that sets `pdf_status` to `status` fail.
    pub fn fail_updates_setting_status(&self, status: &str) {
        locked(&self.fail_status).insert(status.to_string());
    }

    /// Make every update fail.
    pub fn fail_all_updates(&self) {
        *locked(&self.fail_all) = true;
    }

    /// Current fields of a record.
    pub fn get(&self, table: &str, id: &str) -> Option<Fields> {
        locked(&self.state).records.get(&key(table, id)).cloned()
    }

    /// Every successful update applied to a record, oldest first.
    pub fn updates(&self, table: &str, id: &str) -> Vec<Fields> {
        locked(&self.state)
            .updates
            .get(&key(table, id))
            .cloned()
            .unwrap_or_default()
    }

    /// The status values the record has held, starting with its seeded one.
    pub fn status_history(&self, table: &str, id: &str) -> Vec<String> {
        let state = locked(&self.state);
        let k = key(table, id);
        let initial = state
            .initial
            .get(&k)
            .and_then(|f| f.get(field::STATUS))
            .and_then(Value::as_str)
            .map(str::to_string);
        let changes = state
            .updates
            .get(&k)
            .into_iter()
            .flatten()
            .filter_map(|f| f.get(field::STATUS).and_then(Value::as_str))
            .map(str::to_string);
        initial.into_iter().chain(changes).collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn exists(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        Ok(locked(&self.state).records.contains_key(&key(table, id)))
    }

    async fn update(&self, table: &str, id: &str, fields: &Fields) -> Result<(), StoreError> {
        if *locked(&self.fail_all) {
            return Err(StoreError::Unavailable("updates disabled".into()));
        }
        if let Some(status) = fields.get(field::STATUS).and_then(Value::as_str) {
            if locked(&self.fail_status).contains(status) {
                return Err(StoreError::Unavailable(format!(
                    "refusing to write status '{status}'"
                )));
            }
        }

        let mut state = locked(&self.state);
        let k = key(table, id);
        // PostgREST PATCH on a missing row matches nothing and succeeds.
        if let Some(record) = state.records.get_mut(&k) {
            for (name, value) in fields {
                record.insert(name.clone(), value.clone());
            }
            state.updates.entry(k).or_default().push(fields.clone());
        }
        Ok(())
    }

    async fn read(&self, table: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        Ok(self.get(table, id))
    }
}

// ── Objects ─────────────────────────────────────────────────────────────────

/// One upload received by [`MemoryObjectStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub name: String,
    pub bytes: Vec<u8>,
    pub at: Instant,
}

/// [`ObjectStore`] that keeps uploads in memory and returns `memory://<name>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<StoredObject>>,
    calls: AtomicUsize,
    fail_calls: Mutex<HashSet<usize>>,
    fail_names: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given 0-based calls to `upload`.
    pub fn fail_calls(&self, calls: impl IntoIterator<Item = usize>) {
        locked(&self.fail_calls).extend(calls);
    }

    /// Fail any upload whose object name ends with `suffix`.
    pub fn fail_name(&self, suffix: impl Into<String>) {
        locked(&self.fail_names).insert(suffix.into());
    }

    pub fn fail_all(&self) {
        *locked(&self.fail_all) = true;
    }

    /// Number of upload attempts so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful uploads, in the order they arrived.
    pub fn objects(&self) -> Vec<StoredObject> {
        locked(&self.objects).clone()
    }

    pub fn names(&self) -> Vec<String> {
        locked(&self.objects).iter().map(|o| o.name.clone()).collect()
    }

    pub fn url_for(name: &str) -> String {
        format!("memory://{name}")
    }

    fn should_fail(&self, call: usize, name: &str) -> bool {
        *locked(&self.fail_all)
            || locked(&self.fail_calls).contains(&call)
            || locked(&self.fail_names)
                .iter()
                .any(|suffix| name.ends_with(suffix.as_str()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &Path, name: &str) -> Result<String, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(call, name) {
            return Err(UploadError::Refused {
                name: name.to_string(),
                reason: format!("injected failure on call {call}"),
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| UploadError::Read {
            name: name.to_string(),
            detail: e.to_string(),
        })?;
        locked(&self.objects).push(StoredObject {
            name: name.to_string(),
            bytes,
            at: Instant::now(),
        });
        Ok(Self::url_for(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn records_merge_and_track_history() {
        let store = MemoryRecordStore::new();
        store.insert_submitted("t", "j");
        assert!(store.exists("t", "j").await.unwrap());
        assert!(!store.exists("t", "other").await.unwrap());

        store
            .update("t", "j", &fields(&[("pdf_status", json!("processing"))]))
            .await
            .unwrap();
        store
            .update("t", "j", &fields(&[("anchor_string", json!("##A##"))]))
            .await
            .unwrap();

        let record = store.read("t", "j").await.unwrap().unwrap();
        assert_eq!(record["pdf_status"], "processing");
        assert_eq!(record["anchor_string"], "##A##");
        assert_eq!(record["id"], "j");
        assert_eq!(store.status_history("t", "j"), vec!["submitted", "processing"]);
        assert_eq!(store.updates("t", "j").len(), 2);
    }

    #[tokio::test]
    async fn injected_status_failure() {
        let store = MemoryRecordStore::new();
        store.insert_submitted("t", "j");
        store.fail_updates_setting_status("failed");

        assert!(store
            .update("t", "j", &fields(&[("pdf_status", json!("failed"))]))
            .await
            .is_err());
        assert!(store
            .update("t", "j", &fields(&[("pdf_status", json!("processing"))]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn objects_fail_on_selected_calls() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();

        let store = MemoryObjectStore::new();
        store.fail_calls([1]);
        assert_eq!(store.upload(&file, "a.jpg").await.unwrap(), "memory://a.jpg");
        assert!(store.upload(&file, "b.jpg").await.is_err());
        assert!(store.upload(&file, "c.jpg").await.is_ok());
        assert_eq!(store.call_count(), 3);
        assert_eq!(store.names(), vec!["a.jpg", "c.jpg"]);
    }
}
