//! In-memory fakes for the storage traits (testing only).
//!
//! `MemoryArtifactStore` reproduces the exact find-one-and-update semantics
//! of the production backend, including version-mismatch conflicts. An
//! injectable conflict counter lets tests exercise the writer's retry loop.
//! `MemorySearchIndex` records bulk batches for assertions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use kaijs_domain::{ArtifactType, SpoolMessage};
use serde_json::{json, Value};

use crate::paths::set_path;
use crate::storage_traits::*;
use crate::{StateError, StateResult};

/// In-memory artifact store backed by a `HashMap<(type, aid), document>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    docs: Mutex<HashMap<(String, String), Value>>,
    invalid: Mutex<Vec<InvalidRecord>>,
    raw: Mutex<Vec<SpoolMessage>>,
    inject_conflicts: AtomicU32,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` find-one-and-update calls report a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.inject_conflicts.store(n, Ordering::SeqCst);
    }

    /// The stored document, if any.
    pub fn document(&self, atype: ArtifactType, aid: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap()
            .get(&(atype.as_str().to_string(), aid.to_string()))
            .cloned()
    }

    /// Number of artifact documents.
    pub fn document_count(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    /// Records accumulated in the invalid sink.
    pub fn invalid_records(&self) -> Vec<InvalidRecord> {
        self.invalid.lock().unwrap().clone()
    }

    /// Number of raw envelopes recorded.
    pub fn raw_count(&self) -> usize {
        self.raw.lock().unwrap().len()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn find_or_create(&self, atype: ArtifactType, aid: &str) -> StateResult<Value> {
        let mut docs = self.docs.lock().unwrap();
        let key = (atype.as_str().to_string(), aid.to_string());
        let doc = docs.entry(key).or_insert_with(|| {
            json!({
                "_id": format!("{}-{}", atype.as_str(), aid),
                "_version": 1,
                "_updated": Utc::now().to_rfc3339(),
                "type": atype.as_str(),
                "aid": aid,
            })
        });
        Ok(doc.clone())
    }

    async fn find_one_and_update(
        &self,
        atype: ArtifactType,
        aid: &str,
        expected_version: u64,
        update_set: &UpdateSet,
    ) -> StateResult<UpdateOutcome> {
        if self
            .inject_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(UpdateOutcome {
                updated_existing: false,
                document: None,
            });
        }

        let mut docs = self.docs.lock().unwrap();
        let key = (atype.as_str().to_string(), aid.to_string());
        let Some(doc) = docs.get_mut(&key) else {
            return Ok(UpdateOutcome {
                updated_existing: false,
                document: None,
            });
        };
        if doc.get("_version").and_then(Value::as_u64) != Some(expected_version) {
            return Ok(UpdateOutcome {
                updated_existing: false,
                document: None,
            });
        }

        let mut next = doc.clone();
        set_path(&mut next, "_version", json!(expected_version + 1));
        set_path(&mut next, "_updated", json!(Utc::now().to_rfc3339()));
        for (path, value) in update_set {
            set_path(&mut next, path, value.clone());
        }

        let size = serde_json::to_vec(&next)?.len();
        if size > MAX_DOCUMENT_BYTES {
            return Err(StateError::DocumentTooLarge { size });
        }

        *doc = next.clone();
        Ok(UpdateOutcome {
            updated_existing: true,
            document: Some(next),
        })
    }

    async fn record_invalid(&self, record: InvalidRecord) -> StateResult<()> {
        self.invalid.lock().unwrap().push(record);
        Ok(())
    }

    async fn record_raw(&self, env: &SpoolMessage) -> StateResult<()> {
        self.raw.lock().unwrap().push(env.clone());
        Ok(())
    }
}

/// In-memory search index that records every bulk batch.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    batches: Mutex<Vec<Vec<IndexUpdate>>>,
    fail_batches: AtomicU32,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` bulk calls fail with `StateError::Bulk`.
    pub fn inject_failures(&self, n: u32) {
        self.fail_batches.store(n, Ordering::SeqCst);
    }

    /// Every batch received so far, in order.
    pub fn batches(&self) -> Vec<Vec<IndexUpdate>> {
        self.batches.lock().unwrap().clone()
    }

    /// Flattened view of all updates.
    pub fn updates(&self) -> Vec<IndexUpdate> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn bulk_update(&self, updates: &[IndexUpdate]) -> StateResult<()> {
        if self
            .fail_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StateError::Bulk("injected bulk failure".to_string()));
        }
        self.batches.lock().unwrap().push(updates.to_vec());
        Ok(())
    }
}
