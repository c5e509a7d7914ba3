//! Storage trait definitions for kaijs.
//!
//! These traits are the pipeline's only view of the document DB and the
//! search index. All are async and backend-agnostic; in-memory fakes are
//! provided for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use kaijs_domain::{ArtifactType, SpoolMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::StateResult;

/// Storage ceiling for one artifact document.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Days an invalid-message record is retained before TTL cleanup.
pub const INVALID_RECORD_TTL_DAYS: i64 = 15;

/// A `$set`-style update map: dotted path to new value. Ordered so update
/// statements are deterministic.
pub type UpdateSet = BTreeMap<String, Value>;

/// Result of a find-one-and-update call.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// False when the version filter matched nothing (an OCC conflict).
    pub updated_existing: bool,
    /// The post-image of the document when the update applied.
    pub document: Option<Value>,
}

/// A record for the invalid-message sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidRecord {
    pub broker_msg_id: String,
    pub broker_topic: String,
    pub errmsg: String,
    pub body: Value,
    pub time: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl InvalidRecord {
    /// Build a sink record for a failed envelope.
    pub fn new(env: &SpoolMessage, errmsg: impl Into<String>) -> Self {
        let now = Utc::now();
        InvalidRecord {
            broker_msg_id: env.broker_msg_id.clone(),
            broker_topic: env.broker_topic.clone(),
            errmsg: errmsg.into(),
            body: env.body.clone(),
            time: now,
            expire_at: now + Duration::days(INVALID_RECORD_TTL_DAYS),
        }
    }
}

/// Per-artifact document aggregation.
///
/// Guarantees:
/// - `find_or_create` always returns a valid document, inserting
///   `{type, aid, _version: 1, _updated: now}` when absent.
/// - `find_one_and_update` applies the update set only when the stored
///   `_version` equals `expected_version`, bumps the version, and returns
///   the post-image; a non-matching version reports
///   `updated_existing == false` and never partially applies.
/// - Any write that would produce a document above [`MAX_DOCUMENT_BYTES`]
///   fails with `StateError::DocumentTooLarge`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch the document for `(atype, aid)`, creating it if absent.
    async fn find_or_create(&self, atype: ArtifactType, aid: &str) -> StateResult<Value>;

    /// Version-guarded update; see the trait docs for semantics.
    async fn find_one_and_update(
        &self,
        atype: ArtifactType,
        aid: &str,
        expected_version: u64,
        update_set: &UpdateSet,
    ) -> StateResult<UpdateOutcome>;

    /// Record a message that failed validation (TTL'd sink).
    async fn record_invalid(&self, record: InvalidRecord) -> StateResult<()>;

    /// Record the raw envelope of a processed message.
    async fn record_raw(&self, env: &SpoolMessage) -> StateResult<()>;
}

/// One line pair of a bulk request: the action metadata plus the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexUpdate {
    pub doc_id: String,
    pub index_name: String,
    /// Routing key; equals the parent document id so parents and children
    /// co-locate.
    pub routing: String,
    pub doc: Value,
    /// Document to insert when the id does not exist yet (parent-style
    /// create-only upsert).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<Value>,
    pub doc_as_upsert: bool,
    pub retry_on_conflict: u32,
}

impl IndexUpdate {
    /// Approximate wire size, used by the bulk batcher's byte threshold.
    pub fn approx_bytes(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// Bulk parent/child upserts into the search index.
///
/// A batch either applies completely or fails as a whole: any item-level
/// error must surface as `StateError::Bulk`, and the caller rolls back
/// every envelope that contributed to the batch.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn bulk_update(&self, updates: &[IndexUpdate]) -> StateResult<()>;
}
