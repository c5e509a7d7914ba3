//! SurrealDB-backed artifact store.
//!
//! Three tables: `artifacts` (one row per `(type, aid)`, unique index),
//! `validation_errors` (TTL'd invalid sink) and `raw_messages`. The artifact
//! document itself lives in the flexible `doc` field; the version guard of
//! `find_one_and_update` is expressed in the WHERE clause, so an update
//! against a stale `_version` matches nothing and signals a conflict.

use async_trait::async_trait;
use chrono::Utc;
use kaijs_domain::{ArtifactType, SpoolMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::storage_traits::*;
use crate::{StateError, StateResult};

/// SurrealDB-backed artifact store.
#[derive(Clone)]
pub struct SurrealArtifactStore {
    db: Surreal<Any>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactRow {
    atype: String,
    aid: String,
    doc: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvalidRow {
    broker_msg_id: String,
    broker_topic: String,
    errmsg: String,
    body: Value,
    time: String,
    expire_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRow {
    spool_id: String,
    broker_msg_id: String,
    broker_topic: String,
    envelope: Value,
    time: String,
}

impl SurrealArtifactStore {
    /// Wrap an existing SurrealDB connection.
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Connect to an in-memory SurrealDB (tests).
    pub async fn in_memory() -> StateResult<Self> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        db.use_ns("kaijs")
            .use_db("artifacts")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// Connect to a remote endpoint with optional credentials.
    pub async fn connect(
        endpoint: &str,
        namespace: &str,
        database: &str,
        credentials: Option<(&str, &str)>,
    ) -> StateResult<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StateError::Connection(format!("connect to {endpoint}: {e}")))?;
        if let Some((username, password)) = credentials {
            db.signin(surrealdb::opt::auth::Root { username, password })
                .await
                .map_err(|e| StateError::Connection(format!("auth: {e}")))?;
        }
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    pub async fn init_schema(&self) -> StateResult<()> {
        let schema = r#"
            DEFINE TABLE IF NOT EXISTS artifacts SCHEMAFULL;
            DEFINE FIELD atype ON artifacts TYPE string;
            DEFINE FIELD aid ON artifacts TYPE string;
            DEFINE FIELD doc ON artifacts FLEXIBLE TYPE object;
            DEFINE INDEX IF NOT EXISTS idx_artifacts_type_aid ON artifacts FIELDS atype, aid UNIQUE;

            DEFINE TABLE IF NOT EXISTS validation_errors SCHEMAFULL;
            DEFINE FIELD broker_msg_id ON validation_errors TYPE string;
            DEFINE FIELD broker_topic ON validation_errors TYPE string;
            DEFINE FIELD errmsg ON validation_errors TYPE string;
            DEFINE FIELD body ON validation_errors FLEXIBLE TYPE any;
            DEFINE FIELD time ON validation_errors TYPE string;
            DEFINE FIELD expire_at ON validation_errors TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_invalid_expire ON validation_errors FIELDS expire_at;

            DEFINE TABLE IF NOT EXISTS raw_messages SCHEMAFULL;
            DEFINE FIELD spool_id ON raw_messages TYPE string;
            DEFINE FIELD broker_msg_id ON raw_messages TYPE string;
            DEFINE FIELD broker_topic ON raw_messages TYPE string;
            DEFINE FIELD envelope ON raw_messages FLEXIBLE TYPE object;
            DEFINE FIELD time ON raw_messages TYPE string;
            DEFINE INDEX IF NOT EXISTS idx_raw_msg_id ON raw_messages FIELDS broker_msg_id;
        "#;
        self.db
            .query(schema)
            .await
            .map_err(|e| StateError::Query(format!("schema init: {e}")))?;
        debug!("artifact store schema initialized");
        Ok(())
    }

    async fn find(&self, atype: ArtifactType, aid: &str) -> StateResult<Option<Value>> {
        let mut result = self
            .db
            .query("SELECT * OMIT id FROM artifacts WHERE atype = $t AND aid = $a")
            .bind(("t", atype.as_str().to_string()))
            .bind(("a", aid.to_string()))
            .await
            .map_err(StateError::from)?;
        let rows: Vec<ArtifactRow> = result.take(0).map_err(StateError::from)?;
        Ok(rows.into_iter().next().map(|row| row.doc))
    }
}

/// A dotted document path that is safe to splice into a SET clause.
fn checked_path(path: &str) -> StateResult<&str> {
    let ok = !path.is_empty()
        && path.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if ok {
        Ok(path)
    } else {
        Err(StateError::Query(format!("unsafe update path: {path}")))
    }
}

#[async_trait]
impl ArtifactStore for SurrealArtifactStore {
    #[instrument(skip(self), fields(atype = %atype, aid = %aid))]
    async fn find_or_create(&self, atype: ArtifactType, aid: &str) -> StateResult<Value> {
        if let Some(doc) = self.find(atype, aid).await? {
            return Ok(doc);
        }
        let row = ArtifactRow {
            atype: atype.as_str().to_string(),
            aid: aid.to_string(),
            doc: json!({
                "_id": format!("{}-{}", atype.as_str(), aid),
                "_version": 1,
                "_updated": Utc::now().to_rfc3339(),
                "type": atype.as_str(),
                "aid": aid,
            }),
        };
        let created: Result<Option<ArtifactRow>, surrealdb::Error> =
            self.db.create("artifacts").content(row).await;
        match created {
            Ok(Some(row)) => Ok(row.doc),
            Ok(None) => Err(StateError::NotFound(format!(
                "{}-{aid} vanished on create",
                atype.as_str()
            ))),
            // Unique-index race with a concurrent writer: re-read.
            Err(_) => self.find(atype, aid).await?.ok_or_else(|| {
                StateError::NotFound(format!("{}-{aid} after create race", atype.as_str()))
            }),
        }
    }

    #[instrument(skip(self, update_set), fields(atype = %atype, aid = %aid, v = expected_version))]
    async fn find_one_and_update(
        &self,
        atype: ArtifactType,
        aid: &str,
        expected_version: u64,
        update_set: &UpdateSet,
    ) -> StateResult<UpdateOutcome> {
        let size: usize = serde_json::to_vec(update_set)?.len();
        if size > MAX_DOCUMENT_BYTES {
            return Err(StateError::DocumentTooLarge { size });
        }

        let mut statement = String::from(
            "UPDATE artifacts SET doc._version = doc._version + 1, doc._updated = $now",
        );
        for (idx, (path, _)) in update_set.iter().enumerate() {
            statement.push_str(&format!(", doc.{} = $p{idx}", checked_path(path)?));
        }
        statement.push_str(
            " WHERE atype = $t AND aid = $a AND doc._version = $v RETURN AFTER",
        );

        let mut query = self
            .db
            .query(statement)
            .bind(("now", Utc::now().to_rfc3339()))
            .bind(("t", atype.as_str().to_string()))
            .bind(("a", aid.to_string()))
            .bind(("v", expected_version));
        for (idx, (_, value)) in update_set.iter().enumerate() {
            query = query.bind((format!("p{idx}"), value.clone()));
        }

        let mut result = query.await.map_err(StateError::from)?;
        let rows: Vec<ArtifactRow> = result.take(0).map_err(StateError::from)?;
        match rows.into_iter().next() {
            Some(row) => {
                let size = serde_json::to_vec(&row.doc)?.len();
                if size > MAX_DOCUMENT_BYTES {
                    return Err(StateError::DocumentTooLarge { size });
                }
                Ok(UpdateOutcome {
                    updated_existing: true,
                    document: Some(row.doc),
                })
            }
            None => Ok(UpdateOutcome {
                updated_existing: false,
                document: None,
            }),
        }
    }

    #[instrument(skip(self, record), fields(msg = %record.broker_msg_id))]
    async fn record_invalid(&self, record: InvalidRecord) -> StateResult<()> {
        let row = InvalidRow {
            broker_msg_id: record.broker_msg_id,
            broker_topic: record.broker_topic,
            errmsg: record.errmsg,
            body: record.body,
            time: record.time.to_rfc3339(),
            expire_at: record.expire_at.to_rfc3339(),
        };
        let _created: Option<InvalidRow> = self
            .db
            .create("validation_errors")
            .content(row)
            .await
            .map_err(StateError::from)?;
        Ok(())
    }

    #[instrument(skip(self, env), fields(msg = %env.broker_msg_id))]
    async fn record_raw(&self, env: &SpoolMessage) -> StateResult<()> {
        let row = RawRow {
            spool_id: env.spool_id.clone(),
            broker_msg_id: env.broker_msg_id.clone(),
            broker_topic: env.broker_topic.clone(),
            envelope: serde_json::to_value(env)?,
            time: Utc::now().to_rfc3339(),
        };
        let _created: Option<RawRow> = self
            .db
            .create("raw_messages")
            .content(row)
            .await
            .map_err(StateError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_paths_are_rejected() {
        assert!(checked_path("rpm_build.nvr").is_ok());
        assert!(checked_path("states").is_ok());
        assert!(checked_path("a.b; DROP TABLE artifacts").is_err());
        assert!(checked_path("a..b").is_err());
        assert!(checked_path("").is_err());
    }
}
