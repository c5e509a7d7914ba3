//! The search-index writer.
//!
//! Updates are batched and flushed in bulk when any threshold trips:
//! pending count, pending byte size, or idle time since the last envelope.
//! A batch commits or fails as a whole; on failure every envelope that
//! contributed is rolled back to the spool and the loader exits non-zero.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kaijs_domain::{ArtifactType, KaijsError, SpoolMessage};
use kaijs_fq::ClaimedEntry;
use kaijs_state::{IndexUpdate, SearchIndex};
use serde_json::json;
use tracing::{debug, info, warn};

/// Conflict retries requested per bulk line.
pub const RETRY_ON_CONFLICT: u32 = 10;

/// Bodies above this UTF-8 size are not stored in the invalid index.
pub const INVALID_BODY_MAX_BYTES: usize = 17_800_000;

/// Replacement body for oversized invalid messages.
pub const TRUNCATION_NOTE: &str = "Message is bigger than 16Mb. Cannot store.";

/// Which broker community an envelope belongs to; part of the index name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexContext {
    Redhat,
    Centos,
    Fedora,
    Any,
}

impl IndexContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexContext::Redhat => "redhat",
            IndexContext::Centos => "centos",
            IndexContext::Fedora => "fedora",
            IndexContext::Any => "any",
        }
    }
}

/// Derive the index context from the topic's broker namespace.
pub fn context_from_topic(topic: &str) -> IndexContext {
    if topic.starts_with("VirtualTopic.") {
        IndexContext::Redhat
    } else if topic.starts_with("org.centos.") {
        IndexContext::Centos
    } else if topic.starts_with("org.fedoraproject.") {
        IndexContext::Fedora
    } else {
        IndexContext::Any
    }
}

/// `<prefix><context>-<kind>`; a pure function of the context and family.
pub fn index_name(prefix: &str, context: IndexContext, atype: ArtifactType) -> String {
    format!("{prefix}{}-{}", context.as_str(), atype.as_str())
}

/// The index for messages that failed validation or dispatch.
pub fn invalid_index_name(prefix: &str) -> String {
    format!("{prefix}invalid-messages")
}

/// Build the invalid-messages document for a failed envelope.
pub fn invalid_message_update(
    prefix: &str,
    env: &SpoolMessage,
    errmsg: &str,
) -> IndexUpdate {
    let body_bytes = serde_json::to_string(&env.body)
        .map(|s| s.len())
        .unwrap_or(usize::MAX);
    let body = if body_bytes > INVALID_BODY_MAX_BYTES {
        json!(TRUNCATION_NOTE)
    } else {
        env.body.clone()
    };
    IndexUpdate {
        doc_id: env.broker_msg_id.clone(),
        index_name: invalid_index_name(prefix),
        routing: env.broker_msg_id.clone(),
        doc: json!({
            "broker_msg_id": env.broker_msg_id,
            "broker_topic": env.broker_topic,
            "errmsg": errmsg,
            "body": body,
            "time": env.provider_ts,
        }),
        upsert: None,
        doc_as_upsert: true,
        retry_on_conflict: RETRY_ON_CONFLICT,
    }
}

/// Flush thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BulkConfig {
    pub max_updates: usize,
    pub max_bytes: usize,
    pub idle: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        BulkConfig {
            max_updates: 100,
            max_bytes: 50 * 1024 * 1024,
            idle: Duration::from_secs(3),
        }
    }
}

/// The bulk batcher. Claims stay open until their batch flushes; exactly
/// one of commit (flush succeeded) or rollback (flush failed or shutdown)
/// happens for each.
pub struct IndexWriter {
    index: Arc<dyn SearchIndex>,
    config: BulkConfig,
    pending: Vec<IndexUpdate>,
    claims: Vec<ClaimedEntry>,
    pending_bytes: usize,
    last_received: Option<Instant>,
}

impl IndexWriter {
    pub fn new(index: Arc<dyn SearchIndex>, config: BulkConfig) -> Self {
        IndexWriter {
            index,
            config,
            pending: Vec::new(),
            claims: Vec::new(),
            pending_bytes: 0,
            last_received: None,
        }
    }

    /// Stage the updates of one envelope; its claim commits on flush.
    pub fn submit(&mut self, updates: Vec<IndexUpdate>, claim: ClaimedEntry) {
        self.pending_bytes += updates.iter().map(IndexUpdate::approx_bytes).sum::<usize>();
        self.pending.extend(updates);
        self.claims.push(claim);
        self.last_received = Some(Instant::now());
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a size threshold has tripped.
    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.config.max_updates
            || self.pending_bytes >= self.config.max_bytes
    }

    /// When the idle threshold will trip, if anything is pending.
    pub fn idle_deadline(&self) -> Option<Instant> {
        let last = self.last_received?;
        if self.pending.is_empty() {
            None
        } else {
            Some(last + self.config.idle)
        }
    }

    /// Issue one bulk request for everything pending.
    ///
    /// On success every contributing envelope is committed; on failure
    /// every one is rolled back and the error is fatal.
    pub async fn flush(&mut self) -> Result<(), KaijsError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let updates = std::mem::take(&mut self.pending);
        let claims = std::mem::take(&mut self.claims);
        self.pending_bytes = 0;

        match self.index.bulk_update(&updates).await {
            Ok(()) => {
                debug!(updates = updates.len(), "bulk flush committed");
                for claim in claims {
                    claim
                        .commit()
                        .map_err(|e| KaijsError::Storage(e.to_string()))?;
                }
                Ok(())
            }
            Err(err) => {
                warn!(%err, updates = updates.len(), "bulk flush failed, rolling back batch");
                for claim in claims {
                    if let Err(rb) = claim.rollback() {
                        warn!(%rb, "rollback of a batched envelope failed");
                    }
                }
                Err(KaijsError::BulkFlush(err.to_string()))
            }
        }
    }

    /// Return every staged envelope to the spool without flushing.
    pub fn rollback_pending(&mut self) {
        let claims = std::mem::take(&mut self.claims);
        if !claims.is_empty() {
            info!(envelopes = claims.len(), "returning staged envelopes to the spool");
        }
        for claim in claims {
            if let Err(err) = claim.rollback() {
                warn!(%err, "rollback on shutdown failed");
            }
        }
        self.pending.clear();
        self.pending_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_derived_from_the_broker_namespace() {
        assert_eq!(
            context_from_topic("VirtualTopic.eng.ci.osci.brew-build.test.complete"),
            IndexContext::Redhat
        );
        assert_eq!(
            context_from_topic("org.centos.prod.ci.koji-build.test.complete"),
            IndexContext::Centos
        );
        assert_eq!(
            context_from_topic("org.fedoraproject.prod.buildsys.tag"),
            IndexContext::Fedora
        );
        assert_eq!(context_from_topic("some.other.topic"), IndexContext::Any);
    }

    #[test]
    fn index_names_compose_prefix_context_and_kind() {
        assert_eq!(
            index_name("kaijs-", IndexContext::Redhat, ArtifactType::BrewBuild),
            "kaijs-redhat-brew-build"
        );
        assert_eq!(invalid_index_name("kaijs-"), "kaijs-invalid-messages");
    }

    #[test]
    fn oversized_invalid_bodies_are_replaced_with_the_note() {
        let big = "x".repeat(INVALID_BODY_MAX_BYTES + 16);
        let env = SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-1",
            "a.ci.b.test.complete",
            json!({"blob": big}),
            json!({}),
            None,
        );
        let update = invalid_message_update("kaijs-", &env, "too big");
        assert_eq!(update.doc["body"], json!(TRUNCATION_NOTE));

        let small = SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-2",
            "a.ci.b.test.complete",
            json!({"ok": true}),
            json!({}),
            None,
        );
        let update = invalid_message_update("kaijs-", &small, "bad");
        assert_eq!(update.doc["body"], json!({"ok": true}));
    }
}
