//! Thread-id derivation.
//!
//! The thread id correlates every message belonging to one CI pipeline run.
//! Preference order: `body.pipeline.id`, then `body.thread_id`, then a
//! deterministic digest anchored on `run.url`.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::KaijsError;
use crate::state::Stage;

/// Derive the thread id for a message body.
///
/// When neither `pipeline.id` nor `thread_id` is present, the fallback is
/// `"dummy-thread-" + sha256(run.url)`. For test-stage messages the test
/// case name is mixed into the digest so parallel test runs on one
/// pipeline URL stay distinct.
pub fn derive_thread_id(
    body: &Value,
    stage: Stage,
    test_case_name: Option<&str>,
) -> Result<String, KaijsError> {
    if let Some(id) = non_empty_str(body.pointer("/pipeline/id")) {
        return Ok(id.to_string());
    }
    if let Some(id) = non_empty_str(body.get("thread_id")) {
        return Ok(id.to_string());
    }
    if let Some(url) = non_empty_str(body.pointer("/run/url")) {
        let mut anchor = url.to_string();
        if stage == Stage::Test {
            if let Some(tcn) = test_case_name {
                anchor.push('~');
                anchor.push_str(tcn);
            }
        }
        let digest = Sha256::digest(anchor.as_bytes());
        return Ok(format!("dummy-thread-{}", hex::encode(digest)));
    }
    Err(KaijsError::NoThreadId(
        "no pipeline.id, thread_id, or run.url in body".to_string(),
    ))
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
