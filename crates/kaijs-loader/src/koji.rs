//! Build-system enrichment client.
//!
//! The buildsys-tag handlers enrich tag events with one `getBuild` lookup.
//! The XML-RPC wire client lives outside this crate; the loader consumes
//! this trait and wraps every call in the retry policy below. Replies must
//! pass the `koji_build_info` shape check before they are used.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kaijs_domain::KaijsError;
use rand::Rng;
use serde_json::Value;
use tracing::warn;

/// Client for the build-system `getBuild` call.
#[async_trait]
pub trait KojiClient: Send + Sync {
    async fn get_build(&self, build_id: i64) -> Result<Value, KaijsError>;
}

/// Exponential backoff with full jitter: 5 attempts, factor 3, delays
/// drawn from `0..=min(60s, 1s * 3^attempt)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub factor: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            factor: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(self.factor.saturating_pow(attempt))
            .min(self.cap);
        let millis = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Fetch and shape-check a build, retrying transient failures.
pub async fn get_build_with_retry(
    client: &dyn KojiClient,
    build_id: i64,
    policy: RetryPolicy,
) -> Result<Value, KaijsError> {
    let mut last_err = None;
    for attempt in 0..policy.attempts {
        match client.get_build(build_id).await {
            Ok(build) => {
                kaijs_schemas::special::koji_build_info(&build)?;
                return Ok(build);
            }
            Err(err) => {
                warn!(build_id, attempt, %err, "getBuild failed");
                last_err = Some(err);
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        KaijsError::Storage(format!("getBuild({build_id}) failed with no attempts"))
    }))
}

/// Scripted in-memory client for tests. Optionally fails the first `n`
/// calls to exercise the retry loop.
#[derive(Debug, Default)]
pub struct FakeKojiClient {
    builds: Mutex<HashMap<i64, Value>>,
    fail_first: AtomicU32,
    calls: AtomicU32,
}

impl FakeKojiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, build_id: i64, build: Value) {
        self.builds.lock().unwrap().insert(build_id, build);
    }

    pub fn fail_first(&self, n: u32) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KojiClient for FakeKojiClient {
    async fn get_build(&self, build_id: i64) -> Result<Value, KaijsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(KaijsError::Storage("injected getBuild failure".to_string()));
        }
        self.builds
            .lock()
            .unwrap()
            .get(&build_id)
            .cloned()
            .ok_or_else(|| KaijsError::Storage(format!("no such build: {build_id}")))
    }
}

/// Placeholder for deployments without an enrichment backend; every call
/// fails, which the loop treats as fatal.
#[derive(Debug, Default)]
pub struct UnconfiguredKojiClient;

#[async_trait]
impl KojiClient for UnconfiguredKojiClient {
    async fn get_build(&self, build_id: i64) -> Result<Value, KaijsError> {
        Err(KaijsError::Storage(format!(
            "build-system client not configured; cannot enrich build {build_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_build() -> Value {
        json!({
            "task_id": 111,
            "nvr": "gcompris-qt-1.1-1.fc33",
            "owner_name": "bodhi",
            "extra": {"source": {"original_url": "git://src/gcompris-qt"}}
        })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let client = FakeKojiClient::new();
        client.insert(1_728_223, valid_build());
        client.fail_first(2);

        let build = get_build_with_retry(&client, 1_728_223, fast_policy())
            .await
            .unwrap();
        assert_eq!(build["nvr"], json!("gcompris-qt-1.1-1.fc33"));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_five_attempts() {
        let client = FakeKojiClient::new();
        client.insert(1_728_223, valid_build());
        client.fail_first(10);

        let err = get_build_with_retry(&client, 1_728_223, fast_policy()).await;
        assert!(err.is_err());
        assert_eq!(client.calls(), 5);
    }

    #[tokio::test]
    async fn malformed_reply_is_rejected_without_retry_exhaustion() {
        let client = FakeKojiClient::new();
        client.insert(7, json!({"task_id": null, "nvr": "x", "owner_name": "o"}));

        let err = get_build_with_retry(&client, 7, fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, KaijsError::Validation(_)));
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            assert!(policy.backoff(attempt) <= Duration::from_secs(60));
        }
    }
}
