//! Durable file-backed spool between listener and loader.
//!
//! Single logical FIFO with one file per envelope. The queue is
//! single-producer/single-consumer per configuration; the transactional pop
//! is the only synchronization primitive.
//!
//! Layout under the queue root:
//!
//! - `new/`: envelopes waiting for the consumer.
//! - `claim/`: envelopes claimed by `tpop` but not yet committed. On
//!   restart everything here is treated as active again (at-least-once).
//! - `tmp/`: staging area so `push` can rename atomically into `new/`.
//! - `corrupt/`: quarantine for entries that fail JSON decoding; a broken
//!   file must not wedge the queue.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kaijs_domain::SpoolMessage;
use tokio::sync::Notify;
use tracing::warn;

/// At most this many directory entries are examined per `tpop` scan, so a
/// very large backlog cannot make a single pop unbounded.
pub const SCAN_LIMIT: usize = 32;

/// Default cross-process polling interval for `wait_for_entry`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// File-queue errors.
#[derive(Debug, thiserror::Error)]
pub enum FqError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for file-queue operations.
pub type Result<T> = std::result::Result<T, FqError>;

/// A claimed envelope. Exactly one of `commit` or `rollback` must be called;
/// dropping the guard leaves the file in `claim/`, where the next `open`
/// recovers it.
#[derive(Debug)]
pub struct ClaimedEntry {
    new_path: PathBuf,
    claim_path: PathBuf,
}

impl ClaimedEntry {
    /// Delete the entry; its effects are durable downstream.
    pub fn commit(self) -> Result<()> {
        fs::remove_file(&self.claim_path)?;
        Ok(())
    }

    /// Return the entry to the active directory for redelivery.
    pub fn rollback(self) -> Result<()> {
        fs::rename(&self.claim_path, &self.new_path)?;
        Ok(())
    }

    /// The file name of the claimed entry.
    pub fn file_name(&self) -> &str {
        self.claim_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// The durable spool.
pub struct FileQueue {
    new_dir: PathBuf,
    claim_dir: PathBuf,
    tmp_dir: PathBuf,
    corrupt_dir: PathBuf,
    seq: AtomicU64,
    notify: Notify,
    poll_interval: Duration,
}

impl FileQueue {
    /// Open (and create) a queue rooted at `root`, recovering any entries a
    /// previous process left claimed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let queue = FileQueue {
            new_dir: root.join("new"),
            claim_dir: root.join("claim"),
            tmp_dir: root.join("tmp"),
            corrupt_dir: root.join("corrupt"),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        for dir in [
            &queue.new_dir,
            &queue.claim_dir,
            &queue.tmp_dir,
            &queue.corrupt_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        queue.recover()?;
        Ok(queue)
    }

    /// Override the cross-process polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Move every file left in `claim/` back into `new/`.
    fn recover(&self) -> Result<()> {
        for entry in fs::read_dir(&self.claim_dir)? {
            let entry = entry?;
            let target = self.new_dir.join(entry.file_name());
            warn!(
                entry = %entry.file_name().to_string_lossy(),
                "recovering claimed spool entry"
            );
            fs::rename(entry.path(), target)?;
        }
        Ok(())
    }

    /// Append an envelope. The write is staged in `tmp/` and renamed into
    /// `new/`, so the consumer never observes a partial file.
    pub fn push(&self, env: &SpoolMessage) -> Result<()> {
        let name = self.entry_name(env);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.tmp_dir)?;
        serde_json::to_writer(&mut tmp, env)?;
        tmp.flush()?;
        tmp.persist(self.new_dir.join(name)).map_err(|e| e.error)?;
        self.notify.notify_one();
        Ok(())
    }

    /// Claim the oldest envelope, if any.
    ///
    /// The scan examines at most [`SCAN_LIMIT`] directory entries and claims
    /// the lexicographically smallest, which is FIFO by enqueue time given
    /// the file naming. Undecodable entries are quarantined and skipped.
    pub fn tpop(&self) -> Result<Option<(SpoolMessage, ClaimedEntry)>> {
        loop {
            let Some(name) = self.oldest_entry()? else {
                return Ok(None);
            };
            let new_path = self.new_dir.join(&name);
            let claim_path = self.claim_dir.join(&name);
            match fs::rename(&new_path, &claim_path) {
                Ok(()) => {}
                // Raced with clear(); rescan.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            let bytes = fs::read(&claim_path)?;
            match serde_json::from_slice::<SpoolMessage>(&bytes) {
                Ok(env) => {
                    return Ok(Some((
                        env,
                        ClaimedEntry {
                            new_path,
                            claim_path,
                        },
                    )))
                }
                Err(err) => {
                    warn!(entry = %name, %err, "quarantining undecodable spool entry");
                    fs::rename(&claim_path, self.corrupt_dir.join(&name))?;
                }
            }
        }
    }

    /// Wait until at least one envelope is present.
    ///
    /// Combines the in-process push notification with a polling timer for
    /// producers in other processes, where file events are unreliable.
    pub async fn wait_for_entry(&self) -> Result<()> {
        loop {
            if self.len()? > 0 {
                return Ok(());
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Number of envelopes waiting in the active directory.
    pub fn len(&self) -> Result<usize> {
        Ok(fs::read_dir(&self.new_dir)?.count())
    }

    /// Whether the active directory is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(fs::read_dir(&self.new_dir)?.next().is_none())
    }

    /// Remove every waiting envelope. Claimed entries are untouched.
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.new_dir)? {
            fs::remove_file(entry?.path())?;
        }
        Ok(())
    }

    fn entry_name(&self, env: &SpoolMessage) -> String {
        // Timestamp first, then a per-process counter: lexicographic order
        // stays FIFO even for pushes within the same second.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{:010}-{:06}-{}.json",
            env.provider_ts,
            seq,
            sanitize(&env.broker_msg_id)
        )
    }

    fn oldest_entry(&self) -> Result<Option<String>> {
        let mut oldest: Option<String> = None;
        for entry in fs::read_dir(&self.new_dir)?.take(SCAN_LIMIT) {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if oldest.as_deref().map_or(true, |cur| name.as_str() < cur) {
                oldest = Some(name);
            }
        }
        Ok(oldest)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(ts: i64, msg_id: &str) -> SpoolMessage {
        SpoolMessage::new_at(
            ts,
            "umb",
            msg_id,
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            json!({"version": "1.1.14"}),
            json!({}),
            None,
        )
    }

    fn open_queue() -> (tempfile::TempDir, FileQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = FileQueue::open(dir.path()).unwrap();
        (dir, queue)
    }

    #[test]
    fn push_pop_commit_round_trip() {
        let (_dir, queue) = open_queue();
        queue.push(&envelope(1_700_000_000, "m-1")).unwrap();
        assert_eq!(queue.len().unwrap(), 1);

        let (env, claim) = queue.tpop().unwrap().unwrap();
        assert_eq!(env.broker_msg_id, "m-1");
        assert_eq!(queue.len().unwrap(), 0);

        claim.commit().unwrap();
        assert!(queue.tpop().unwrap().is_none());
    }

    #[test]
    fn rollback_returns_the_entry() {
        let (_dir, queue) = open_queue();
        queue.push(&envelope(1_700_000_000, "m-1")).unwrap();

        let (_, claim) = queue.tpop().unwrap().unwrap();
        claim.rollback().unwrap();
        assert_eq!(queue.len().unwrap(), 1);

        let (env, claim) = queue.tpop().unwrap().unwrap();
        assert_eq!(env.broker_msg_id, "m-1");
        claim.commit().unwrap();
    }

    #[test]
    fn pops_are_fifo_across_seconds_and_within_one() {
        let (_dir, queue) = open_queue();
        queue.push(&envelope(1_700_000_001, "b")).unwrap();
        queue.push(&envelope(1_700_000_001, "a")).unwrap();
        queue.push(&envelope(1_700_000_000, "z")).unwrap();

        let (first, c1) = queue.tpop().unwrap().unwrap();
        let (second, c2) = queue.tpop().unwrap().unwrap();
        let (third, c3) = queue.tpop().unwrap().unwrap();
        // Oldest second first; same-second pushes keep arrival order.
        assert_eq!(first.broker_msg_id, "z");
        assert_eq!(second.broker_msg_id, "b");
        assert_eq!(third.broker_msg_id, "a");
        for c in [c1, c2, c3] {
            c.commit().unwrap();
        }
    }

    #[test]
    fn claimed_entries_survive_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = FileQueue::open(dir.path()).unwrap();
            queue.push(&envelope(1_700_000_000, "m-1")).unwrap();
            let (_, claim) = queue.tpop().unwrap().unwrap();
            // Crash: neither commit nor rollback.
            std::mem::forget(claim);
        }
        let queue = FileQueue::open(dir.path()).unwrap();
        let (env, claim) = queue.tpop().unwrap().unwrap();
        assert_eq!(env.broker_msg_id, "m-1");
        claim.commit().unwrap();
    }

    #[test]
    fn corrupt_entries_are_quarantined_not_redelivered() {
        let (dir, queue) = open_queue();
        queue.push(&envelope(1_700_000_000, "m-1")).unwrap();
        fs::write(dir.path().join("new").join("0000000000-000000-bad.json"), b"{nope").unwrap();

        let (env, claim) = queue.tpop().unwrap().unwrap();
        assert_eq!(env.broker_msg_id, "m-1");
        claim.commit().unwrap();
        assert!(queue.tpop().unwrap().is_none());

        let quarantined: Vec<_> = fs::read_dir(dir.path().join("corrupt"))
            .unwrap()
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn large_backlog_still_pops_the_oldest_of_the_scanned_window() {
        let (_dir, queue) = open_queue();
        for i in 0..(SCAN_LIMIT as i64 * 3) {
            queue.push(&envelope(1_700_000_000 + i, &format!("m-{i}"))).unwrap();
        }
        // Every pop returns some entry and the queue drains completely.
        let mut seen = 0;
        while let Some((_, claim)) = queue.tpop().unwrap() {
            claim.commit().unwrap();
            seen += 1;
        }
        assert_eq!(seen, SCAN_LIMIT * 3);
    }

    #[test]
    fn clear_removes_waiting_entries() {
        let (_dir, queue) = open_queue();
        queue.push(&envelope(1_700_000_000, "m-1")).unwrap();
        queue.push(&envelope(1_700_000_001, "m-2")).unwrap();
        queue.clear().unwrap();
        assert!(queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn wait_for_entry_wakes_on_push() {
        let (_dir, queue) = open_queue();
        let queue = std::sync::Arc::new(queue);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_entry().await })
        };
        tokio::task::yield_now().await;
        queue.push(&envelope(1_700_000_000, "m-1")).unwrap();

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake")
            .unwrap()
            .unwrap();
    }
}
