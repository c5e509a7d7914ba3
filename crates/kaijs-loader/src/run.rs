//! The loader loop.
//!
//! A strict serial loop: pop, validate, dispatch, write, commit or
//! rollback. There is no cross-message parallelism; suspension happens at
//! the pop wait, schema fetches, the enrichment call, and the datastore
//! round-trips. A signal stops the loop between iterations; staged but
//! unflushed envelopes are returned to the spool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kaijs_domain::{Disposition, KaijsError, SpoolMessage};
use kaijs_fq::{ClaimedEntry, FileQueue};
use kaijs_schemas::{SchemaCatalog, Validator};
use kaijs_state::{IndexUpdate, InvalidRecord, SearchIndex};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::db_writer;
use crate::handlers::{HandlerContext, Registries};
use crate::index_writer::{invalid_message_update, BulkConfig, IndexWriter};

/// Which write paths this loader drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMode {
    Db,
    Index,
    Both,
}

impl WriterMode {
    pub fn db(&self) -> bool {
        matches!(self, WriterMode::Db | WriterMode::Both)
    }

    pub fn index(&self) -> bool {
        matches!(self, WriterMode::Index | WriterMode::Both)
    }
}

impl std::str::FromStr for WriterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "db" => Ok(WriterMode::Db),
            "index" => Ok(WriterMode::Index),
            "both" => Ok(WriterMode::Both),
            other => Err(format!("unknown writer mode: {other} (db|index|both)")),
        }
    }
}

/// Cooperative shutdown flag shared with the signal listener.
#[derive(Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if !self.is_triggered() {
            self.notify.notified().await;
        }
    }

    /// Trip the flag on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
            shutdown.trigger();
        });
        Ok(())
    }
}

enum Wake {
    Entry,
    IdleFlush,
    Signal,
}

/// The loader.
pub struct Loader {
    ctx: HandlerContext,
    validator: Validator,
    catalog: Arc<SchemaCatalog>,
    registries: Registries,
    queue: FileQueue,
    index_writer: IndexWriter,
    mode: WriterMode,
    dry_run: bool,
    shutdown: Shutdown,
}

impl Loader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: HandlerContext,
        validator: Validator,
        catalog: Arc<SchemaCatalog>,
        registries: Registries,
        queue: FileQueue,
        index: Arc<dyn SearchIndex>,
        bulk: BulkConfig,
        mode: WriterMode,
        dry_run: bool,
        shutdown: Shutdown,
    ) -> Self {
        Loader {
            ctx,
            validator,
            catalog,
            registries,
            queue,
            index_writer: IndexWriter::new(index, bulk),
            mode,
            dry_run,
            shutdown,
        }
    }

    /// Run until a signal arrives.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.catalog.is_fetched(),
            "schema catalog has not completed its initial fetch"
        );
        info!(mode = ?self.mode, dry_run = self.dry_run, "loader started");

        loop {
            self.drain().await?;
            if self.shutdown.is_triggered() {
                break;
            }

            let deadline = self
                .index_writer
                .idle_deadline()
                .map(tokio::time::Instant::from_std);
            let wake = tokio::select! {
                _ = self.shutdown.wait() => Wake::Signal,
                result = self.queue.wait_for_entry() => {
                    result?;
                    Wake::Entry
                }
                _ = sleep_until_or_forever(deadline) => Wake::IdleFlush,
            };
            match wake {
                Wake::Entry => continue,
                Wake::IdleFlush => self.index_writer.flush().await?,
                Wake::Signal => break,
            }
        }

        self.index_writer.rollback_pending();
        info!("loader stopped");
        Ok(())
    }

    /// Process everything currently in the spool. Exposed for tests.
    pub async fn drain(&mut self) -> anyhow::Result<usize> {
        let mut processed = 0;
        while !self.shutdown.is_triggered() {
            let Some((env, claim)) = self.queue.tpop()? else {
                break;
            };
            self.process_one(env, claim).await?;
            processed += 1;
            if self.index_writer.should_flush() {
                self.index_writer.flush().await?;
            }
        }
        Ok(processed)
    }

    /// Flush any staged index updates now. Exposed for tests.
    pub async fn flush_index(&mut self) -> anyhow::Result<()> {
        self.index_writer.flush().await?;
        Ok(())
    }

    /// Number of staged, unflushed index updates. Exposed for tests.
    pub fn pending_index_updates(&self) -> usize {
        self.index_writer.pending_count()
    }

    /// Number of envelopes waiting in the spool. Exposed for tests.
    pub fn spool_len(&self) -> anyhow::Result<usize> {
        Ok(self.queue.len()?)
    }

    async fn process_one(&mut self, env: SpoolMessage, claim: ClaimedEntry) -> anyhow::Result<()> {
        match self.apply(&env).await {
            Ok(Some(updates)) => {
                self.index_writer.submit(updates, claim);
                Ok(())
            }
            Ok(None) => {
                claim.commit()?;
                Ok(())
            }
            Err(err) => self.dispose(err, &env, claim).await,
        }
    }

    /// Validate and write one envelope. `Some(updates)` means index
    /// updates were produced and the claim stays open until their flush.
    async fn apply(&mut self, env: &SpoolMessage) -> Result<Option<Vec<IndexUpdate>>, KaijsError> {
        self.validator.validate(env)?;

        if self.dry_run {
            // Transformability check only: the dispatch must resolve.
            self.registries.db.dispatch(&env.broker_topic)?;
            return Ok(None);
        }

        if self.mode.db() {
            db_writer::process(&self.ctx, &self.registries.db, env).await?;
            self.ctx
                .store
                .record_raw(env)
                .await
                .map_err(|e| KaijsError::Storage(e.to_string()))?;
        }

        if self.mode.index() {
            let handler = self.registries.index.dispatch(&env.broker_topic)?;
            let updates = handler.handle(&self.ctx, env).await?;
            return Ok(Some(updates));
        }
        Ok(None)
    }

    /// Apply the failure policy table to a processing error.
    async fn dispose(
        &mut self,
        err: KaijsError,
        env: &SpoolMessage,
        claim: ClaimedEntry,
    ) -> anyhow::Result<()> {
        match Disposition::of(&err) {
            Disposition::Commit => {
                warn!(msg = %env.broker_msg_id, %err, "dropping malformed envelope");
                claim.commit()?;
                Ok(())
            }
            Disposition::CommitSilent => {
                debug!(msg = %env.broker_msg_id, %err, "message declined");
                claim.commit()?;
                Ok(())
            }
            Disposition::CommitInvalid => {
                warn!(msg = %env.broker_msg_id, %err, "recording invalid message");
                if self.dry_run {
                    claim.commit()?;
                    return Ok(());
                }
                if self.mode.db() {
                    self.ctx
                        .store
                        .record_invalid(InvalidRecord::new(env, err.to_string()))
                        .await
                        .map_err(|e| anyhow::anyhow!("invalid sink write failed: {e}"))?;
                }
                if self.mode.index() {
                    let update =
                        invalid_message_update(&self.ctx.index_prefix, env, &err.to_string());
                    self.index_writer.submit(vec![update], claim);
                } else {
                    claim.commit()?;
                }
                Ok(())
            }
            Disposition::Fatal => {
                error!(msg = %env.broker_msg_id, %err, "fatal error, rolling back");
                claim.rollback()?;
                self.index_writer.rollback_pending();
                Err(err.into())
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
