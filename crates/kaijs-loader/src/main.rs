//! The `loader` executable.
//!
//! Wires the spool, the schema catalog, the document DB, and the dispatch
//! registries into the serial loader loop. Exits 0 on a clean signal
//! shutdown and 1 on any fatal condition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kaijs_fq::FileQueue;
use kaijs_loader::handlers::{registry, HandlerContext};
use kaijs_loader::koji::UnconfiguredKojiClient;
use kaijs_loader::{Loader, LoaderConfig};
use kaijs_schemas::{SchemaCatalog, Validator};
use kaijs_state::{ArtifactStore, SurrealArtifactStore};
use tracing::info;

#[derive(Parser)]
#[command(name = "loader")]
#[command(about = "kaijs loader: spool consumer and datastore writer", long_about = None)]
struct Cli {
    /// Validate and dispatch only; skip all datastore writes.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = LoaderConfig::from_env()?;

    let catalog = match &config.schemas_remote {
        Some(remote) => SchemaCatalog::open(remote.clone(), config.schemas_dir.clone())
            .context("opening schema mirror")?,
        None => SchemaCatalog::from_dir(config.schemas_dir.clone()),
    };
    // The loop must not consume anything before the first fetch completed.
    {
        let catalog = Arc::clone(&catalog);
        tokio::task::spawn_blocking(move || catalog.refresh())
            .await?
            .context("initial schema fetch")?;
    }
    let _refresh = catalog.spawn_refresh(Duration::from_secs(config.schemas_refresh_hours * 3600));

    let store: Arc<dyn ArtifactStore> = Arc::new(
        SurrealArtifactStore::connect(
            &config.db_endpoint,
            &config.db_namespace,
            &config.db_database,
            config
                .db_username
                .as_deref()
                .zip(config.db_password.as_deref()),
        )
        .await
        .context("connecting to the document DB")?,
    );

    if config.writer.index() {
        anyhow::bail!(
            "writer mode requires a search-index backend; this build ships the document-DB path only"
        );
    }
    let index: Arc<dyn kaijs_state::SearchIndex> =
        Arc::new(kaijs_state::fakes::MemorySearchIndex::new());

    let queue = FileQueue::open(&config.fq_dir).context("opening the spool")?;
    info!(fq_dir = %config.fq_dir, "spool ready, backlog: {}", queue.len()?);

    let ctx = HandlerContext {
        store,
        koji: Arc::new(UnconfiguredKojiClient),
        index_prefix: config.index_prefix.clone(),
    };
    let validator = Validator::new(Arc::clone(&catalog));

    let shutdown = kaijs_loader::run::Shutdown::new();
    shutdown.listen_for_signals()?;

    let mut loader = Loader::new(
        ctx,
        validator,
        catalog,
        registry(),
        queue,
        index,
        config.bulk(),
        config.writer,
        cli.dry_run,
        shutdown,
    );
    loader.run().await
}
