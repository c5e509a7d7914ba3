//! The `listener` executable.
//!
//! The broker client is injected by the deployment; this build wires the
//! spool and the loop and exits with the broker-specific code on any
//! unhealthy condition, letting the orchestrator restart it.

use std::process::ExitCode;

use clap::Parser;
use kaijs_fq::FileQueue;
use kaijs_listener::source::IdleSource;
use kaijs_listener::{Listener, ListenerConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "listener")]
#[command(about = "kaijs listener: broker subscription to spool append", long_about = None)]
struct Cli {}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let _cli = Cli::parse();

    let config = match ListenerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::from(1);
        }
    };
    info!(
        provider = %config.provider_name,
        topics = config.topics.len(),
        "listener starting"
    );

    let queue = match FileQueue::open(&config.fq_dir) {
        Ok(queue) => queue,
        Err(err) => {
            error!(%err, fq_dir = %config.fq_dir, "cannot open the spool");
            return ExitCode::from(1);
        }
    };

    // The AMQP clients are provided by the deployment build; without one,
    // the listener idles on an empty source until signalled.
    let source = IdleSource;

    let mut listener = Listener::new(
        source,
        queue,
        config.provider_name.clone(),
        config.status_interval,
    );
    match listener.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "listener failed");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
