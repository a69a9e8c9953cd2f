//! fake-elasticache: a memcached relay with static cluster auto-discovery
//!
//! Sits in front of a single memcached backend:
//! - `config get cluster` is answered locally with a configured topology
//! - every other command is relayed to the backend verbatim
//!
//! Configuration via CLI arguments, `FAKE_*` environment variables or a
//! TOML file.

mod config;
mod frame;
mod handler;
mod protocol;
mod relay;
mod server;
mod topology;

#[cfg(test)]
mod testing;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backend = %config.backend_addr(),
        cluster_nodes = %config.cluster_nodes,
        trace = config.trace,
        "Starting fake-elasticache relay"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    let server = Server::new(config);
    runtime.block_on(server.run())?;
    Ok(())
}
