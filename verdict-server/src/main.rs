//! Verdict server CLI.
//!
//! Run with: `cargo run -p verdict-server -- --help`

use clap::Parser;
use tracing_subscriber::EnvFilter;

use verdict_server::{ServerConfig, VerdictServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen,
        rpc = ?config.rpc_listen,
        "starting verdict server"
    );

    let server = VerdictServer::new(config).await?;
    server.run().await?;
    Ok(())
}
