use clap::Parser;
use distributed_cache::node::server;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cache-node", about = "Replica node of the distributed cache")]
struct Cli {
    /// Port of the master's replication endpoint
    master_port: u16,
    /// Port this node listens on
    node_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    server::run(cli.node_port, cli.master_port).await
}
