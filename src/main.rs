use anyhow::Context;
use clap::Parser;
use distributed_cache::config::{CacheConfig, DEFAULT_CONFIG_PATH};
use distributed_cache::master::handlers::router;
use distributed_cache::master::master::Master;
use distributed_cache::membership::process::ProcessLauncher;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cache-master", about = "Master of the distributed in-memory cache")]
struct Cli {
    /// Path to the YAML configuration
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = CacheConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let port = config.service.master.port;

    // 1. Node pool (recovery + minimum capacity):
    let launcher = ProcessLauncher::from_config(&config)?;
    tracing::info!("Node binary: {}", launcher.binary().display());
    let master = Master::initialize(&config, Arc::new(launcher)).await?;

    // 2. HTTP surface:
    let fatal = Arc::new(Notify::new());
    let app = router(master.clone(), fatal.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not listen on port {}", port))?;

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { fatal.notified().await })
            .await
    });

    // 3. Converge the pool now that nodes can pull from us:
    master.make_available().await;
    tracing::info!("Server running on port {} and ready", port);

    server.await??;

    anyhow::bail!("node pool could not be shut down, master stopping")
}
