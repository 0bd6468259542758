use anyhow::Result;
use clap::Parser;
use ezsearch_core::persist::DEFAULT_MAX_DEPTH;
use ezsearch_core::{Engine, EngineConfig};
use ezsearch_server::router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Data directory holding documents, catalog, dictionary and postings
    #[arg(long, default_value = "./data")]
    data_dir: String,
    /// JSON engine config; replaces the engine flags below when given
    #[arg(long)]
    config: Option<String>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 9200)]
    port: u16,
    /// Maximum nesting depth of indexed documents
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    /// Create all postings bucket directories at startup
    #[arg(long, default_value_t = false)]
    precreate_buckets: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::new(&args.data_dir)
            .with_max_depth(args.max_depth)
            .with_precreate_buckets(args.precreate_buckets),
    };
    let engine = Arc::new(tokio::task::spawn_blocking(move || Engine::open(config)).await??);
    let app = router(engine.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    engine.flush()?;
    tracing::info!("engine flushed, bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
