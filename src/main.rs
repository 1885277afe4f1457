use anyhow::Result;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use metabus::processors::{CounterStateProcessorFactory, SubscriptionStateProcessorFactory};
use metabus::raft::MetaRaftServer;
use metabus::raft::rpc::build_rpc_router;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = metabus::config::Cli::parse();
    run_server(cli.config).await
}

async fn run_server(config: metabus::config::MetaConf) -> Result<()> {
    let bind = config.bind;

    let mut server = MetaRaftServer::new(config)
        .map_err(|e| anyhow::anyhow!("build meta raft server: {e}"))?;
    server
        .register_state_processor(Box::new(CounterStateProcessorFactory))
        .map_err(|e| anyhow::anyhow!("register counter processor: {e}"))?;
    server
        .register_state_processor(Box::new(SubscriptionStateProcessorFactory))
        .map_err(|e| anyhow::anyhow!("register subscription processor: {e}"))?;

    let handle = server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("start meta raft server: {e}"))?;

    let app = build_rpc_router(handle.clone()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, node_id = handle.node_id(), "meta raft server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
