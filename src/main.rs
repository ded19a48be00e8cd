use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use chunk_vault::api::{self, ApiMetrics, AppState};
use chunk_vault::cli::{bind_address, Cli, Command, NodeArgs, ServeArgs};
use chunk_vault::node::{node_router, DiskNode, MemoryNode, NodeServerState, StorageNode};
use chunk_vault::storage::DefaultConnector;
use chunk_vault::{telemetry, ChunkVault};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(args) => serve(args).await,
        Command::Node(args) => run_node(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    telemetry::init_tracing(&args.log.log_config())?;

    let config = args.vault_config();
    let connector = Arc::new(DefaultConnector::new(args.node_timeout())?);
    let vault = Arc::new(ChunkVault::bootstrap(config, connector, &args.node_addresses()).await?);

    let metrics = Arc::new(ApiMetrics::new(vault.config.service_name.clone()));
    let state = Arc::new(AppState::new(vault.clone(), metrics.clone()));
    let app = api::create_router(state);

    let shutdown = CancellationToken::new();

    let metrics_listener = TcpListener::bind(bind_address(&args.metrics_addr)).await?;
    tracing::info!(addr = %metrics_listener.local_addr()?, "serving metrics");
    let metrics_shutdown = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, api::metrics_router(metrics))
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await
    });

    let listener = TcpListener::bind(bind_address(&args.listen_addr)).await?;
    tracing::info!(
        service = %vault.config.service_name,
        addr = %listener.local_addr()?,
        nodes = vault.nodes().len(),
        "listening"
    );

    let signalled = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signalled.cancel();
        })
        .await?;

    shutdown.cancel();
    metrics_server.await??;
    Ok(())
}

async fn run_node(args: NodeArgs) -> anyhow::Result<()> {
    telemetry::init_tracing(&args.log.log_config())?;

    let backend: Arc<dyn StorageNode> = match &args.data_dir {
        Some(dir) => {
            let mut node = DiskNode::open(dir).await?;
            if let Some(max) = args.max_bytes {
                node = node.with_capacity(max);
            }
            Arc::new(node)
        }
        None => Arc::new(MemoryNode::new(args.listen.clone())),
    };

    let listener = TcpListener::bind(bind_address(&args.listen)).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        data_dir = ?args.data_dir,
        "storage node listening"
    );

    let state = NodeServerState::new(backend).with_max_request_bytes(args.max_request_bytes);
    axum::serve(listener, node_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
