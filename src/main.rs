use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use finetune_gateway::config::GatewayConfig;
use finetune_gateway::infrastructure::setup_remote;
use finetune_gateway::services::notification::setup_notifier;
use finetune_gateway::services::worker::StagingSweeper;
use finetune_gateway::{AppState, create_app};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "HTTP gateway that ships fine-tune datasets and job scripts to an HPC cluster")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "GATEWAY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "GATEWAY_PORT", default_value_t = 5000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finetune_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting fine-tune gateway...");

    let config = GatewayConfig::from_env();
    info!(
        "🛰️  Remote: backend={} {}@{}:{} datasets={} scripts={}",
        config.remote.backend,
        config.remote.username,
        config.remote.host,
        config.remote.port,
        config.remote.dataset_dir,
        config.remote.script_dir
    );
    if !config.remote.strict_host_key_checking {
        tracing::warn!("⚠️ SSH host key checking is disabled");
    }

    let connector = setup_remote(&config.remote);
    let notifier = setup_notifier(&config.mail, config.timeouts.mail)
        .context("failed to configure mail relay")?;

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let cancel = CancellationToken::new();

    let cleanup_age = Duration::from_secs(config.staging_cleanup_age_hours * 3600);
    let state = AppState::new(config, connector, notifier, cancel.clone());

    let staging = state.pipeline.staging();
    staging
        .ensure_dir()
        .await
        .with_context(|| format!("failed to create staging dir {}", staging.root().display()))?;

    // Start Staging Sweeper
    let sweeper = StagingSweeper::new(staging.root().to_path_buf(), cleanup_age, shutdown_rx);
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            cancel.cancel();
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
