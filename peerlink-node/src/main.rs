// PeerLink node: TCP peer transport, network engine and HTTP API daemon.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use peerlink_core::{ListenerState, NetworkEngine};
use peerlink_node::config::{self, Config};
use peerlink_node::{api, transport::TcpTransport};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("peerlink-node {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let listen = cfg.listen_addr();
    let keypair = cfg.keypair()?;
    let transport = TcpTransport::bind(keypair, &listen)
        .await
        .with_context(|| format!("bind peer transport on {}", listen))?;

    let engine_cfg = cfg.engine();
    let max_body = engine_cfg.max_file_size;
    let engine = NetworkEngine::start(Arc::new(transport), engine_cfg)
        .await
        .context("start network engine")?;
    tracing::info!(addr = %engine.local_address(), "node ready");

    let watcher = engine.clone();
    tokio::spawn(async move {
        if let ListenerState::Stopped { reason } = watcher.listener_stopped().await {
            tracing::error!(%reason, "message listener stopped; broadcasts will not be received");
        }
    });

    let api_addr = SocketAddr::from(([0, 0, 0, 0], cfg.api_port));
    let api = tokio::spawn(api::run_api(api_addr, engine, max_body));

    tokio::select! {
        res = api => {
            res.context("api task panicked")?
                .with_context(|| format!("api server on {}", api_addr))?;
        }
        res = shutdown_signal() => res?,
    }
    tracing::info!("shutting down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("listen for Ctrl+C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("listen for Ctrl+C")?;
    }
    Ok(())
}
