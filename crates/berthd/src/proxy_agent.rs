//! Proxy agent mode: runs next to nginx and applies site changes the
//! orchestrator sends over RPC.

use std::sync::Arc;

use berth_core::BerthConfig;
use berth_proxy::SiteExecutor;
use berth_rpc::RpcServer;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::signals::ShutdownSignals;

pub async fn run_proxy_agent(config: BerthConfig) -> anyhow::Result<()> {
    info!("Berth proxy agent starting");
    let mut signals = ShutdownSignals::install()?;

    let executor = Arc::new(SiteExecutor::new(&config.proxy));
    let listener = TcpListener::bind(&config.proxy.listen).await?;
    info!(
        addr = %listener.local_addr()?,
        sites_available = %config.proxy.sites_available.display(),
        "proxy agent listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(
        executor
            .register(RpcServer::new())
            .serve_with_shutdown(listener, shutdown_rx),
    );

    let signal = signals.recv().await;
    info!(signal = signal.as_str(), "shutdown signal received");
    let _ = shutdown_tx.send(true);
    server.await??;

    info!("proxy agent stopped");
    Ok(())
}
