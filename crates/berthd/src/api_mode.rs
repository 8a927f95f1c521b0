//! API mode: the REST surface and the deployment orchestrator.
//!
//! In this mode, the daemon:
//! 1. Opens the state store
//! 2. Connects to the proxy agent, Docker and DNS services over RPC
//! 3. Serves the REST API
//! 4. On shutdown, stops accepting requests and lets running deploys finish

use std::sync::Arc;

use berth_core::BerthConfig;
use berth_deploy::{ProductionOrchestrator, RpcDnsService, RpcDockerService};
use berth_proxy::{NginxClient, SiteTemplates};
use berth_rpc::RpcClient;
use berth_state::StateStore;
use tokio::net::TcpListener;
use tracing::info;

use crate::signals::ShutdownSignals;

pub async fn run_api(config: BerthConfig) -> anyhow::Result<()> {
    info!("Berth API starting");
    let mut signals = ShutdownSignals::install()?;
    std::fs::create_dir_all(&config.api.data_dir)?;

    // ── State store ──────────────────────────────────────────────
    let db_path = config.api.data_dir.join("berth.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // ── Capabilities ─────────────────────────────────────────────
    let templates = SiteTemplates::load(&config.proxy)?;
    let nginx = NginxClient::connect(&config.api.proxy_rpc, templates).await?;
    info!(addr = %config.api.proxy_rpc, "connected to proxy agent");
    let docker = RpcDockerService::new(RpcClient::connect(&config.api.docker_rpc).await?);
    info!(addr = %config.api.docker_rpc, "connected to docker service");
    let dns = RpcDnsService::new(RpcClient::connect(&config.api.dns_rpc).await?);
    info!(addr = %config.api.dns_rpc, "connected to dns service");

    let orchestrator = ProductionOrchestrator::new(
        Arc::new(store),
        Arc::new(docker),
        Arc::new(nginx),
        Arc::new(dns),
    );

    // ── API server ───────────────────────────────────────────────
    let router = berth_api::build_router(orchestrator.clone());
    let listener = TcpListener::bind(&config.api.listen).await?;
    info!(addr = %listener.local_addr()?, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let signal = signals.recv().await;
            info!(signal = signal.as_str(), "shutdown signal received");
        })
        .await?;

    // Deploys already spawned run to completion.
    orchestrator.drain().await;
    info!("Berth API stopped");
    Ok(())
}
