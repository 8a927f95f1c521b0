//! Capabilities the pipeline drives: Docker, the reverse proxy and DNS.
//!
//! Each is a trait returning boxed futures so the orchestrator can hold
//! them as `Arc<dyn ...>` and tests can script them. The production
//! implementations talk to the Docker and DNS services over the RPC
//! channel; the proxy capability is the nginx client itself.

use std::future::Future;
use std::pin::Pin;

use anyhow::{Context, bail};
use berth_proxy::{NginxClient, ProdConfig};
use berth_rpc::RpcClient;
use berth_state::{Cluster, ClusterProduction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub type CapabilityFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Which revision to deploy. Built from the cluster's git branch at
/// deploy time and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEnvelope {
    pub branch_name: String,
    pub last_commit: String,
}

pub trait DockerService: Send + Sync {
    /// Build and run `cluster` at the envelope's revision, scaled to the
    /// production's instance count.
    fn deploy_cluster<'a>(
        &'a self,
        cluster: &'a Cluster,
        production: &'a ClusterProduction,
        envelope: &'a DeploymentEnvelope,
    ) -> CapabilityFuture<'a>;
}

pub trait DnsService: Send + Sync {
    fn config_sync(&self) -> CapabilityFuture<'_>;
    fn restart_service(&self) -> CapabilityFuture<'_>;
}

pub trait ProxyService: Send + Sync {
    /// Create or update the production site for `site`, enable it and
    /// check the resulting configuration. `previous` describes the site as
    /// it was before a patch, when known.
    fn sync_site<'a>(
        &'a self,
        site: &'a ProdConfig,
        previous: Option<&'a ProdConfig>,
    ) -> CapabilityFuture<'a>;

    fn restart(&self) -> CapabilityFuture<'_>;
}

// ── RPC-backed implementations ─────────────────────────────────────

pub const OP_CLUSTERS_DEPLOY: &str = "/clusters/deploy";
pub const OP_DNS_CONFIG_SYNC: &str = "/config/sync";
pub const OP_DNS_RESTART: &str = "/restart";

#[derive(Serialize)]
struct ClusterDeployPayload<'a> {
    cluster: &'a Cluster,
    production: &'a ClusterProduction,
    #[serde(flatten)]
    envelope: &'a DeploymentEnvelope,
}

#[derive(Clone)]
pub struct RpcDockerService {
    rpc: RpcClient,
}

impl RpcDockerService {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

impl DockerService for RpcDockerService {
    fn deploy_cluster<'a>(
        &'a self,
        cluster: &'a Cluster,
        production: &'a ClusterProduction,
        envelope: &'a DeploymentEnvelope,
    ) -> CapabilityFuture<'a> {
        Box::pin(async move {
            let payload = ClusterDeployPayload {
                cluster,
                production,
                envelope,
            };
            let _: Value = self
                .rpc
                .call(OP_CLUSTERS_DEPLOY, &payload)
                .await
                .with_context(|| format!("deploying cluster {}", cluster.namespace))?;
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct RpcDnsService {
    rpc: RpcClient,
}

impl RpcDnsService {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

impl DnsService for RpcDnsService {
    fn config_sync(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            let _: Value = self
                .rpc
                .call(OP_DNS_CONFIG_SYNC, &())
                .await
                .context("syncing dns config")?;
            Ok(())
        })
    }

    fn restart_service(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            let _: Value = self
                .rpc
                .call(OP_DNS_RESTART, &())
                .await
                .context("restarting dns")?;
            Ok(())
        })
    }
}

impl ProxyService for NginxClient {
    fn sync_site<'a>(
        &'a self,
        site: &'a ProdConfig,
        previous: Option<&'a ProdConfig>,
    ) -> CapabilityFuture<'a> {
        Box::pin(async move {
            let filename = site.filename();
            if self.site_available_exists(&filename).await? {
                self.update_prod_config(site, previous).await?;
            } else {
                self.create_prod_config(site).await?;
            }
            if !self.site_enabled_exists(&filename).await? {
                self.deploy_site_available(&filename).await?;
            }

            let test = self.test_config().await?;
            if !test.ok {
                warn!(%filename, stderr = %test.stderr, "nginx rejected configuration");
                bail!("nginx config test failed: {}", test.stderr.trim());
            }
            debug!(%filename, "production site synced");
            Ok(())
        })
    }

    fn restart(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            self.restart_service().await?;
            Ok(())
        })
    }
}
