//! Typed client for the site executor.
//!
//! Besides one method per executor operation, the client carries the
//! config-generation operations used by deployments: rendering a fresh
//! production site, rewriting an existing one for new ports or a renamed
//! project, and writing a single-upstream development site.

use berth_rpc::{RpcClient, Subscription};
use serde::{Deserialize, Serialize};
use tokio::net::ToSocketAddrs;
use tracing::{debug, info};

use crate::access_log::NginxAccessLog;
use crate::error::ProxyResult;
use crate::naming::site_filename;
use crate::protocol::*;
use crate::site::{rename_identifier, rewrite_production_site};
use crate::template::SiteTemplates;

/// Inputs for a production site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProdConfig {
    pub project_name: String,
    pub cluster_name: String,
    pub domain: String,
    pub ports: Vec<u16>,
}

impl ProdConfig {
    pub fn filename(&self) -> String {
        site_filename(&self.project_name, &self.cluster_name)
    }
}

/// Inputs for a single-upstream development site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevConfig {
    pub domain: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct NginxClient {
    rpc: RpcClient,
    templates: SiteTemplates,
}

impl NginxClient {
    pub fn new(rpc: RpcClient, templates: SiteTemplates) -> Self {
        Self { rpc, templates }
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A, templates: SiteTemplates) -> ProxyResult<Self> {
        let rpc = RpcClient::connect(addr).await?;
        Ok(Self::new(rpc, templates))
    }

    // ── Config generation ──────────────────────────────────────────

    /// Render the production template and write it as the whole site file.
    pub async fn create_prod_config(&self, config: &ProdConfig) -> ProxyResult<()> {
        let content =
            self.templates
                .render_production(&config.project_name, &config.domain, &config.ports)?;
        let filename = config.filename();
        self.write_site_available(&filename, &content).await?;
        info!(%filename, ports = ?config.ports, "production site created");
        Ok(())
    }

    /// Rewrite an existing production site. Identifiers derived from
    /// `old.project_name` (or `config.project_name` when `old` is absent)
    /// are renamed, a changed domain is carried over, and every upstream
    /// block is regenerated for `config.ports`. The file is written once.
    pub async fn update_prod_config(
        &self,
        config: &ProdConfig,
        old: Option<&ProdConfig>,
    ) -> ProxyResult<()> {
        let filename = config.filename();
        let old_project = old.map_or(config.project_name.as_str(), |o| o.project_name.as_str());
        let current = self.read_site_available(&filename).await?;
        let mut updated =
            rewrite_production_site(&current, old_project, &config.project_name, &config.ports)?;
        if let Some(old) = old.filter(|o| !o.domain.is_empty() && o.domain != config.domain) {
            updated = rename_identifier(&updated, &old.domain, &config.domain)?;
        }
        self.write_site_available(&filename, &updated).await?;
        info!(%filename, ports = ?config.ports, "production site updated");
        Ok(())
    }

    pub async fn write_dev_config(&self, filename: &str, config: &DevConfig) -> ProxyResult<()> {
        let content = self.templates.render_single(&config.domain, config.port)?;
        self.write_site_available(filename, &content).await?;
        debug!(filename, port = config.port, "development site written");
        Ok(())
    }

    // ── Executor operations ────────────────────────────────────────

    pub async fn get_sites_available(&self) -> ProxyResult<Vec<SiteFile>> {
        Ok(self.rpc.call(OP_SITES_AVAILABLE, &()).await?)
    }

    pub async fn write_site_available(&self, filename: &str, content: &str) -> ProxyResult<()> {
        let site = SiteFile {
            filename: filename.to_string(),
            content: content.to_string(),
        };
        Ok(self.rpc.call(OP_WRITE_SITE, &site).await?)
    }

    pub async fn read_site_available(&self, filename: &str) -> ProxyResult<String> {
        Ok(self.rpc.call(OP_READ_SITE, filename).await?)
    }

    pub async fn site_available_exists(&self, filename: &str) -> ProxyResult<bool> {
        Ok(self.rpc.call(OP_SITE_AVAILABLE_EXISTS, filename).await?)
    }

    pub async fn site_enabled_exists(&self, filename: &str) -> ProxyResult<bool> {
        Ok(self.rpc.call(OP_SITE_ENABLED_EXISTS, filename).await?)
    }

    pub async fn deploy_site_available(&self, filename: &str) -> ProxyResult<()> {
        Ok(self.rpc.call(OP_DEPLOY_SITE, filename).await?)
    }

    pub async fn test_config(&self) -> ProxyResult<ConfigTest> {
        Ok(self.rpc.call(OP_TEST, &()).await?)
    }

    pub async fn reload_service(&self) -> ProxyResult<()> {
        Ok(self.rpc.call(OP_RELOAD, &()).await?)
    }

    pub async fn restart_service(&self) -> ProxyResult<()> {
        Ok(self.rpc.call(OP_RESTART, &()).await?)
    }

    /// Subscribe to parsed access-log lines.
    pub async fn monitor_access_log(&self) -> ProxyResult<AccessLogStream> {
        let inner = self.rpc.subscribe(CHANNEL_ACCESS_LOG, &()).await?;
        Ok(AccessLogStream { inner })
    }
}

/// Live access-log feed. Dropping it unsubscribes.
pub struct AccessLogStream {
    inner: Subscription,
}

impl AccessLogStream {
    /// Next parsed line, or a stream-level error from the executor.
    pub async fn next(&mut self) -> Option<ProxyResult<NginxAccessLog>> {
        let item = self.inner.next_event::<NginxAccessLog>().await?;
        Some(item.map_err(Into::into))
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}
