//! The detached deploy pipeline.
//!
//! Steps run strictly in order and each settles before the next starts.
//! The first failure stops the run; nothing already done is rolled back.

use std::sync::Arc;

use berth_proxy::ProdConfig;
use berth_state::{ClusterDetail, ClusterProduction, ClusterRepository, GitBranch};
use thiserror::Error;
use tracing::{debug, info};

use crate::capability::{DeploymentEnvelope, DnsService, DockerService, ProxyService};
use crate::error::PipelineError;
use crate::tracker::{DeployStep, DeployTicket};

/// What to deploy. `previous_domain` is set when a patch changed the
/// production's domain, so the existing site can be renamed in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub namespace: String,
    pub previous_domain: Option<String>,
}

/// The step a pipeline stopped at, and why.
#[derive(Debug, Error)]
#[error("{step:?} failed: {error}")]
pub struct StepFailure {
    pub step: DeployStep,
    #[source]
    pub error: PipelineError,
}

fn at(step: DeployStep) -> impl FnOnce(PipelineError) -> StepFailure {
    move |error| StepFailure { step, error }
}

#[derive(Clone)]
pub struct Pipeline {
    repo: Arc<dyn ClusterRepository>,
    docker: Arc<dyn DockerService>,
    proxy: Arc<dyn ProxyService>,
    dns: Arc<dyn DnsService>,
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn ClusterRepository>,
        docker: Arc<dyn DockerService>,
        proxy: Arc<dyn ProxyService>,
        dns: Arc<dyn DnsService>,
    ) -> Self {
        Self {
            repo,
            docker,
            proxy,
            dns,
        }
    }

    /// Run every step for `request`, reporting progress on `ticket`. The
    /// caller is expected to hold the namespace lease.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        ticket: &DeployTicket,
    ) -> Result<(), StepFailure> {
        let namespace = request.namespace.as_str();

        ticket.step(DeployStep::FetchCluster).await;
        let (detail, branch, production) =
            self.fetch(namespace).map_err(at(DeployStep::FetchCluster))?;
        let envelope = DeploymentEnvelope {
            branch_name: branch.name,
            last_commit: branch.last_commit_sha,
        };

        ticket.step(DeployStep::Deploy).await;
        self.docker
            .deploy_cluster(&detail.cluster, &production, &envelope)
            .await
            .map_err(PipelineError::Docker)
            .map_err(at(DeployStep::Deploy))?;
        info!(
            %namespace,
            commit = %envelope.last_commit,
            instances = production.number_of_instances,
            "cluster deployed"
        );

        ticket.step(DeployStep::ProxySync).await;
        let site = self
            .production_site(namespace, &production)
            .map_err(at(DeployStep::ProxySync))?;
        let previous = request.previous_domain.as_ref().map(|domain| ProdConfig {
            domain: domain.clone(),
            ..site.clone()
        });
        self.proxy
            .sync_site(&site, previous.as_ref())
            .await
            .map_err(PipelineError::Proxy)
            .map_err(at(DeployStep::ProxySync))?;

        ticket.step(DeployStep::ProxyRestart).await;
        self.proxy
            .restart()
            .await
            .map_err(PipelineError::Proxy)
            .map_err(at(DeployStep::ProxyRestart))?;
        debug!(%namespace, ports = ?site.ports, "proxy serving production");

        ticket.step(DeployStep::DnsSync).await;
        self.dns
            .config_sync()
            .await
            .map_err(PipelineError::Dns)
            .map_err(at(DeployStep::DnsSync))?;

        ticket.step(DeployStep::DnsRestart).await;
        self.dns
            .restart_service()
            .await
            .map_err(PipelineError::Dns)
            .map_err(at(DeployStep::DnsRestart))?;

        Ok(())
    }

    fn fetch(
        &self,
        namespace: &str,
    ) -> Result<(ClusterDetail, GitBranch, ClusterProduction), PipelineError> {
        let detail = self
            .repo
            .find_cluster_by_namespace(namespace)?
            .ok_or_else(|| PipelineError::ClusterMissing(namespace.to_string()))?;
        let branch = detail
            .git_branch
            .clone()
            .ok_or_else(|| PipelineError::GitBranchMissing(namespace.to_string()))?;
        let production = self
            .repo
            .find_production_by_namespace(namespace)?
            .ok_or_else(|| PipelineError::ProductionMissing(namespace.to_string()))?;
        Ok((detail, branch, production))
    }

    /// Build the site description from the containers as they are after
    /// the deploy, since the deploy is what publishes their ports.
    fn production_site(
        &self,
        namespace: &str,
        production: &ClusterProduction,
    ) -> Result<ProdConfig, PipelineError> {
        let detail = self
            .repo
            .find_cluster_by_namespace(namespace)?
            .ok_or_else(|| PipelineError::ClusterMissing(namespace.to_string()))?;
        let ports = detail.ports();
        if ports.is_empty() {
            return Err(PipelineError::NoPorts(namespace.to_string()));
        }
        Ok(ProdConfig {
            project_name: production.project_name.clone(),
            cluster_name: detail.cluster.name,
            domain: production.domain.clone(),
            ports,
        })
    }
}
