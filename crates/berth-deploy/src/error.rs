//! Orchestrator error types.

use berth_state::StateError;
use thiserror::Error;

pub type DeployResult<T> = Result<T, DeployError>;

/// Errors surfaced synchronously to the caller of create/patch.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("cluster not found for namespace {0}")]
    ClusterNotFound(String),

    #[error("cluster {0} already has a production")]
    ProductionAlreadyExists(String),

    #[error("no production for cluster {0}")]
    ProductionNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

/// Errors of the detached pipeline. Recorded and logged, never returned to
/// the request that started it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cluster {0} no longer exists")]
    ClusterMissing(String),

    #[error("cluster {0} has no git branch")]
    GitBranchMissing(String),

    #[error("cluster {0} has no production")]
    ProductionMissing(String),

    #[error("cluster {0} published no container ports")]
    NoPorts(String),

    #[error("docker: {0:#}")]
    Docker(anyhow::Error),

    #[error("proxy: {0:#}")]
    Proxy(anyhow::Error),

    #[error("dns: {0:#}")]
    Dns(anyhow::Error),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
