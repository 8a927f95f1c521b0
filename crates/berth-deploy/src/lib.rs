//! Berth deployment orchestrator.
//!
//! Creating or patching a cluster production persists the record
//! synchronously and hands the actual rollout to a detached pipeline:
//!
//! 1. **FetchCluster**: re-read the cluster and its git branch
//! 2. **Deploy**: build and run the cluster's containers
//! 3. **ProxySync**: write and enable the production site for the new ports
//! 4. **ProxyRestart**
//! 5. **DnsSync**
//! 6. **DnsRestart**
//!
//! Pipeline failures never reach the caller. They are logged and recorded
//! as the namespace's last outcome in the [`DeployTracker`]. Pipelines of one
//! namespace are serialized by a per-namespace lease.

pub mod capability;
pub mod error;
#[cfg(test)]
mod fakes;
pub mod orchestrator;
pub mod pipeline;
pub mod tracker;

pub use capability::{
    DeploymentEnvelope, DnsService, DockerService, ProxyService, RpcDnsService, RpcDockerService,
};
pub use error::{DeployError, DeployResult, PipelineError};
pub use orchestrator::ProductionOrchestrator;
pub use pipeline::{Pipeline, PipelineRequest, StepFailure};
pub use tracker::{
    DeployOutcome, DeployStatus, DeployStep, DeployTicket, DeployTracker, LeaseGuard,
};
