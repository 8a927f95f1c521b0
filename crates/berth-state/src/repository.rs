//! The accessor surface the deployment orchestrator depends on.
//!
//! The orchestrator never talks to redb directly. It reads and writes
//! through [`ClusterRepository`], which [`StateStore`] implements and tests
//! can replace with scripted fakes.

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::*;

/// Read/write accessors with the query shapes the orchestrator needs.
pub trait ClusterRepository: Send + Sync {
    /// Look up a cluster with its git branch and containers included.
    fn find_cluster_by_namespace(&self, namespace: &str) -> StateResult<Option<ClusterDetail>>;

    /// Look up the production attached to a cluster namespace.
    fn find_production_by_namespace(
        &self,
        namespace: &str,
    ) -> StateResult<Option<ClusterProduction>>;

    /// Persist a new production for a cluster. Must fail with
    /// `StateError::Conflict` if the namespace already has one.
    fn create_production(
        &self,
        cluster_id: &str,
        project_name: &str,
        spec: &NewProduction,
    ) -> StateResult<ClusterProduction>;

    /// Merge the mutable fields of `patch` into the stored production.
    fn update_production(&self, id: &str, patch: &ProductionPatch) -> StateResult<()>;
}

impl ClusterRepository for StateStore {
    fn find_cluster_by_namespace(&self, namespace: &str) -> StateResult<Option<ClusterDetail>> {
        self.get_cluster_detail(namespace)
    }

    fn find_production_by_namespace(
        &self,
        namespace: &str,
    ) -> StateResult<Option<ClusterProduction>> {
        self.get_production_by_namespace(namespace)
    }

    fn create_production(
        &self,
        cluster_id: &str,
        project_name: &str,
        spec: &NewProduction,
    ) -> StateResult<ClusterProduction> {
        self.insert_production(cluster_id, project_name, spec)
    }

    fn update_production(&self, id: &str, patch: &ProductionPatch) -> StateResult<()> {
        self.patch_production(id, patch)
    }
}
