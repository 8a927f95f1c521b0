//! Domain types for the Berth state store.
//!
//! These types represent the persisted records the orchestrator reads and
//! writes: clusters and their git-branch/container relations, and the
//! production configuration attached to a cluster.

use serde::{Deserialize, Serialize};

/// Unique identifier for a cluster.
pub type ClusterId = String;

/// Unique identifier for a cluster production.
pub type ProductionId = String;

// ── Cluster ────────────────────────────────────────────────────────

/// A deployable unit of one project version, tied to a git branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    /// Globally unique; the stable key for proxy and DNS artifact names.
    pub namespace: String,
    pub name: String,
    pub project_name: String,
    pub git_branch_id: Option<String>,
}

/// Snapshot of a git branch a cluster deploys from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitBranch {
    pub id: String,
    pub name: String,
    pub last_commit_sha: String,
}

/// A container belonging to a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub id: String,
    pub cluster_namespace: String,
    pub name: String,
    /// Host port the container publishes, once running.
    pub port: Option<u16>,
}

impl Container {
    /// Composite table key: `{cluster_namespace}:{id}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.cluster_namespace, self.id)
    }
}

/// A cluster read together with its git-branch and container relations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterDetail {
    pub cluster: Cluster,
    pub git_branch: Option<GitBranch>,
    pub containers: Vec<Container>,
}

impl ClusterDetail {
    /// Published host ports of the cluster's containers, in key order.
    pub fn ports(&self) -> Vec<u16> {
        self.containers.iter().filter_map(|c| c.port).collect()
    }
}

// ── Production ─────────────────────────────────────────────────────

/// The live-traffic configuration of exactly one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterProduction {
    pub id: ProductionId,
    pub cluster_id: ClusterId,
    pub cluster_namespace: String,
    pub project_name: String,
    pub domain: String,
    pub number_of_instances: u32,
}

impl ClusterProduction {
    /// Apply a patch: only `domain` and `number_of_instances` change, and an
    /// omitted field keeps its prior value.
    pub fn merged(&self, patch: &ProductionPatch) -> Self {
        Self {
            domain: patch.domain.clone().unwrap_or_else(|| self.domain.clone()),
            number_of_instances: patch
                .number_of_instances
                .unwrap_or(self.number_of_instances),
            ..self.clone()
        }
    }
}

/// Body of a production create request. Identity fields are assigned by
/// the store and the caller's project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewProduction {
    pub cluster_namespace: String,
    pub domain: String,
    pub number_of_instances: u32,
}

/// Partial update of a production. Fields other than these are immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductionPatch {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub number_of_instances: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production() -> ClusterProduction {
        ClusterProduction {
            id: "p1".to_string(),
            cluster_id: "c1".to_string(),
            cluster_namespace: "shop-main".to_string(),
            project_name: "shop".to_string(),
            domain: "shop.example.com".to_string(),
            number_of_instances: 2,
        }
    }

    #[test]
    fn merge_keeps_omitted_fields() {
        let merged = production().merged(&ProductionPatch {
            domain: None,
            number_of_instances: Some(4),
        });
        assert_eq!(merged.number_of_instances, 4);
        assert_eq!(merged.domain, "shop.example.com");
    }

    #[test]
    fn merge_never_touches_identity() {
        let merged = production().merged(&ProductionPatch {
            domain: Some("new.example.com".to_string()),
            number_of_instances: None,
        });
        assert_eq!(merged.cluster_namespace, "shop-main");
        assert_eq!(merged.project_name, "shop");
        assert_eq!(merged.id, "p1");
        assert_eq!(merged.domain, "new.example.com");
    }

    #[test]
    fn patch_ignores_identity_fields_in_json() {
        let patch: ProductionPatch =
            serde_json::from_str(r#"{"project_name": "evil", "number_of_instances": 3}"#).unwrap();
        assert_eq!(patch.number_of_instances, Some(3));
        assert_eq!(patch.domain, None);
    }

    #[test]
    fn detail_ports_skip_unpublished() {
        let detail = ClusterDetail {
            cluster: Cluster {
                id: "c1".to_string(),
                namespace: "ns".to_string(),
                name: "main".to_string(),
                project_name: "shop".to_string(),
                git_branch_id: None,
            },
            git_branch: None,
            containers: vec![
                Container {
                    id: "a".to_string(),
                    cluster_namespace: "ns".to_string(),
                    name: "a".to_string(),
                    port: Some(3000),
                },
                Container {
                    id: "b".to_string(),
                    cluster_namespace: "ns".to_string(),
                    name: "b".to_string(),
                    port: None,
                },
            ],
        };
        assert_eq!(detail.ports(), vec![3000]);
    }
}
