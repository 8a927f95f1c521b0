//! redb table definitions for the Berth state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Clusters keyed by `{namespace}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Git branches keyed by `{branch_id}`.
pub const GIT_BRANCHES: TableDefinition<&str, &[u8]> = TableDefinition::new("git_branches");

/// Containers keyed by `{cluster_namespace}:{container_id}`.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Cluster productions keyed by `{production_id}`.
pub const PRODUCTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("productions");

/// Production id keyed by `{cluster_namespace}`. At most one entry per namespace.
pub const PRODUCTION_BY_NAMESPACE: TableDefinition<&str, &str> =
    TableDefinition::new("production_by_namespace");
