//! StateStore: redb-backed state persistence for Berth.
//!
//! Provides typed CRUD operations over clusters, git branches, containers
//! and cluster productions. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(GIT_BRANCHES).map_err(map_err!(Table))?;
        txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        txn.open_table(PRODUCTIONS).map_err(map_err!(Table))?;
        txn.open_table(PRODUCTION_BY_NAMESPACE)
            .map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or update a cluster, keyed by namespace.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put_json(CLUSTERS, &cluster.namespace, cluster)?;
        debug!(namespace = %cluster.namespace, "cluster stored");
        Ok(())
    }

    /// Get a cluster row by namespace, without relations.
    pub fn get_cluster(&self, namespace: &str) -> StateResult<Option<Cluster>> {
        self.get_json(CLUSTERS, namespace)
    }

    /// Delete a cluster by namespace. Returns true if it existed.
    pub fn delete_cluster(&self, namespace: &str) -> StateResult<bool> {
        self.delete_key(CLUSTERS, namespace)
    }

    /// Read a cluster together with its git branch and containers, all
    /// from one read transaction.
    pub fn get_cluster_detail(&self, namespace: &str) -> StateResult<Option<ClusterDetail>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;

        let clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let cluster: Cluster = match clusters.get(namespace).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => return Ok(None),
        };

        let git_branch = match &cluster.git_branch_id {
            Some(branch_id) => {
                let branches = txn.open_table(GIT_BRANCHES).map_err(map_err!(Table))?;
                match branches.get(branch_id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice::<GitBranch>(guard.value())
                            .map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                }
            }
            None => None,
        };

        let prefix = format!("{namespace}:");
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        let mut containers = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let container: Container =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                containers.push(container);
            }
        }

        Ok(Some(ClusterDetail {
            cluster,
            git_branch,
            containers,
        }))
    }

    // ── Git branches ───────────────────────────────────────────────

    /// Insert or update a git branch snapshot.
    pub fn put_git_branch(&self, branch: &GitBranch) -> StateResult<()> {
        self.put_json(GIT_BRANCHES, &branch.id, branch)?;
        debug!(branch = %branch.name, sha = %branch.last_commit_sha, "git branch stored");
        Ok(())
    }

    /// Get a git branch by id.
    pub fn get_git_branch(&self, id: &str) -> StateResult<Option<GitBranch>> {
        self.get_json(GIT_BRANCHES, id)
    }

    /// Delete a git branch by id. Returns true if it existed.
    pub fn delete_git_branch(&self, id: &str) -> StateResult<bool> {
        self.delete_key(GIT_BRANCHES, id)
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Insert or update a container.
    pub fn put_container(&self, container: &Container) -> StateResult<()> {
        self.put_json(CONTAINERS, &container.table_key(), container)
    }

    /// List all containers of a cluster.
    pub fn list_containers_for_cluster(&self, namespace: &str) -> StateResult<Vec<Container>> {
        let prefix = format!("{namespace}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let container: Container =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(container);
            }
        }
        Ok(results)
    }

    /// Delete a container by its composite key.
    pub fn delete_container(&self, key: &str) -> StateResult<bool> {
        self.delete_key(CONTAINERS, key)
    }

    // ── Productions ────────────────────────────────────────────────

    /// Get a production by id.
    pub fn get_production(&self, id: &str) -> StateResult<Option<ClusterProduction>> {
        self.get_json(PRODUCTIONS, id)
    }

    /// Get the production attached to a cluster namespace, if any.
    pub fn get_production_by_namespace(
        &self,
        namespace: &str,
    ) -> StateResult<Option<ClusterProduction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn
            .open_table(PRODUCTION_BY_NAMESPACE)
            .map_err(map_err!(Table))?;
        let id = match index.get(namespace).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let table = txn.open_table(PRODUCTIONS).map_err(map_err!(Table))?;
        match table.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let production =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(production))
            }
            None => Ok(None),
        }
    }

    /// List all productions.
    pub fn list_productions(&self) -> StateResult<Vec<ClusterProduction>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PRODUCTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let production: ClusterProduction =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(production);
        }
        Ok(results)
    }

    /// Insert a new production. Fails with `Conflict` if the namespace
    /// already has one; the check and both inserts share one transaction.
    pub fn insert_production(
        &self,
        cluster_id: &str,
        project_name: &str,
        spec: &NewProduction,
    ) -> StateResult<ClusterProduction> {
        let production = ClusterProduction {
            id: uuid::Uuid::new_v4().to_string(),
            cluster_id: cluster_id.to_string(),
            cluster_namespace: spec.cluster_namespace.clone(),
            project_name: project_name.to_string(),
            domain: spec.domain.clone(),
            number_of_instances: spec.number_of_instances,
        };
        let value = serde_json::to_vec(&production).map_err(map_err!(Serialize))?;
        let namespace = production.cluster_namespace.as_str();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let exists = {
            let index = txn
                .open_table(PRODUCTION_BY_NAMESPACE)
                .map_err(map_err!(Table))?;
            index.get(namespace).map_err(map_err!(Read))?.is_some()
        };
        if exists {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::Conflict(format!(
                "cluster {namespace} already has a production"
            )));
        }
        {
            let mut index = txn
                .open_table(PRODUCTION_BY_NAMESPACE)
                .map_err(map_err!(Table))?;
            index
                .insert(namespace, production.id.as_str())
                .map_err(map_err!(Write))?;
            let mut table = txn.open_table(PRODUCTIONS).map_err(map_err!(Table))?;
            table
                .insert(production.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%namespace, id = %production.id, "production stored");
        Ok(production)
    }

    /// Merge a patch into a stored production.
    pub fn patch_production(&self, id: &str, patch: &ProductionPatch) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PRODUCTIONS).map_err(map_err!(Table))?;
            let current: ClusterProduction = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("production {id}"))),
            };
            let merged = current.merged(patch);
            let value = serde_json::to_vec(&merged).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, "production patched");
        Ok(())
    }
}
