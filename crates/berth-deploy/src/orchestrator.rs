//! ProductionOrchestrator: validates and persists production changes, then
//! hands the rollout to a detached pipeline.

use std::sync::Arc;

use berth_state::{
    ClusterProduction, ClusterRepository, NewProduction, ProductionPatch, StateError,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::capability::{DnsService, DockerService, ProxyService};
use crate::error::{DeployError, DeployResult};
use crate::pipeline::{Pipeline, PipelineRequest};
use crate::tracker::{DeployOutcome, DeployTracker};

#[derive(Clone)]
pub struct ProductionOrchestrator {
    repo: Arc<dyn ClusterRepository>,
    pipeline: Pipeline,
    tracker: DeployTracker,
    running: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ProductionOrchestrator {
    pub fn new(
        repo: Arc<dyn ClusterRepository>,
        docker: Arc<dyn DockerService>,
        proxy: Arc<dyn ProxyService>,
        dns: Arc<dyn DnsService>,
    ) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&repo), docker, proxy, dns);
        Self {
            repo,
            pipeline,
            tracker: DeployTracker::new(),
            running: Arc::default(),
        }
    }

    /// Attach a production to a cluster and start deploying it. Returns the
    /// persisted record as soon as it is stored; the deploy itself runs in
    /// the background. Calling this twice for one cluster is an error.
    pub async fn create(
        &self,
        project_name: &str,
        spec: NewProduction,
    ) -> DeployResult<ClusterProduction> {
        let namespace = spec.cluster_namespace.clone();
        let detail = self
            .repo
            .find_cluster_by_namespace(&namespace)?
            .filter(|detail| detail.git_branch.is_some())
            .ok_or_else(|| DeployError::ClusterNotFound(namespace.clone()))?;

        if self.repo.find_production_by_namespace(&namespace)?.is_some() {
            return Err(DeployError::ProductionAlreadyExists(namespace));
        }

        let production = match self
            .repo
            .create_production(&detail.cluster.id, project_name, &spec)
        {
            Ok(production) => production,
            Err(StateError::Conflict(_)) => {
                return Err(DeployError::ProductionAlreadyExists(namespace));
            }
            Err(e) => return Err(e.into()),
        };
        info!(%namespace, project = %project_name, domain = %production.domain, "production created");

        self.launch(PipelineRequest {
            namespace,
            previous_domain: None,
        })
        .await;
        Ok(production)
    }

    /// Change a production's domain or instance count and redeploy. Fields
    /// left out of `patch` keep their value; applying the same patch twice
    /// yields the same record.
    pub async fn patch(
        &self,
        namespace: &str,
        patch: ProductionPatch,
    ) -> DeployResult<ClusterProduction> {
        let current = self
            .repo
            .find_production_by_namespace(namespace)?
            .ok_or_else(|| DeployError::ProductionNotFound(namespace.to_string()))?;
        if self.repo.find_cluster_by_namespace(namespace)?.is_none() {
            return Err(DeployError::ClusterNotFound(namespace.to_string()));
        }

        match self.repo.update_production(&current.id, &patch) {
            Ok(()) => {}
            Err(StateError::NotFound(_)) => {
                return Err(DeployError::ProductionNotFound(namespace.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        let merged = current.merged(&patch);
        info!(%namespace, domain = %merged.domain, instances = merged.number_of_instances, "production patched");

        let previous_domain = (merged.domain != current.domain).then_some(current.domain);
        self.launch(PipelineRequest {
            namespace: namespace.to_string(),
            previous_domain,
        })
        .await;
        Ok(merged)
    }

    pub fn get(&self, namespace: &str) -> DeployResult<ClusterProduction> {
        self.repo
            .find_production_by_namespace(namespace)?
            .ok_or_else(|| DeployError::ProductionNotFound(namespace.to_string()))
    }

    pub async fn last_outcome(&self, namespace: &str) -> Option<DeployOutcome> {
        self.tracker.last_outcome(namespace).await
    }

    /// Wait for the most recently requested deploy of `namespace`.
    pub async fn wait(&self, namespace: &str) -> Option<DeployOutcome> {
        self.tracker.wait(namespace).await
    }

    /// Wait for every queued or running deploy, superseded generations
    /// included, to settle.
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *self.running.lock().await);
        debug!(count = handles.len(), "draining deploys");
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "deploy task aborted");
            }
        }
    }

    async fn launch(&self, request: PipelineRequest) {
        let ticket = self.tracker.enqueue(&request.namespace).await;
        let pipeline = self.pipeline.clone();
        let handle = tokio::spawn(async move {
            let _lease = ticket.acquire().await;
            let generation = ticket.generation();
            info!(namespace = %ticket.namespace(), generation, "deploy started");
            match pipeline.run(&request, &ticket).await {
                Ok(()) => {
                    info!(namespace = %ticket.namespace(), generation, "deploy succeeded");
                    ticket.succeed().await;
                }
                Err(failure) => {
                    error!(
                        namespace = %ticket.namespace(),
                        generation,
                        step = ?failure.step,
                        error = %failure.error,
                        "deploy failed"
                    );
                    ticket.fail(failure.step, failure.error.to_string()).await;
                }
            }
        });

        let mut running = self.running.lock().await;
        running.retain(|handle| !handle.is_finished());
        running.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::*;
    use crate::tracker::{DeployStatus, DeployStep};
    use berth_state::{ClusterDetail, StateResult, StateStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn patch(domain: Option<&str>, instances: Option<u32>) -> ProductionPatch {
        ProductionPatch {
            domain: domain.map(str::to_string),
            number_of_instances: instances,
        }
    }

    #[tokio::test]
    async fn create_returns_before_deploy_finishes() {
        let harness = Harness::gated();
        let orchestrator = harness.orchestrator();

        let production = tokio::time::timeout(
            Duration::from_secs(1),
            orchestrator.create("shop", new_production(NAMESPACE, "shop.example.com")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(production.project_name, "shop");
        assert_eq!(production.cluster_namespace, NAMESPACE);
        assert_eq!(orchestrator.get(NAMESPACE).unwrap(), production);
        assert!(harness.events().is_empty());

        harness.docker.release(1);
        let outcome = orchestrator.wait(NAMESPACE).await.unwrap();
        assert_eq!(outcome.status, DeployStatus::Succeeded);
        assert_eq!(harness.events().len(), 5);
    }

    #[tokio::test]
    async fn create_rejects_unknown_cluster() {
        let harness = Harness::seeded();
        let err = harness
            .orchestrator()
            .create("shop", new_production("ghost", "x.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ClusterNotFound(ns) if ns == "ghost"));
        assert_eq!(harness.docker.calls(), 0);
    }

    #[tokio::test]
    async fn create_rejects_cluster_without_branch() {
        let harness = Harness::seeded();
        harness.store.delete_git_branch("b1").unwrap();
        let err = harness
            .orchestrator()
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ClusterNotFound(_)));
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let harness = Harness::seeded();
        let orchestrator = harness.orchestrator();
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        let err = orchestrator
            .create("shop", new_production(NAMESPACE, "other.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ProductionAlreadyExists(_)));
        assert_eq!(orchestrator.get(NAMESPACE).unwrap().domain, "shop.example.com");
    }

    /// Reports no production on lookup, so `create` reaches the store's
    /// own uniqueness check.
    struct BlindRepo(StateStore);

    impl ClusterRepository for BlindRepo {
        fn find_cluster_by_namespace(&self, ns: &str) -> StateResult<Option<ClusterDetail>> {
            self.0.find_cluster_by_namespace(ns)
        }
        fn find_production_by_namespace(&self, _: &str) -> StateResult<Option<ClusterProduction>> {
            Ok(None)
        }
        fn create_production(
            &self,
            cluster_id: &str,
            project_name: &str,
            spec: &NewProduction,
        ) -> StateResult<ClusterProduction> {
            self.0.create_production(cluster_id, project_name, spec)
        }
        fn update_production(&self, id: &str, patch: &ProductionPatch) -> StateResult<()> {
            self.0.update_production(id, patch)
        }
    }

    #[tokio::test]
    async fn lost_create_race_maps_to_conflict() {
        let harness = Harness::seeded();
        harness.seed_production();
        let orchestrator = harness.orchestrator_with(Arc::new(BlindRepo(harness.store.clone())));
        let err = orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ProductionAlreadyExists(_)));
    }

    #[tokio::test]
    async fn pipeline_failure_is_recorded_not_returned() {
        let harness = Harness::seeded();
        harness.docker.fail();
        let orchestrator = harness.orchestrator();
        let created = orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();

        let outcome = orchestrator.wait(NAMESPACE).await.unwrap();
        match outcome.status {
            DeployStatus::Failed { step, error } => {
                assert_eq!(step, DeployStep::Deploy);
                assert!(error.contains("image build failed"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        // The production stays persisted exactly as created.
        assert_eq!(orchestrator.get(NAMESPACE).unwrap(), created);
        assert!(harness.events().is_empty());
    }

    /// Drops the git branch from every cluster read after the first.
    struct VanishingBranch {
        inner: StateStore,
        reads: AtomicUsize,
    }

    impl ClusterRepository for VanishingBranch {
        fn find_cluster_by_namespace(&self, ns: &str) -> StateResult<Option<ClusterDetail>> {
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            let detail = self.inner.find_cluster_by_namespace(ns)?;
            Ok(detail.map(|mut d| {
                if read > 0 {
                    d.git_branch = None;
                }
                d
            }))
        }
        fn find_production_by_namespace(
            &self,
            ns: &str,
        ) -> StateResult<Option<ClusterProduction>> {
            self.inner.find_production_by_namespace(ns)
        }
        fn create_production(
            &self,
            cluster_id: &str,
            project_name: &str,
            spec: &NewProduction,
        ) -> StateResult<ClusterProduction> {
            self.inner.create_production(cluster_id, project_name, spec)
        }
        fn update_production(&self, id: &str, patch: &ProductionPatch) -> StateResult<()> {
            self.inner.update_production(id, patch)
        }
    }

    #[tokio::test]
    async fn branch_vanishing_fails_in_background() {
        let harness = Harness::seeded();
        let orchestrator = harness.orchestrator_with(Arc::new(VanishingBranch {
            inner: harness.store.clone(),
            reads: AtomicUsize::new(0),
        }));
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();

        let outcome = orchestrator.wait(NAMESPACE).await.unwrap();
        assert!(matches!(
            outcome.status,
            DeployStatus::Failed {
                step: DeployStep::FetchCluster,
                ..
            }
        ));
        assert_eq!(harness.docker.calls(), 0);
    }

    #[tokio::test]
    async fn patch_merges_and_is_idempotent() {
        let harness = Harness::seeded();
        let orchestrator = harness.orchestrator();
        let created = orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        orchestrator.wait(NAMESPACE).await;

        let first = orchestrator
            .patch(NAMESPACE, patch(None, Some(4)))
            .await
            .unwrap();
        orchestrator.wait(NAMESPACE).await;
        let second = orchestrator
            .patch(NAMESPACE, patch(None, Some(4)))
            .await
            .unwrap();
        orchestrator.wait(NAMESPACE).await;

        assert_eq!(first, second);
        assert_eq!(first.id, created.id);
        assert_eq!(first.domain, "shop.example.com");
        assert_eq!(first.number_of_instances, 4);
        assert_eq!(orchestrator.get(NAMESPACE).unwrap(), first);
        assert_eq!(harness.proxy.previous_domains(), vec![None, None, None]);
    }

    #[tokio::test]
    async fn patch_domain_passes_previous_domain() {
        let harness = Harness::seeded();
        let orchestrator = harness.orchestrator();
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        orchestrator.wait(NAMESPACE).await;

        let patched = orchestrator
            .patch(NAMESPACE, patch(Some("store.example.com"), None))
            .await
            .unwrap();
        assert_eq!(patched.number_of_instances, 2);
        let outcome = orchestrator.wait(NAMESPACE).await.unwrap();
        assert_eq!(outcome.status, DeployStatus::Succeeded);
        assert_eq!(
            harness.proxy.previous_domains(),
            vec![None, Some("shop.example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn patched_instance_count_reaches_docker() {
        let harness = Harness::seeded();
        let orchestrator = harness.orchestrator();
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        orchestrator.wait(NAMESPACE).await;

        orchestrator
            .patch(NAMESPACE, patch(None, Some(9)))
            .await
            .unwrap();
        let outcome = orchestrator.wait(NAMESPACE).await.unwrap();
        assert_eq!(outcome.status, DeployStatus::Succeeded);
        assert_eq!(harness.docker.instances(), vec![2, 9]);
    }

    #[tokio::test]
    async fn patch_unknown_production() {
        let harness = Harness::seeded();
        let err = harness
            .orchestrator()
            .patch(NAMESPACE, patch(Some("x.example.com"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ProductionNotFound(_)));
        assert!(matches!(
            harness.orchestrator().get(NAMESPACE),
            Err(DeployError::ProductionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn deploys_of_one_namespace_never_overlap() {
        let harness = Harness::gated();
        let orchestrator = harness.orchestrator();
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        orchestrator
            .patch(NAMESPACE, patch(None, Some(3)))
            .await
            .unwrap();
        orchestrator
            .patch(NAMESPACE, patch(None, Some(4)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.docker.calls(), 1);

        harness.docker.release(3);
        let outcome = orchestrator.wait(NAMESPACE).await.unwrap();
        assert_eq!(outcome.generation, 3);
        assert_eq!(outcome.status, DeployStatus::Succeeded);
        assert_eq!(harness.docker.calls(), 3);
        assert_eq!(harness.docker.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn namespaces_deploy_independently() {
        let harness = Harness::gated();
        seed_cluster(&harness.store, "blog-main", "main", "b2", &[4000]);
        let orchestrator = harness.orchestrator();
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        orchestrator
            .create("blog", new_production("blog-main", "blog.example.com"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // Both are inside docker at the same time.
        assert_eq!(harness.docker.calls(), 2);
        assert_eq!(harness.docker.max_in_flight(), 2);

        harness.docker.release(2);
        orchestrator.drain().await;
        assert_eq!(
            orchestrator.last_outcome("blog-main").await.unwrap().status,
            DeployStatus::Succeeded
        );
        assert_eq!(
            orchestrator.last_outcome(NAMESPACE).await.unwrap().status,
            DeployStatus::Succeeded
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drain_waits_for_superseded_deploys() {
        let harness = Harness::gated();
        let orchestrator = harness.orchestrator();
        orchestrator
            .create("shop", new_production(NAMESPACE, "shop.example.com"))
            .await
            .unwrap();
        orchestrator
            .patch(NAMESPACE, patch(None, Some(5)))
            .await
            .unwrap();

        harness.docker.release(2);
        tokio::time::timeout(Duration::from_secs(5), orchestrator.drain())
            .await
            .unwrap();
        assert_eq!(harness.docker.calls(), 2);
        assert_eq!(harness.docker.max_in_flight(), 1);
        assert_eq!(harness.events().len(), 10);
        let outcome = orchestrator.last_outcome(NAMESPACE).await.unwrap();
        assert_eq!(outcome.generation, 2);
        assert_eq!(outcome.status, DeployStatus::Succeeded);
    }
}
