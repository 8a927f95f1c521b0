//! Scripted capabilities and a seeded store shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use berth_proxy::ProdConfig;
use berth_state::{
    Cluster, ClusterProduction, ClusterRepository, Container, GitBranch, NewProduction, StateStore,
};
use tokio::sync::Semaphore;

use crate::capability::{
    CapabilityFuture, DeploymentEnvelope, DnsService, DockerService, ProxyService,
};
use crate::orchestrator::ProductionOrchestrator;
use crate::pipeline::Pipeline;

pub const NAMESPACE: &str = "shop-main";

type Events = Arc<Mutex<Vec<String>>>;

pub struct FakeDocker {
    events: Events,
    gate: Option<Arc<Semaphore>>,
    fail: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    instances: Mutex<Vec<u32>>,
}

impl FakeDocker {
    fn new(events: Events, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            events,
            gate,
            fail: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            instances: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Let `n` gated deploys through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Instance counts requested by each deploy, in call order.
    pub fn instances(&self) -> Vec<u32> {
        self.instances.lock().unwrap().clone()
    }
}

impl DockerService for FakeDocker {
    fn deploy_cluster<'a>(
        &'a self,
        cluster: &'a Cluster,
        production: &'a ClusterProduction,
        envelope: &'a DeploymentEnvelope,
    ) -> CapabilityFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.instances
                .lock()
                .unwrap()
                .push(production.number_of_instances);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                bail!("image build failed");
            }
            self.events
                .lock()
                .unwrap()
                .push(format!("docker:{}@{}", cluster.namespace, envelope.last_commit));
            Ok(())
        })
    }
}

pub struct FakeProxy {
    events: Events,
    fail_sync: AtomicBool,
    previous: Mutex<Vec<Option<String>>>,
}

impl FakeProxy {
    pub fn fail_sync(&self) {
        self.fail_sync.store(true, Ordering::SeqCst);
    }

    pub fn previous_domains(&self) -> Vec<Option<String>> {
        self.previous.lock().unwrap().clone()
    }
}

impl ProxyService for FakeProxy {
    fn sync_site<'a>(
        &'a self,
        site: &'a ProdConfig,
        previous: Option<&'a ProdConfig>,
    ) -> CapabilityFuture<'a> {
        Box::pin(async move {
            if self.fail_sync.load(Ordering::SeqCst) {
                bail!("nginx config test failed");
            }
            self.previous
                .lock()
                .unwrap()
                .push(previous.map(|p| p.domain.clone()));
            self.events.lock().unwrap().push(format!(
                "proxy_sync:{}:{}:{:?}",
                site.filename(),
                site.domain,
                site.ports
            ));
            Ok(())
        })
    }

    fn restart(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            self.events.lock().unwrap().push("proxy_restart".to_string());
            Ok(())
        })
    }
}

pub struct FakeDns {
    events: Events,
    fail_restart: AtomicBool,
}

impl FakeDns {
    pub fn fail_restart(&self) {
        self.fail_restart.store(true, Ordering::SeqCst);
    }
}

impl DnsService for FakeDns {
    fn config_sync(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            self.events.lock().unwrap().push("dns_sync".to_string());
            Ok(())
        })
    }

    fn restart_service(&self) -> CapabilityFuture<'_> {
        Box::pin(async move {
            if self.fail_restart.load(Ordering::SeqCst) {
                bail!("dnsmasq did not come back");
            }
            self.events.lock().unwrap().push("dns_restart".to_string());
            Ok(())
        })
    }
}

/// A store seeded with one cluster plus the fakes around it.
pub struct Harness {
    pub store: StateStore,
    pub docker: Arc<FakeDocker>,
    pub proxy: Arc<FakeProxy>,
    pub dns: Arc<FakeDns>,
    events: Events,
}

impl Harness {
    pub fn seeded() -> Self {
        Self::build(&[3000, 3001], None)
    }

    pub fn with_ports(ports: &[u16]) -> Self {
        Self::build(ports, None)
    }

    /// Docker deploys block until released with [`FakeDocker::release`].
    pub fn gated() -> Self {
        Self::build(&[3000, 3001], Some(Arc::new(Semaphore::new(0))))
    }

    fn build(ports: &[u16], gate: Option<Arc<Semaphore>>) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        seed_cluster(&store, NAMESPACE, "main", "b1", ports);
        let events = Events::default();
        Self {
            store,
            docker: Arc::new(FakeDocker::new(Arc::clone(&events), gate)),
            proxy: Arc::new(FakeProxy {
                events: Arc::clone(&events),
                fail_sync: AtomicBool::new(false),
                previous: Mutex::new(Vec::new()),
            }),
            dns: Arc::new(FakeDns {
                events: Arc::clone(&events),
                fail_restart: AtomicBool::new(false),
            }),
            events,
        }
    }

    /// Store the production the pipeline deploys, as `create` would.
    pub fn seed_production(&self) {
        self.store
            .insert_production(
                &format!("{NAMESPACE}-id"),
                "shop",
                &new_production(NAMESPACE, "shop.example.com"),
            )
            .unwrap();
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            Arc::new(self.store.clone()),
            self.docker.clone(),
            self.proxy.clone(),
            self.dns.clone(),
        )
    }

    pub fn orchestrator(&self) -> ProductionOrchestrator {
        self.orchestrator_with(Arc::new(self.store.clone()))
    }

    pub fn orchestrator_with(&self, repo: Arc<dyn ClusterRepository>) -> ProductionOrchestrator {
        ProductionOrchestrator::new(
            repo,
            self.docker.clone(),
            self.proxy.clone(),
            self.dns.clone(),
        )
    }
}

pub fn seed_cluster(store: &StateStore, namespace: &str, name: &str, branch_id: &str, ports: &[u16]) {
    store
        .put_git_branch(&GitBranch {
            id: branch_id.to_string(),
            name: name.to_string(),
            last_commit_sha: "abc123".to_string(),
        })
        .unwrap();
    store
        .put_cluster(&Cluster {
            id: format!("{namespace}-id"),
            namespace: namespace.to_string(),
            name: name.to_string(),
            project_name: "shop".to_string(),
            git_branch_id: Some(branch_id.to_string()),
        })
        .unwrap();
    for (i, port) in ports.iter().enumerate() {
        store
            .put_container(&Container {
                id: format!("web-{i}"),
                cluster_namespace: namespace.to_string(),
                name: format!("web-{i}"),
                port: Some(*port),
            })
            .unwrap();
    }
}

pub fn new_production(namespace: &str, domain: &str) -> NewProduction {
    NewProduction {
        cluster_namespace: namespace.to_string(),
        domain: domain.to_string(),
        number_of_instances: 2,
    }
}
