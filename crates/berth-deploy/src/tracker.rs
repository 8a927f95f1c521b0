//! Per-namespace deploy bookkeeping.
//!
//! Each namespace gets a slot holding a lease, a generation counter, the
//! outcome of its most recently requested deploy, and a completion signal.
//! The lease is handed out by generation: a deploy may only start once
//! every earlier generation of its namespace has released it, so
//! overlapping deploys run one after the other in request order no matter
//! which task the runtime polls first. Slots of different namespaces share
//! nothing but the map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    FetchCluster,
    Deploy,
    ProxySync,
    ProxyRestart,
    DnsSync,
    DnsRestart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeployStatus {
    Queued,
    Running { step: DeployStep },
    Succeeded,
    Failed { step: DeployStep, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub namespace: String,
    /// Increments with every deploy requested for the namespace.
    pub generation: u64,
    pub status: DeployStatus,
    pub queued_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

struct Slot {
    /// Highest generation that has released the lease.
    released: Arc<watch::Sender<u64>>,
    generation: u64,
    outcome: Option<DeployOutcome>,
    finished: watch::Sender<u64>,
}

impl Slot {
    fn new() -> Self {
        let (finished, _) = watch::channel(0);
        let (released, _) = watch::channel(0);
        Self {
            released: Arc::new(released),
            generation: 0,
            outcome: None,
            finished,
        }
    }
}

#[derive(Clone, Default)]
pub struct DeployTracker {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl DeployTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new deploy for `namespace` and return its ticket. The
    /// outcome switches to `Queued` for the new generation immediately.
    pub async fn enqueue(&self, namespace: &str) -> DeployTicket {
        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(namespace.to_string())
            .or_insert_with(Slot::new);
        slot.generation += 1;
        slot.outcome = Some(DeployOutcome {
            namespace: namespace.to_string(),
            generation: slot.generation,
            status: DeployStatus::Queued,
            queued_at: epoch_secs(),
            started_at: None,
            finished_at: None,
        });
        DeployTicket {
            tracker: self.clone(),
            namespace: namespace.to_string(),
            generation: slot.generation,
            released: Arc::clone(&slot.released),
        }
    }

    /// Outcome of the most recently requested deploy of `namespace`.
    pub async fn last_outcome(&self, namespace: &str) -> Option<DeployOutcome> {
        self.slots
            .read()
            .await
            .get(namespace)
            .and_then(|slot| slot.outcome.clone())
    }

    /// Wait until the most recently requested deploy of `namespace` has
    /// finished, then return its outcome. `None` if nothing was ever
    /// requested for it.
    pub async fn wait(&self, namespace: &str) -> Option<DeployOutcome> {
        let (target, mut finished) = {
            let slots = self.slots.read().await;
            let slot = slots.get(namespace)?;
            (slot.generation, slot.finished.subscribe())
        };
        let _ = finished.wait_for(|done| *done >= target).await;
        self.last_outcome(namespace).await
    }

    async fn update(&self, namespace: &str, generation: u64, f: impl FnOnce(&mut DeployOutcome)) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(namespace) else {
            return;
        };
        // A newer request owns the outcome; older runs only log.
        if slot.generation != generation {
            return;
        }
        if let Some(outcome) = slot.outcome.as_mut() {
            f(outcome);
        }
    }

    async fn mark_finished(&self, namespace: &str, generation: u64) {
        let slots = self.slots.read().await;
        if let Some(slot) = slots.get(namespace) {
            slot.finished.send_modify(|done| *done = (*done).max(generation));
        }
    }
}

/// Handle a background deploy uses to take the lease and report progress.
pub struct DeployTicket {
    tracker: DeployTracker,
    namespace: String,
    generation: u64,
    released: Arc<watch::Sender<u64>>,
}

impl DeployTicket {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait until every earlier generation has released the namespace
    /// lease. Held until the guard drops.
    pub async fn acquire(&self) -> LeaseGuard {
        let mut released = self.released.subscribe();
        // The slot keeps the sender alive, so this only ends on our turn.
        let _ = released
            .wait_for(|done| *done + 1 >= self.generation)
            .await;
        LeaseGuard {
            released: Arc::clone(&self.released),
            generation: self.generation,
        }
    }

    pub async fn step(&self, step: DeployStep) {
        self.tracker
            .update(&self.namespace, self.generation, |outcome| {
                outcome.started_at.get_or_insert_with(epoch_secs);
                outcome.status = DeployStatus::Running { step };
            })
            .await;
    }

    pub async fn succeed(self) {
        self.finish(DeployStatus::Succeeded).await;
    }

    pub async fn fail(self, step: DeployStep, error: String) {
        self.finish(DeployStatus::Failed { step, error }).await;
    }

    async fn finish(self, status: DeployStatus) {
        self.tracker
            .update(&self.namespace, self.generation, |outcome| {
                outcome.started_at.get_or_insert_with(epoch_secs);
                outcome.finished_at = Some(epoch_secs());
                outcome.status = status;
            })
            .await;
        self.tracker
            .mark_finished(&self.namespace, self.generation)
            .await;
    }
}

/// Exclusive right to deploy a namespace. Dropping it, including on panic,
/// passes the lease to the next generation.
pub struct LeaseGuard {
    released: Arc<watch::Sender<u64>>,
    generation: u64,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let generation = self.generation;
        self.released
            .send_modify(|done| *done = (*done).max(generation));
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
