//! Tracked services, keyed by name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SupervisorError, SupervisorResult};

/// Lifecycle of a supervised service. There is no restart: a terminated
/// service stays terminated until the supervisor is started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Unbuilt,
    Built,
    Running,
    Terminated,
}

/// Snapshot of one tracked service, as served on `/services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub user: String,
    pub pid: Option<u32>,
    pub state: ServiceState,
}

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceStatus>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a service in the `Unbuilt` state. Re-registering a service
    /// that is not running resets it.
    pub fn register(&mut self, name: &str, user: &str) -> SupervisorResult<()> {
        if let Some(ServiceStatus {
            state: ServiceState::Running,
            pid: Some(pid),
            ..
        }) = self.services.get(name)
        {
            return Err(SupervisorError::AlreadyRunning {
                service: name.to_string(),
                pid: *pid,
            });
        }
        self.services.insert(
            name.to_string(),
            ServiceStatus {
                name: name.to_string(),
                user: user.to_string(),
                pid: None,
                state: ServiceState::Unbuilt,
            },
        );
        Ok(())
    }

    pub fn mark_built(&mut self, name: &str) -> SupervisorResult<()> {
        self.get_mut(name)?.state = ServiceState::Built;
        Ok(())
    }

    pub fn mark_running(&mut self, name: &str, pid: u32) -> SupervisorResult<()> {
        let service = self.get_mut(name)?;
        if let (ServiceState::Running, Some(live)) = (service.state, service.pid) {
            return Err(SupervisorError::AlreadyRunning {
                service: name.to_string(),
                pid: live,
            });
        }
        service.pid = Some(pid);
        service.state = ServiceState::Running;
        Ok(())
    }

    pub fn mark_terminated(&mut self, name: &str) -> SupervisorResult<()> {
        self.get_mut(name)?.state = ServiceState::Terminated;
        Ok(())
    }

    /// `(name, pid, user)` of every service with a live process.
    pub fn running(&self) -> Vec<(String, u32, String)> {
        self.services
            .values()
            .filter(|s| s.state == ServiceState::Running)
            .filter_map(|s| s.pid.map(|pid| (s.name.clone(), pid, s.user.clone())))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.get(name)
    }

    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        self.services.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn get_mut(&mut self, name: &str) -> SupervisorResult<&mut ServiceStatus> {
        self.services
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))
    }
}
