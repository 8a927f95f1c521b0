//! Fleet lifecycle: sequential startup, PID marker, signal-driven teardown.

use std::path::PathBuf;
use std::sync::Arc;

use berth_core::{MissingEntryPolicy, ServiceDef, SupervisorConfig};
use berth_rpc::{RpcError, RpcServer};
use nix::sys::signal::Signal;
use nix::unistd::{User, geteuid};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::launcher::{ProcessLauncher, env_args};
use crate::registry::{ServiceRegistry, ServiceStatus};

pub const OP_SERVICES: &str = "/services";

/// What `start_all` did, service by service.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartReport {
    pub started: Vec<String>,
    pub skipped: Vec<String>,
    /// Set when a missing entry point stopped the sequence under
    /// [`MissingEntryPolicy::Halt`].
    pub halted_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StopReport {
    pub signalled: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    launcher: Arc<dyn ProcessLauncher>,
    registry: Arc<RwLock<ServiceRegistry>>,
    env: Vec<String>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let env = env_args(&config.propagate_env);
        Self {
            config,
            launcher,
            registry: Arc::new(RwLock::new(ServiceRegistry::new())),
            env,
        }
    }

    /// Replace the forwarded environment (`KEY=value` entries).
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn registry(&self) -> Arc<RwLock<ServiceRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.config.pid_path()
    }

    /// Resolve every configured service against its `package.json`.
    pub fn load_services(&self) -> SupervisorResult<Vec<ServiceDef>> {
        self.config
            .services
            .iter()
            .map(|svc| {
                ServiceDef::load(svc)
                    .map_err(|e| SupervisorError::Manifest(format!("{}: {e:#}", svc.name)))
            })
            .collect()
    }

    /// Build and start each service in order.
    ///
    /// A build or start failure aborts the sequence with an error; services
    /// already started stay tracked so a later [`Supervisor::stop`] still
    /// tears them down.
    pub async fn start_all(&self, services: &[ServiceDef]) -> SupervisorResult<StartReport> {
        let mut report = StartReport::default();

        for service in services {
            let Some(entry) = service.entry_point() else {
                warn!(
                    service = %service.name,
                    "package.json has no main entry, cannot start"
                );
                match self.config.on_missing_entry {
                    MissingEntryPolicy::Halt => {
                        report.halted_at = Some(service.name.clone());
                        return Ok(report);
                    }
                    MissingEntryPolicy::Skip => {
                        report.skipped.push(service.name.clone());
                        continue;
                    }
                }
            };

            self.registry
                .write()
                .await
                .register(&service.name, &service.user)?;

            if service.needs_build(self.config.mode) {
                self.launcher.build(service, &self.env).await?;
            } else {
                debug!(service = %service.name, "skipping development build");
            }
            self.registry.write().await.mark_built(&service.name)?;

            let pid = self.launcher.start(service, &entry, &self.env).await?;
            self.registry
                .write()
                .await
                .mark_running(&service.name, pid)?;
            info!(service = %service.name, pid, user = %service.user, "service started");
            report.started.push(service.name.clone());
        }

        Ok(report)
    }

    /// Start the fleet, bind the supervisor endpoint, then write the PID
    /// marker. The marker is never written if any earlier step fails.
    pub async fn startup(
        &self,
        services: &[ServiceDef],
    ) -> SupervisorResult<(TcpListener, StartReport)> {
        let report = self.start_all(services).await?;
        let listener = TcpListener::bind(&self.config.listen).await?;
        self.write_pid_marker().await?;
        info!(
            addr = %listener.local_addr()?,
            pid = std::process::id(),
            started = report.started.len(),
            "supervisor ready"
        );
        Ok((listener, report))
    }

    pub async fn write_pid_marker(&self) -> SupervisorResult<()> {
        let path = self.pid_path();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, std::process::id().to_string()).await?;
        debug!(path = %path.display(), "pid marker written");
        Ok(())
    }

    /// Remove the PID marker, then signal every running service as its own
    /// user. Individual failures are logged and never stop the loop.
    pub async fn stop(&self, signal: Signal) -> StopReport {
        let path = self.pid_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "pid marker removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove pid marker"),
        }

        let running = self.registry.read().await.running();
        let mut report = StopReport::default();
        for (name, pid, user) in running {
            match self.launcher.kill(pid, &user, signal).await {
                Ok(()) => {
                    info!(service = %name, pid, signal = signal.as_str(), "service signalled");
                    report.signalled.push(name.clone());
                }
                Err(e) => {
                    error!(service = %name, pid, error = %e, "failed to signal service");
                    report.failed.push(name.clone());
                }
            }
            if let Err(e) = self.registry.write().await.mark_terminated(&name) {
                warn!(service = %name, error = %e, "registry out of sync");
            }
        }
        report
    }

    /// The supervisor's own RPC surface.
    pub fn rpc_server(&self) -> RpcServer {
        let registry = Arc::clone(&self.registry);
        RpcServer::new().call(OP_SERVICES, move |_: serde_json::Value| {
            let registry = Arc::clone(&registry);
            async move { Ok::<Vec<ServiceStatus>, RpcError>(registry.read().await.snapshot()) }
        })
    }
}

/// Refuse to run as anyone but `expected`.
pub fn ensure_user(expected: &str) -> SupervisorResult<()> {
    let uid = geteuid();
    let actual = User::from_uid(uid)?
        .map(|u| u.name)
        .unwrap_or_else(|| uid.to_string());
    if actual != expected {
        return Err(SupervisorError::UserMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
