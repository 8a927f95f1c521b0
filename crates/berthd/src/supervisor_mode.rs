//! Supervisor mode: the service fleet on one host.
//!
//! In this mode, the daemon:
//! 1. Checks it runs as the configured core user
//! 2. Builds and starts every service, in order
//! 3. Serves the `/services` RPC and writes the PID marker
//! 4. On SIGINT/SIGTERM, forwards the signal to every service and exits
//!
//! A signal is honoured at any point, including while a build is still
//! running. A failed startup leaves the daemon waiting for a signal so
//! whatever was already started still gets torn down.

use std::future::Future;
use std::sync::Arc;

use berth_core::BerthConfig;
use berth_supervisor::{
    Signal, StartReport, StopReport, SudoLauncher, Supervisor, SupervisorResult, ensure_user,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::signals::ShutdownSignals;

pub async fn run_supervisor(config: BerthConfig) -> anyhow::Result<()> {
    info!(mode = ?config.supervisor.mode, "Berth supervisor starting");
    let mut signals = ShutdownSignals::install()?;

    if let Some(user) = &config.supervisor.core_user {
        ensure_user(user)?;
    }

    let launcher = Arc::new(SudoLauncher::current_exe()?);
    let supervisor = Supervisor::new(config.supervisor, launcher);
    let report = supervise(&supervisor, signals.recv()).await;

    info!(
        signalled = report.signalled.len(),
        failed = report.failed.len(),
        "supervisor stopped"
    );
    Ok(())
}

/// Start the fleet and serve it until `shutdown` resolves, then signal
/// every started service with the received signal.
async fn supervise(supervisor: &Supervisor, shutdown: impl Future<Output = Signal>) -> StopReport {
    tokio::pin!(shutdown);

    // ── Startup ──────────────────────────────────────────────────
    let started = tokio::select! {
        result = start_fleet(supervisor) => result,
        signal = &mut shutdown => {
            warn!(signal = signal.as_str(), "shutdown signal received during startup");
            return supervisor.stop(signal).await;
        }
    };

    let server = match started {
        Ok((listener, report)) => {
            if let Some(service) = &report.halted_at {
                warn!(%service, "startup halted at a service without an entry point");
            }
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let rpc = supervisor.rpc_server();
            let handle = tokio::spawn(rpc.serve_with_shutdown(listener, shutdown_rx));
            Some((shutdown_tx, handle))
        }
        Err(e) => {
            error!(error = %e, "startup failed, waiting for a signal to stop started services");
            None
        }
    };

    // ── Wait for shutdown ────────────────────────────────────────
    let signal = shutdown.await;
    info!(signal = signal.as_str(), "shutdown signal received");
    let report = supervisor.stop(signal).await;

    if let Some((shutdown_tx, handle)) = server {
        let _ = shutdown_tx.send(true);
        if let Ok(Err(e)) = handle.await {
            warn!(error = %e, "supervisor rpc server exited with error");
        }
    }
    report
}

async fn start_fleet(supervisor: &Supervisor) -> SupervisorResult<(TcpListener, StartReport)> {
    let services = supervisor.load_services()?;
    info!(count = services.len(), "services loaded");
    supervisor.startup(&services).await
}
