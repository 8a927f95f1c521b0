//! Berth process supervisor.
//!
//! Builds and launches each configured service as its own unprivileged
//! user, tracks the resulting PIDs in a [`ServiceRegistry`], and tears the
//! whole fleet down when the daemon receives SIGINT or SIGTERM.
//!
//! # Startup
//!
//! Services are handled strictly in configuration order: build (unless
//! skipped in development), then start through the detaching runner. The
//! supervisor's PID marker is written only once the fleet is up and the
//! supervisor RPC endpoint is bound; a failed startup never writes it.

pub mod error;
pub mod launcher;
pub mod registry;
pub mod runner;
pub mod supervisor;

pub use error::{SupervisorError, SupervisorResult};
pub use launcher::{ProcessLauncher, SudoLauncher};
pub use registry::{ServiceRegistry, ServiceState, ServiceStatus};
pub use supervisor::{OP_SERVICES, StartReport, StopReport, Supervisor, ensure_user};

pub use nix::sys::signal::Signal;
