//! Supervisor error types.

use thiserror::Error;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("build of {service} failed: {reason}")]
    Build { service: String, reason: String },

    #[error("start of {service} failed: {reason}")]
    Start { service: String, reason: String },

    #[error("runner for {service} printed {output:?}, expected a pid")]
    InvalidPid { service: String, output: String },

    #[error("signalling pid {pid} as {user} failed: {reason}")]
    Kill {
        pid: u32,
        user: String,
        reason: String,
    },

    #[error("{service} already has a live process (pid {pid})")]
    AlreadyRunning { service: String, pid: u32 },

    #[error("service not registered: {0}")]
    UnknownService(String),

    #[error("must run as {expected}, running as {actual}")]
    UserMismatch { expected: String, actual: String },

    #[error("invalid service definition: {0}")]
    Manifest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system error: {0}")]
    Sys(#[from] nix::errno::Errno),
}
