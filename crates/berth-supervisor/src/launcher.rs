//! Process launching behind a trait seam.
//!
//! [`SudoLauncher`] runs every command through `sudo -u <service user>`,
//! passing the whitelisted environment as `KEY=value` arguments. Tests swap
//! in a recording launcher.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use berth_core::ServiceDef;
use nix::sys::signal::Signal;
use tokio::process::Command;
use tracing::debug;

use crate::error::{SupervisorError, SupervisorResult};

pub type LaunchFuture<'a, T> = Pin<Box<dyn Future<Output = SupervisorResult<T>> + Send + 'a>>;

pub trait ProcessLauncher: Send + Sync {
    /// Run the service's build command in its directory, as its user.
    fn build<'a>(&'a self, service: &'a ServiceDef, env: &'a [String]) -> LaunchFuture<'a, ()>;

    /// Launch the entry point detached, as the service user. Resolves to
    /// the PID of the long-running process.
    fn start<'a>(
        &'a self,
        service: &'a ServiceDef,
        entry: &'a Path,
        env: &'a [String],
    ) -> LaunchFuture<'a, u32>;

    /// Deliver `signal` to `pid`, acting as `user`.
    fn kill<'a>(&'a self, pid: u32, user: &'a str, signal: Signal) -> LaunchFuture<'a, ()>;
}

/// Production launcher built on `sudo`.
#[derive(Debug, Clone)]
pub struct SudoLauncher {
    sudo: String,
    /// The `berthd` binary; its `spawn` subcommand detaches the service.
    runner: PathBuf,
}

impl SudoLauncher {
    pub fn new(runner: impl Into<PathBuf>) -> Self {
        Self {
            sudo: "sudo".to_string(),
            runner: runner.into(),
        }
    }

    /// Launcher whose runner is the currently executing binary.
    pub fn current_exe() -> SupervisorResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    fn as_user(&self, user: &str, env: &[String]) -> Command {
        let mut cmd = Command::new(&self.sudo);
        cmd.args(env).arg("-u").arg(user);
        cmd
    }
}

impl ProcessLauncher for SudoLauncher {
    fn build<'a>(&'a self, service: &'a ServiceDef, env: &'a [String]) -> LaunchFuture<'a, ()> {
        Box::pin(async move {
            let failed = |reason: String| SupervisorError::Build {
                service: service.name.clone(),
                reason,
            };
            let (program, args) = service
                .build
                .split_first()
                .ok_or_else(|| failed("build command is empty".to_string()))?;

            debug!(service = %service.name, command = ?service.build, "building");
            let output = self
                .as_user(&service.user, env)
                .arg(program)
                .args(args)
                .current_dir(&service.path)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| failed(e.to_string()))?;

            if !output.status.success() {
                return Err(failed(format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Ok(())
        })
    }

    fn start<'a>(
        &'a self,
        service: &'a ServiceDef,
        entry: &'a Path,
        env: &'a [String],
    ) -> LaunchFuture<'a, u32> {
        Box::pin(async move {
            let failed = |reason: String| SupervisorError::Start {
                service: service.name.clone(),
                reason,
            };
            let output = self
                .as_user(&service.user, env)
                .arg(&self.runner)
                .arg("spawn")
                .arg(&service.name)
                .arg(&service.interpreter)
                .arg(entry)
                .current_dir(&service.path)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| failed(e.to_string()))?;

            if !output.status.success() {
                return Err(failed(format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            parse_pid(&service.name, &String::from_utf8_lossy(&output.stdout))
        })
    }

    fn kill<'a>(&'a self, pid: u32, user: &'a str, signal: Signal) -> LaunchFuture<'a, ()> {
        Box::pin(async move {
            let output = self
                .as_user(user, &[])
                .arg("kill")
                .arg(format!("-{}", signal.as_str()))
                .arg(pid.to_string())
                .stdin(Stdio::null())
                .output()
                .await?;
            if !output.status.success() {
                return Err(SupervisorError::Kill {
                    pid,
                    user: user.to_string(),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(())
        })
    }
}

/// The runner prints the child PID as its only output.
pub fn parse_pid(service: &str, stdout: &str) -> SupervisorResult<u32> {
    stdout
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| SupervisorError::InvalidPid {
            service: service.to_string(),
            output: stdout.to_string(),
        })
}

/// `KEY=value` arguments for every whitelisted variable that is set.
pub fn env_args(names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| format!("{name}={value}")))
        .collect()
}
