//! The detaching runner behind `berthd spawn`.
//!
//! Started through `sudo` as the service user, it launches the service in
//! its own process group so the service outlives the runner, and reports
//! the service PID to the supervisor on stdout.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::SupervisorResult;

/// Launch `interpreter entry` detached. Output goes to `log` when given,
/// otherwise it is discarded.
pub fn spawn_detached(
    name: &str,
    interpreter: &str,
    entry: &Path,
    log: Option<&Path>,
) -> SupervisorResult<u32> {
    let (stdout, stderr) = match log {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (Stdio::from(file.try_clone()?), Stdio::from(file))
        }
        None => (Stdio::null(), Stdio::null()),
    };

    let child = Command::new(interpreter)
        .arg(entry)
        .env("BERTH_SERVICE", name)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()?;
    Ok(child.id())
}
