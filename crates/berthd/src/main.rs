//! berthd: the Berth daemon.
//!
//! Single binary with one subcommand per role:
//! - `supervisor`: build and launch the configured services, tear them
//!   down on SIGINT/SIGTERM
//! - `proxy-agent`: manage nginx sites on behalf of the orchestrator
//! - `api`: REST API and deployment orchestrator
//! - `spawn`: detach one service process (invoked by the supervisor)
//!
//! # Usage
//!
//! ```text
//! berthd --config /etc/berth/berth.toml supervisor
//! ```

mod api_mode;
mod proxy_agent;
mod signals;
mod supervisor_mode;

use std::path::{Path, PathBuf};

use berth_core::BerthConfig;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth daemon")]
struct Cli {
    /// Path to berth.toml. Missing sections fall back to defaults.
    #[arg(long, global = true, default_value = "/etc/berth/berth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the configured services and supervise them until signalled.
    Supervisor,

    /// Serve nginx site management over RPC.
    ProxyAgent,

    /// Run the REST API and deployment orchestrator.
    Api,

    /// Launch a service detached and print its PID.
    #[command(hide = true)]
    Spawn {
        name: String,
        interpreter: String,
        entry: PathBuf,

        /// Append the service's output to this file.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the PID, so nothing else may be written there.
    if let Command::Spawn {
        name,
        interpreter,
        entry,
        log,
    } = &cli.command
    {
        let pid = berth_supervisor::runner::spawn_detached(name, interpreter, entry, log.as_deref())?;
        println!("{pid}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,berthd=debug,berth=debug".into()),
        )
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Supervisor => supervisor_mode::run_supervisor(config).await,
        Command::ProxyAgent => proxy_agent::run_proxy_agent(config).await,
        Command::Api => api_mode::run_api(config).await,
        Command::Spawn { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> anyhow::Result<BerthConfig> {
    if path.exists() {
        let config = BerthConfig::from_file(path)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    } else {
        info!(path = %path.display(), "no configuration file, using defaults");
        Ok(BerthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spawn_arguments() {
        let cli = Cli::try_parse_from([
            "berthd", "spawn", "api", "node", "/srv/api/index.js", "--log", "/tmp/api.log",
        ])
        .unwrap();
        match cli.command {
            Command::Spawn {
                name,
                interpreter,
                entry,
                log,
            } => {
                assert_eq!(name, "api");
                assert_eq!(interpreter, "node");
                assert_eq!(entry, PathBuf::from("/srv/api/index.js"));
                assert_eq!(log, Some(PathBuf::from("/tmp/api.log")));
            }
            _ => panic!("expected spawn"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["berthd", "proxy-agent", "--config", "/tmp/b.toml"]).unwrap();
        assert!(matches!(cli.command, Command::ProxyAgent));
        assert_eq!(cli.config, PathBuf::from("/tmp/b.toml"));
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.supervisor.listen, "127.0.0.1:6587");
    }

    #[test]
    fn config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.toml");
        std::fs::write(&path, "[api]\nlisten = \"127.0.0.1:9000\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.api.listen, "127.0.0.1:9000");
        assert_eq!(config.proxy.nginx_bin, "nginx");
    }
}
