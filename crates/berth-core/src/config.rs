//! berth.toml configuration parser.
//!
//! Every section is optional; missing sections and keys fall back to the
//! defaults below so a single file can drive any of the daemon's modes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{MissingEntryPolicy, RunMode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    pub supervisor: SupervisorConfig,
    pub proxy: ProxyConfig,
    pub api: ApiConfig,
}

/// `[supervisor]`: the process fleet hosted by `berthd supervisor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Directory holding the `berth.pid` marker.
    pub run_dir: PathBuf,
    /// Address of the supervisor's own RPC endpoint.
    pub listen: String,
    /// If set, the supervisor refuses to run as any other user.
    pub core_user: Option<String>,
    pub mode: RunMode,
    pub on_missing_entry: MissingEntryPolicy,
    /// Names of environment variables forwarded to every service.
    pub propagate_env: Vec<String>,
    pub services: Vec<ServiceConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("/var/run/berth"),
            listen: "127.0.0.1:6587".to_string(),
            core_user: None,
            mode: RunMode::Production,
            on_missing_entry: MissingEntryPolicy::Halt,
            propagate_env: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    /// Path of the marker file written once the whole fleet is up.
    pub fn pid_path(&self) -> PathBuf {
        self.run_dir.join("berth.pid")
    }
}

/// `[[supervisor.services]]`: one locally supervised service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub path: PathBuf,
    pub user: String,
    #[serde(default)]
    pub skip_dev_build: bool,
    #[serde(default = "default_build_command")]
    pub build: Vec<String>,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
}

fn default_build_command() -> Vec<String> {
    vec!["npm".to_string(), "run".to_string(), "build".to_string()]
}

fn default_interpreter() -> String {
    "node".to_string()
}

/// `[proxy]`: the nginx executor run by `berthd proxy-agent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen: String,
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    pub access_log: PathBuf,
    pub nginx_bin: String,
    pub restart_command: Vec<String>,
    /// Override for the built-in production site template.
    pub production_template: Option<PathBuf>,
    /// Override for the built-in single-upstream (development) template.
    pub single_template: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3211".to_string(),
            sites_available: PathBuf::from("/etc/nginx/sites-available"),
            sites_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            access_log: PathBuf::from("/var/log/nginx/access.log"),
            nginx_bin: "nginx".to_string(),
            restart_command: vec![
                "systemctl".to_string(),
                "restart".to_string(),
                "nginx".to_string(),
            ],
            production_template: None,
            single_template: None,
        }
    }
}

/// `[api]`: the REST surface and deployment orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
    pub data_dir: PathBuf,
    pub proxy_rpc: String,
    pub docker_rpc: String,
    pub dns_rpc: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            data_dir: PathBuf::from("/var/lib/berth"),
            proxy_rpc: "127.0.0.1:3211".to_string(),
            docker_rpc: "127.0.0.1:3212".to_string(),
            dns_rpc: "127.0.0.1:3213".to_string(),
        }
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BerthConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
