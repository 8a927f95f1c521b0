//! Shared types used across Berth crates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::ServiceConfig;

/// Whether the fleet runs from release builds or a developer checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Production,
    Development,
}

/// What the supervisor does when a service has no entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingEntryPolicy {
    /// Warn and stop starting services; later services are never attempted.
    #[default]
    Halt,
    /// Warn, skip that service, and continue with the rest.
    Skip,
}

/// The subset of a service's `package.json` the supervisor cares about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub main: Option<String>,
}

impl PackageManifest {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(manifest)
    }
}

/// A fully resolved service definition: configuration plus its manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDef {
    pub name: String,
    pub path: PathBuf,
    pub user: String,
    pub pkg: PackageManifest,
    pub skip_dev_build: bool,
    pub build: Vec<String>,
    pub interpreter: String,
}

impl ServiceDef {
    /// Resolve a configured service by reading `<path>/package.json`.
    pub fn load(config: &ServiceConfig) -> anyhow::Result<Self> {
        let pkg = PackageManifest::from_file(&config.path.join("package.json"))?;
        Ok(Self::with_manifest(config, pkg))
    }

    pub fn with_manifest(config: &ServiceConfig, pkg: PackageManifest) -> Self {
        Self {
            name: config.name.clone(),
            path: config.path.clone(),
            user: config.user.clone(),
            pkg,
            skip_dev_build: config.skip_dev_build,
            build: config.build.clone(),
            interpreter: config.interpreter.clone(),
        }
    }

    /// Absolute path of the entry point, if the manifest defines one.
    pub fn entry_point(&self) -> Option<PathBuf> {
        self.pkg
            .main
            .as_deref()
            .filter(|main| !main.is_empty())
            .map(|main| self.path.join(main))
    }

    /// Whether the build step runs in the given mode.
    pub fn needs_build(&self, mode: RunMode) -> bool {
        mode != RunMode::Development || !self.skip_dev_build
    }
}
