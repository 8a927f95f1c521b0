//! Site templates.
//!
//! Two templates ship with the crate: a production site with a cache zone
//! and a multi-server upstream, and a single-upstream site used for
//! development clusters. Either can be overridden from `[proxy]` in
//! `berth.toml`.

use std::path::Path;

use berth_core::ProxyConfig;
use minijinja::Environment;
use serde::Serialize;

use crate::error::ProxyResult;
use crate::naming::{cache_name, upstream_name};

const PRODUCTION_TEMPLATE: &str = include_str!("../templates/production.conf.j2");
const SINGLE_TEMPLATE: &str = include_str!("../templates/single.conf.j2");

#[derive(Serialize)]
struct ProductionContext<'a> {
    ports: &'a [u16],
    domain_name: &'a str,
    upstream: String,
    cache_name: String,
}

#[derive(Serialize)]
struct SingleContext<'a> {
    port: u16,
    domain_name: &'a str,
}

#[derive(Debug, Clone)]
pub struct SiteTemplates {
    production: String,
    single: String,
}

impl Default for SiteTemplates {
    fn default() -> Self {
        Self {
            production: PRODUCTION_TEMPLATE.to_string(),
            single: SINGLE_TEMPLATE.to_string(),
        }
    }
}

impl SiteTemplates {
    pub fn new(production: impl Into<String>, single: impl Into<String>) -> Self {
        Self {
            production: production.into(),
            single: single.into(),
        }
    }

    /// Built-in templates, with any file overrides from the config applied.
    pub fn load(config: &ProxyConfig) -> ProxyResult<Self> {
        let mut templates = Self::default();
        if let Some(path) = &config.production_template {
            templates.production = read_template(path)?;
        }
        if let Some(path) = &config.single_template {
            templates.single = read_template(path)?;
        }
        Ok(templates)
    }

    pub fn render_production(
        &self,
        project_name: &str,
        domain: &str,
        ports: &[u16],
    ) -> ProxyResult<String> {
        let ctx = ProductionContext {
            ports,
            domain_name: domain,
            upstream: upstream_name(project_name),
            cache_name: cache_name(project_name),
        };
        render(&self.production, ctx)
    }

    pub fn render_single(&self, domain: &str, port: u16) -> ProxyResult<String> {
        render(
            &self.single,
            SingleContext {
                port,
                domain_name: domain,
            },
        )
    }
}

fn read_template(path: &Path) -> ProxyResult<String> {
    Ok(std::fs::read_to_string(path)?)
}

fn render<S: Serialize>(source: &str, ctx: S) -> ProxyResult<String> {
    let mut env = Environment::new();
    env.add_template("site", source)?;
    let tmpl = env.get_template("site")?;
    Ok(tmpl.render(ctx)?)
}
