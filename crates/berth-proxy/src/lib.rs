//! Berth reverse proxy manager: nginx site files driven over RPC.
//!
//! The API side renders and rewrites site files; a small executor running
//! next to nginx (`berthd proxy-agent`) owns the filesystem and the nginx
//! binary. The two talk over the Berth RPC channel.
//!
//! # Components
//!
//! - **`naming`**: the filename, cache and upstream naming contract
//! - **`site`**: parsed site files and the live upstream rewrite
//! - **`template`**: production and single-upstream site templates
//! - **`executor`**: filesystem and nginx operations, served over RPC
//! - **`access_log`**: combined-log parsing and file tailing
//! - **`client`**: typed RPC client with the config-generation operations

pub mod access_log;
pub mod client;
pub mod error;
pub mod executor;
pub mod naming;
pub mod protocol;
pub mod site;
pub mod template;

pub use access_log::NginxAccessLog;
pub use client::{AccessLogStream, DevConfig, NginxClient, ProdConfig};
pub use error::{ProxyError, ProxyResult};
pub use executor::SiteExecutor;
pub use protocol::{ConfigTest, SiteFile};
pub use site::SiteConfig;
pub use template::SiteTemplates;
