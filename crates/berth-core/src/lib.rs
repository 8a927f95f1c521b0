pub mod config;
pub mod types;

pub use config::{ApiConfig, BerthConfig, ProxyConfig, ServiceConfig, SupervisorConfig};
pub use types::*;
