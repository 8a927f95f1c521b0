//! Operation names and payloads shared by the executor and the client.

use serde::{Deserialize, Serialize};

pub const OP_SITES_AVAILABLE: &str = "/sites-available";
pub const OP_WRITE_SITE: &str = "/sites-available/write";
pub const OP_READ_SITE: &str = "/sites-available/read";
pub const OP_SITE_AVAILABLE_EXISTS: &str = "/sites-available/exists";
pub const OP_SITE_ENABLED_EXISTS: &str = "/sites-enabled/exists";
pub const OP_DEPLOY_SITE: &str = "/sites-available/deploy";
pub const OP_TEST: &str = "/test";
pub const OP_RELOAD: &str = "/reload";
pub const OP_RESTART: &str = "/restart";
pub const CHANNEL_ACCESS_LOG: &str = "/monitor/access-log";

/// One file under `sites-available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteFile {
    pub filename: String,
    pub content: String,
}

/// Result of `nginx -t`. A failing test is a result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTest {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}
