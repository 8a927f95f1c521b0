//! Proxy manager error types.

use berth_rpc::RpcError;
use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid site filename: {0:?}")]
    InvalidFilename(String),

    #[error("site not found: {0}")]
    SiteNotFound(String),

    #[error("malformed site file: {0}")]
    Malformed(String),

    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}

impl From<ProxyError> for RpcError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Rpc(inner) => inner,
            other => RpcError::Remote(other.to_string()),
        }
    }
}
