//! RPC channel error types.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The remote handler reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
