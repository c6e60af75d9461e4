//! Host link error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

/// Errors raised while talking to a scripting host.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to spawn host: {0}")]
    Spawn(std::io::Error),

    #[error("host i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("host not initialized")]
    NotInitialized,

    #[error("host connection closed")]
    Closed,

    #[error("timeout waiting for host response")]
    Timeout,

    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcError),

    #[error("frame too large (max {max} bytes)")]
    FrameTooLarge { max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
