use crate::protocol::RpcError;
use std::time::Duration;

pub type Result<T, E = BspError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum BspError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("BSP protocol error: {0}")]
    Protocol(String),

    #[error("`{method}` failed: {error}")]
    Rpc { method: String, error: RpcError },

    #[error("BSP message too large: {len} bytes (limit {limit})")]
    MessageTooLarge { len: usize, limit: usize },

    /// The peer stayed silent for a whole idle window.
    #[error("`{operation}` timed out after {idle:?} without output")]
    IdleTimeout { operation: String, idle: Duration },

    /// The peer closed its output stream or exited.
    #[error("build server closed the connection")]
    ConnectionClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("malformed target info on line {line}: {source}")]
    MalformedTarget {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl BspError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BspError::IdleTimeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BspError::Cancelled)
    }

    /// `true` for JSON-RPC "method not found" replies.
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, BspError::Rpc { error, .. } if error.code == RpcError::METHOD_NOT_FOUND)
    }
}
