use std::time::Duration;

/// Errors raised by the tool session layer.
///
/// Only transport and protocol problems live here. A tool that ran and
/// reported a failure (bad SQL, missing table) is ordinary content.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Spawn, handshake or catalog listing did not complete.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("No response to {method} within {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("Tool provider closed the connection")]
    Closed,

    #[error("Session already released")]
    Released,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Wrap any failure during connect as a connection error.
    pub fn connection(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Connection(format!("{}: {}", context, err))
    }
}
