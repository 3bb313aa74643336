use std::io;

use thiserror::Error;

/// Transport-level failure. Never fatal: the connection manager reports it and
/// schedules a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("timed out after {timeout_ms} ms connecting to {endpoint}")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },
    #[error("failed to connect to {endpoint}: {message}")]
    Connect {
        endpoint: String,
        kind: io::ErrorKind,
        message: String,
    },
    #[error("connection i/o failed: {message}")]
    Io { kind: io::ErrorKind, message: String },
    #[error("no active session")]
    NotConnected,
}

impl TransportError {
    pub(crate) fn connect(endpoint: &str, err: &io::Error) -> Self {
        Self::Connect {
            endpoint: endpoint.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Transport(TransportError),
    Shutdown,
}

/// Outcome of a correlated request that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("no active session")]
    NotConnected,
    #[error("failed to send request: {0}")]
    Transport(TransportError),
    #[error("connection lost before reply to request {client_id}")]
    ConnectionLost { client_id: u64 },
    #[error("request {client_id} ({method}) timed out after {timeout_ms} ms")]
    TimedOut {
        client_id: u64,
        method: String,
        timeout_ms: u64,
    },
    #[error("server rejected {method}: {message} (code {code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("request {client_id} was abandoned")]
    Cancelled { client_id: u64 },
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            other => Self::Transport(other),
        }
    }
}
