use std::io;

use thiserror::Error;

/// Errors surfaced by the mesh networking layer.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("connecting to {address} timed out")]
    ConnectTimeout { address: String },
    #[error("invalid peer address `{0}`")]
    InvalidAddress(String),
    #[error("peer {0} is already registered")]
    DuplicatePeer(String),
    #[error("connection to {0} is closed")]
    PeerClosed(String),
    #[error("chat history could not be encoded: {0}")]
    HistoryEncode(#[source] serde_json::Error),
    #[error("chat history payload could not be decoded: {0}")]
    HistoryDecode(#[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
