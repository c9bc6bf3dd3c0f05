use crate::types::Timestamp;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Stale write: stored timestamp {stored} is not older than {attempted}")]
    StaleWrite { stored: Timestamp, attempted: Timestamp },

    #[error("Quorum not reached: {reached}/{required}")]
    QuorumNotReached { reached: usize, required: usize },

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Operation cancelled")]
    OperationCancelled,

    #[error("Invalid quorum {quorum} for {total} operations")]
    InvalidQuorum { quorum: usize, total: usize },

    #[error("Pending operations already attached")]
    AlreadyAttached,

    #[error("Expected {expected} pending operations, got {actual}")]
    OperationCount { expected: usize, actual: usize },

    #[error("Invalid peer URI {uri}: {reason}")]
    InvalidPeerUri { uri: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),
}

impl Error {
    pub fn unreachable(peer: &str, reason: impl ToString) -> Self {
        Error::PeerUnreachable {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }
}
