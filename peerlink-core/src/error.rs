//! Errors returned by foreground engine operations.

use std::time::Duration;

use crate::address::AddressParseError;
use crate::identity::{NodeId, NodeIdParseError};
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid address format: {0}")]
    InvalidAddress(#[from] AddressParseError),
    #[error("cannot connect to self")]
    SelfConnection,
    #[error("connection to {peer} timed out after {timeout:?}")]
    ConnectionTimeout { peer: NodeId, timeout: Duration },
    #[error("connection failed: {0}")]
    ConnectionRefused(#[source] TransportError),

    #[error("invalid peer ID format: {0}")]
    InvalidPeerId(#[from] NodeIdParseError),
    #[error("peer not found: {0}")]
    PeerNotFound(NodeId),
    #[error("opening stream timed out after {0:?}")]
    StreamOpenTimeout(Duration),
    #[error("failed to open stream: {0}")]
    StreamOpenError(#[source] TransportError),
    #[error("failed to send file info: {0}")]
    HeaderWriteError(#[source] std::io::Error),
    #[error("failed to send file data: {0}")]
    DataWriteError(#[source] std::io::Error),
    #[error("file send timed out after {0:?}")]
    TransferTimeout(Duration),
    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("publish failed: {reason}")]
    PublishError { reason: String },
    #[error("subscribe to {topic} failed: {source}")]
    Subscribe {
        topic: String,
        source: TransportError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
