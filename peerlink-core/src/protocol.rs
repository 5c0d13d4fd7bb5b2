//! Protocol constants and the frames exchanged by connection-oriented transports.

use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// Current protocol version. Sent in the transport handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Gossip topic carrying chat messages and file-receipt notices.
pub const MESSAGE_TOPIC: &str = "p2p-messages";

/// Stream protocol identifier for direct file transfers.
pub const FILE_PROTOCOL: &str = "/file/1.0.0";

/// Transport frames. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// Gossip publication. `id` lets every hop drop duplicates before re-flooding.
    Gossip {
        id: [u8; 16],
        topic: String,
        origin: NodeId,
        data: Vec<u8>,
    },
    /// Open a logical stream for a protocol.
    StreamOpen { stream_id: u64, protocol: String },
    /// Remote has a handler for the protocol; data may flow.
    StreamAccept { stream_id: u64 },
    /// Remote has no handler for the protocol.
    StreamReject { stream_id: u64 },
    /// Stream payload.
    StreamData { stream_id: u64, payload: Vec<u8> },
    /// Sender finished writing (half close).
    StreamClose { stream_id: u64 },
}
