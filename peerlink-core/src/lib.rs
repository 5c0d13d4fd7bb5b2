//! PeerLink network engine.
//! Peer directory, gossip broadcast and direct file transfer on top of a pluggable transport.

pub mod address;
pub mod broadcast;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod identity;
pub mod memory;
pub mod protocol;
pub mod transfer;
pub mod transport;
pub mod types;
pub mod wire;

pub use address::PeerAddr;
pub use broadcast::ListenerState;
pub use config::EngineConfig;
pub use engine::NetworkEngine;
pub use error::{Error, Result};
pub use identity::{Keypair, NodeId, PublicKey};
pub use protocol::{Frame, FILE_PROTOCOL, MESSAGE_TOPIC, PROTOCOL_VERSION};
pub use transport::{GossipEvent, InboundStream, PeerStream, Subscription, Transport, TransportError};
pub use types::{FileRecord, Message, PeerRecord};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
