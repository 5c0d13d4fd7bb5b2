//! Transport provider abstraction.
//!
//! The engine never touches sockets. A provider supplies identity, dialing,
//! per-protocol byte streams and best-effort topic broadcast; the in-memory
//! provider ([`crate::memory`]) and the daemon's TCP provider both implement
//! [`Transport`].

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::address::PeerAddr;
use crate::identity::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("peer {0} is not connected")]
    NotConnected(NodeId),
    #[error("remote does not support protocol {0}")]
    UnsupportedProtocol(String),
    #[error("no peers to publish to on topic {0}")]
    InsufficientPeers(String),
    #[error("subscription closed")]
    SubscriptionClosed,
    #[error("transport shut down")]
    Shutdown,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Bidirectional byte stream for one protocol exchange.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamIo for T {}

pub type PeerStream = Box<dyn StreamIo>;

/// A stream opened by a remote peer for a registered protocol.
pub struct InboundStream {
    pub peer: NodeId,
    pub stream: PeerStream,
}

/// One message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct GossipEvent {
    /// Node that published the message (not the hop that relayed it).
    pub origin: NodeId,
    pub data: Vec<u8>,
}

/// Receiving side of a topic subscription.
pub struct Subscription {
    rx: mpsc::Receiver<GossipEvent>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<GossipEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. `SubscriptionClosed` is fatal: no more events will arrive.
    pub async fn next(&mut self) -> Result<GossipEvent, TransportError> {
        self.rx.recv().await.ok_or(TransportError::SubscriptionClosed)
    }
}

/// Channel capacity for subscriptions and protocol handlers.
pub const EVENT_QUEUE_LEN: usize = 256;

#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's identifier.
    fn local_id(&self) -> NodeId;

    /// Addresses this node can be dialed on, best first.
    fn listen_addrs(&self) -> Vec<SocketAddr>;

    /// Establish (or reuse) a connection to `peer`. No deadline; callers bound it.
    async fn connect(&self, peer: &PeerAddr) -> Result<(), TransportError>;

    /// Open an outbound stream to a connected peer for `protocol`.
    async fn open_stream(&self, peer: NodeId, protocol: &str)
        -> Result<PeerStream, TransportError>;

    /// Register a handler for `protocol`; inbound streams arrive on the returned receiver.
    /// Registering the same protocol again replaces the previous handler.
    async fn register_protocol(&self, protocol: &str) -> mpsc::Receiver<InboundStream>;

    /// Best-effort broadcast to every subscriber of `topic`.
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError>;

    /// Join `topic`. Events published by this node may be delivered back to it.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;
}
