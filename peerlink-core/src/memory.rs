//! In-memory transport provider.
//!
//! A shared [`MemoryNetwork`] broker connects several [`MemoryTransport`]
//! instances inside one process. Streams are `tokio::io::duplex` pairs and
//! topic publications reach every subscriber connected to the publisher,
//! directly or through other nodes, the way a gossip mesh would.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::address::PeerAddr;
use crate::identity::{Keypair, NodeId};
use crate::transport::{
    GossipEvent, InboundStream, PeerStream, Subscription, Transport, TransportError,
    EVENT_QUEUE_LEN,
};

const DUPLEX_BUF_SIZE: usize = 64 * 1024;
const BASE_PORT: u16 = 4001;

#[derive(Default)]
struct Node {
    addr: Option<SocketAddr>,
    handlers: HashMap<String, mpsc::Sender<InboundStream>>,
    subscriptions: HashMap<String, mpsc::Sender<GossipEvent>>,
}

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<NodeId, Node>,
    by_addr: HashMap<SocketAddr, NodeId>,
    links: HashSet<(NodeId, NodeId)>,
    /// Addresses that accept dials but never answer.
    blackholed: HashSet<SocketAddr>,
    next_port: u16,
}

impl NetworkState {
    fn link(&mut self, a: NodeId, b: NodeId) {
        self.links.insert(ordered(a, b));
    }

    fn linked(&self, a: NodeId, b: NodeId) -> bool {
        self.links.contains(&ordered(a, b))
    }

    /// Every node reachable from `start` over links, `start` included.
    fn reachable(&self, start: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for &(a, b) in &self.links {
                let next = if a == current {
                    b
                } else if b == current {
                    a
                } else {
                    continue;
                };
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared broker routing dials, streams and gossip between memory transports.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node with a fresh identity and a unique loopback-style address.
    pub async fn add_node(&self) -> MemoryTransport {
        self.add_node_with(Keypair::generate(), true).await
    }

    /// Create a node that advertises no listen address.
    pub async fn add_unlistening_node(&self) -> MemoryTransport {
        self.add_node_with(Keypair::generate(), false).await
    }

    async fn add_node_with(&self, keypair: Keypair, listening: bool) -> MemoryTransport {
        let id = keypair.node_id();
        let mut state = self.state.lock().await;
        let addr = if listening {
            let port = BASE_PORT + state.next_port;
            state.next_port += 1;
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            state.by_addr.insert(addr, id);
            Some(addr)
        } else {
            None
        };
        state.nodes.insert(
            id,
            Node {
                addr,
                ..Node::default()
            },
        );
        MemoryTransport {
            id,
            addr,
            network: self.clone(),
        }
    }

    /// Make dials to `addr` hang forever, as an unresponsive host would.
    pub async fn blackhole(&self, addr: SocketAddr) {
        self.state.lock().await.blackholed.insert(addr);
    }

    /// Drop every subscription held by `node`; its listeners see `SubscriptionClosed`.
    pub async fn close_subscriptions(&self, node: NodeId) {
        if let Some(n) = self.state.lock().await.nodes.get_mut(&node) {
            n.subscriptions.clear();
        }
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    id: NodeId,
    addr: Option<SocketAddr>,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Full dialable address of this node, if it listens.
    pub fn peer_addr(&self) -> Option<PeerAddr> {
        self.addr.map(|a| PeerAddr::new(self.id, vec![a]))
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.addr.into_iter().collect()
    }

    async fn connect(&self, peer: &PeerAddr) -> Result<(), TransportError> {
        let mut hang = false;
        {
            let mut state = self.network.state.lock().await;
            if state.linked(self.id, peer.id) {
                return Ok(());
            }
            for addr in &peer.addrs {
                if state.blackholed.contains(addr) {
                    hang = true;
                    continue;
                }
                match state.by_addr.get(addr).copied() {
                    Some(found) if found == peer.id => {
                        state.link(self.id, peer.id);
                        return Ok(());
                    }
                    Some(found) => {
                        return Err(TransportError::Dial(format!(
                            "peer id mismatch at {}: expected {}, found {}",
                            addr, peer.id, found
                        )));
                    }
                    None => {}
                }
            }
        }
        if hang {
            std::future::pending::<()>().await;
        }
        Err(TransportError::Dial(format!(
            "connection refused by {}",
            peer
        )))
    }

    async fn open_stream(
        &self,
        peer: NodeId,
        protocol: &str,
    ) -> Result<PeerStream, TransportError> {
        let handler = {
            let state = self.network.state.lock().await;
            if !state.linked(self.id, peer) {
                return Err(TransportError::NotConnected(peer));
            }
            state
                .nodes
                .get(&peer)
                .and_then(|n| n.handlers.get(protocol))
                .cloned()
                .ok_or_else(|| TransportError::UnsupportedProtocol(protocol.to_string()))?
        };
        let (local, remote) = tokio::io::duplex(DUPLEX_BUF_SIZE);
        handler
            .send(InboundStream {
                peer: self.id,
                stream: Box::new(remote),
            })
            .await
            .map_err(|_| TransportError::UnsupportedProtocol(protocol.to_string()))?;
        Ok(Box::new(local))
    }

    async fn register_protocol(&self, protocol: &str) -> mpsc::Receiver<InboundStream> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let mut state = self.network.state.lock().await;
        state
            .nodes
            .entry(self.id)
            .or_default()
            .handlers
            .insert(protocol.to_string(), tx);
        rx
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let targets: Vec<mpsc::Sender<GossipEvent>> = {
            let state = self.network.state.lock().await;
            let reachable = state.reachable(self.id);
            if reachable.len() < 2 {
                return Err(TransportError::InsufficientPeers(topic.to_string()));
            }
            reachable
                .iter()
                .filter_map(|id| state.nodes.get(id))
                .filter_map(|n| n.subscriptions.get(topic))
                .cloned()
                .collect()
        };
        for tx in targets {
            let event = GossipEvent {
                origin: self.id,
                data: data.clone(),
            };
            // Best effort: a full or closed subscriber just misses the message.
            let _ = tx.try_send(event);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let mut state = self.network.state.lock().await;
        state
            .nodes
            .entry(self.id)
            .or_default()
            .subscriptions
            .insert(topic.to_string(), tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn connect_by_address() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let b = net.add_node().await;
        a.connect(&b.peer_addr().unwrap()).await.unwrap();
        // Links are symmetric.
        let _rx = a.register_protocol("/p").await;
        assert!(b.open_stream(a.local_id(), "/p").await.is_ok());
    }

    #[tokio::test]
    async fn connect_unknown_address_refused() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let ghost = PeerAddr::new(
            Keypair::generate().node_id(),
            vec!["127.0.0.1:9".parse().unwrap()],
        );
        assert!(matches!(
            a.connect(&ghost).await,
            Err(TransportError::Dial(_))
        ));
    }

    #[tokio::test]
    async fn connect_wrong_id_rejected() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let b = net.add_node().await;
        let mut addr = b.peer_addr().unwrap();
        addr.id = Keypair::generate().node_id();
        assert!(a.connect(&addr).await.is_err());
    }

    #[tokio::test]
    async fn stream_carries_bytes_and_eof() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let b = net.add_node().await;
        a.connect(&b.peer_addr().unwrap()).await.unwrap();
        let mut inbound = b.register_protocol("/echo").await;

        let mut out = a.open_stream(b.local_id(), "/echo").await.unwrap();
        out.write_all(b"ping").await.unwrap();
        out.shutdown().await.unwrap();

        let mut incoming = inbound.recv().await.unwrap();
        assert_eq!(incoming.peer, a.local_id());
        let mut buf = Vec::new();
        incoming.stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ping");
    }

    #[tokio::test]
    async fn open_stream_requires_handler_and_link() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let b = net.add_node().await;
        assert!(matches!(
            a.open_stream(b.local_id(), "/x").await,
            Err(TransportError::NotConnected(_))
        ));
        a.connect(&b.peer_addr().unwrap()).await.unwrap();
        assert!(matches!(
            a.open_stream(b.local_id(), "/x").await,
            Err(TransportError::UnsupportedProtocol(_))
        ));
    }

    #[tokio::test]
    async fn publish_reaches_multi_hop_subscribers() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let b = net.add_node().await;
        let c = net.add_node().await;
        a.connect(&b.peer_addr().unwrap()).await.unwrap();
        b.connect(&c.peer_addr().unwrap()).await.unwrap();
        let mut sub_c = c.subscribe("t").await.unwrap();

        a.publish("t", b"hello".to_vec()).await.unwrap();
        let event = sub_c.next().await.unwrap();
        assert_eq!(event.origin, a.local_id());
        assert_eq!(event.data, b"hello");
    }

    #[tokio::test]
    async fn publish_without_peers_fails() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let _sub = a.subscribe("t").await.unwrap();
        assert!(matches!(
            a.publish("t", vec![1]).await,
            Err(TransportError::InsufficientPeers(_))
        ));
    }

    #[tokio::test]
    async fn closed_subscription_is_reported() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let mut sub = a.subscribe("t").await.unwrap();
        net.close_subscriptions(a.local_id()).await;
        assert!(matches!(
            sub.next().await,
            Err(TransportError::SubscriptionClosed)
        ));
    }

    #[tokio::test]
    async fn unlistening_node_has_no_address() {
        let net = MemoryNetwork::new();
        let a = net.add_unlistening_node().await;
        assert!(a.listen_addrs().is_empty());
        assert!(a.peer_addr().is_none());
    }
}
