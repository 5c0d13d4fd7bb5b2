//! Peer directory: peers this node explicitly connected to.
//!
//! Records are only ever inserted or overwritten. A dropped connection does
//! not remove its record.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::address::PeerAddr;
use crate::error::{Error, Result};
use crate::identity::NodeId;
use crate::transport::Transport;
use crate::types::PeerRecord;

#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<NodeId, PeerRecord>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `record.id`.
    pub async fn upsert(&self, record: PeerRecord) {
        self.peers.write().await.insert(record.id, record);
    }

    pub async fn get(&self, id: &NodeId) -> Option<PeerRecord> {
        self.peers.read().await.get(id).cloned()
    }

    /// Copy of every record; order is not significant.
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Parse `address`, dial it within `timeout` and record the peer on success.
    pub async fn connect(
        &self,
        transport: &dyn Transport,
        address: &str,
        timeout: Duration,
    ) -> Result<PeerRecord> {
        let target: PeerAddr = address.parse().map_err(|e| {
            tracing::warn!(%address, error = %e, "failed to parse peer address");
            Error::InvalidAddress(e)
        })?;
        if target.id == transport.local_id() {
            return Err(Error::SelfConnection);
        }

        match tokio::time::timeout(timeout, transport.connect(&target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(peer = %target.id, error = %e, "failed to connect to peer");
                return Err(Error::ConnectionRefused(e));
            }
            Err(_) => {
                tracing::warn!(peer = %target.id, ?timeout, "connect timed out");
                return Err(Error::ConnectionTimeout {
                    peer: target.id,
                    timeout,
                });
            }
        }

        let record = PeerRecord {
            id: target.id,
            addrs: target.addrs,
        };
        self.upsert(record.clone()).await;
        tracing::info!(peer = %record.id, "connected to peer");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::memory::MemoryNetwork;

    fn record(id: NodeId, port: u16) -> PeerRecord {
        PeerRecord {
            id,
            addrs: vec![format!("127.0.0.1:{}", port).parse().unwrap()],
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_same_id() {
        let dir = PeerDirectory::new();
        let id = Keypair::generate().node_id();
        dir.upsert(record(id, 1)).await;
        dir.upsert(record(id, 2)).await;
        assert_eq!(dir.len().await, 1);
        assert_eq!(dir.get(&id).await.unwrap().addrs[0].port(), 2);
    }

    #[tokio::test]
    async fn snapshot_is_detached() {
        let dir = PeerDirectory::new();
        dir.upsert(record(Keypair::generate().node_id(), 1)).await;
        let snap = dir.snapshot().await;
        dir.upsert(record(Keypair::generate().node_id(), 2)).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(dir.len().await, 2);
    }

    #[tokio::test]
    async fn connect_rejects_bad_address() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let dir = PeerDirectory::new();
        let err = dir
            .connect(&a, "nonsense", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
        assert!(dir.is_empty().await);
    }

    #[tokio::test]
    async fn connect_rejects_self() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let dir = PeerDirectory::new();
        let own = a.peer_addr().unwrap().to_string();
        let err = dir
            .connect(&a, &own, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelfConnection));
        assert!(dir.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_on_silent_host() {
        let net = MemoryNetwork::new();
        let a = net.add_node().await;
        let b = net.add_node().await;
        let addr = b.peer_addr().unwrap();
        net.blackhole(addr.addrs[0]).await;

        let dir = PeerDirectory::new();
        let err = dir
            .connect(&a, &addr.to_string(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout { .. }));
        assert!(dir.is_empty().await);
    }
}
