//! Dialable peer addresses: `<ip>:<port>[,<ip>:<port>...]/p2p/<node-id>`.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::identity::{NodeId, NodeIdParseError};

const P2P_SEPARATOR: &str = "/p2p/";

/// Peer identifier plus the socket addresses it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub id: NodeId,
    pub addrs: Vec<SocketAddr>,
}

impl PeerAddr {
    pub fn new(id: NodeId, addrs: Vec<SocketAddr>) -> Self {
        Self { id, addrs }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    #[error("missing /p2p/<id> suffix")]
    MissingPeerId,
    #[error("no socket address before /p2p/")]
    MissingAddress,
    #[error("bad socket address {addr:?}: {source}")]
    Socket {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("bad peer id: {0}")]
    PeerId(#[from] NodeIdParseError),
}

impl FromStr for PeerAddr {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, id_part) = s
            .trim()
            .rsplit_once(P2P_SEPARATOR)
            .ok_or(AddressParseError::MissingPeerId)?;
        let id: NodeId = id_part.parse()?;
        let mut addrs = Vec::new();
        for raw in addr_part.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let addr = raw.parse().map_err(|source| AddressParseError::Socket {
                addr: raw.to_string(),
                source,
            })?;
            addrs.push(addr);
        }
        if addrs.is_empty() {
            return Err(AddressParseError::MissingAddress);
        }
        Ok(Self { id, addrs })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.addrs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", addr)?;
        }
        write!(f, "{}{}", P2P_SEPARATOR, self.id)
    }
}

/// Render `addr/p2p/id`, the form handed out by `local_address`.
pub fn format_local(addr: SocketAddr, id: NodeId) -> String {
    format!("{}{}{}", addr, P2P_SEPARATOR, id)
}
