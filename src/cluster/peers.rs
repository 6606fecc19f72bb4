//! Peer specification parsing
//!
//! Format: `id=raftAddr|clientAddr`, comma separated for a list.

use std::collections::HashSet;
use std::str::FromStr;

use thiserror::Error;

use crate::core::membership::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerSpecError {
    #[error("peer entry '{0}' is not of the form id=raftAddr|clientAddr")]
    Malformed(String),
    #[error("peer entry '{0}' has an empty field")]
    EmptyField(String),
    #[error("peer '{0}' listed more than once")]
    Duplicate(NodeId),
}

/// Another voter: its ID and both of its addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub raft_addr: String,
    pub client_addr: String,
}

impl FromStr for Peer {
    type Err = PeerSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entry = s.trim();
        let (id, addrs) = entry
            .split_once('=')
            .ok_or_else(|| PeerSpecError::Malformed(entry.to_string()))?;
        let (raft_addr, client_addr) = addrs
            .split_once('|')
            .ok_or_else(|| PeerSpecError::Malformed(entry.to_string()))?;

        let (id, raft_addr, client_addr) = (id.trim(), raft_addr.trim(), client_addr.trim());
        if id.is_empty() || raft_addr.is_empty() || client_addr.is_empty() {
            return Err(PeerSpecError::EmptyField(entry.to_string()));
        }
        if client_addr.contains('|') {
            return Err(PeerSpecError::Malformed(entry.to_string()));
        }

        Ok(Peer {
            id: id.to_string(),
            raft_addr: raft_addr.to_string(),
            client_addr: client_addr.to_string(),
        })
    }
}

/// Parse a comma-separated peer list; an empty string means no peers
pub fn parse_peers(spec: &str) -> Result<Vec<Peer>, PeerSpecError> {
    if spec.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::new();
    spec.split(',')
        .map(|entry| {
            let peer: Peer = entry.parse()?;
            if !seen.insert(peer.id.clone()) {
                return Err(PeerSpecError::Duplicate(peer.id));
            }
            Ok(peer)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_peer() {
        let peer: Peer = "n2=127.0.0.1:7002|127.0.0.1:6002".parse().unwrap();
        assert_eq!(peer.id, "n2");
        assert_eq!(peer.raft_addr, "127.0.0.1:7002");
        assert_eq!(peer.client_addr, "127.0.0.1:6002");
    }

    #[test]
    fn test_parse_peer_list() {
        let peers = parse_peers("b=h:1|h:2, c=h:3|h:4").unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1].id, "c");
        assert_eq!(peers[1].client_addr, "h:4");
        assert!(parse_peers("").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_malformed_entries() {
        assert!(matches!("b".parse::<Peer>(), Err(PeerSpecError::Malformed(_))));
        assert!(matches!("b=h:1".parse::<Peer>(), Err(PeerSpecError::Malformed(_))));
        assert!(matches!("b=h:1|h:2|h:3".parse::<Peer>(), Err(PeerSpecError::Malformed(_))));
        assert!(matches!("=h:1|h:2".parse::<Peer>(), Err(PeerSpecError::EmptyField(_))));
        assert!(matches!("b=|h:2".parse::<Peer>(), Err(PeerSpecError::EmptyField(_))));
        assert!(matches!(parse_peers("b=h:1|h:2,"), Err(PeerSpecError::Malformed(_))));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = parse_peers("b=h:1|h:2,b=h:3|h:4");
        assert_eq!(result, Err(PeerSpecError::Duplicate("b".to_string())));
    }
}
