//! Cluster bootstrap
//!
//! Turns a `NodeConfig` into the replicated voter set and the local
//! node ID -> client address mapping used for write redirects.

pub mod addresses;
pub mod peers;

pub use addresses::{client_addr, set_client_addr, CLIENT_ADDR_PREFIX};
pub use peers::{parse_peers, Peer, PeerSpecError};

use thiserror::Error;
use tracing::info;

use crate::core::config::NodeConfig;
use crate::core::error::RaftError;
use crate::core::membership::NodeId;
use crate::core::raft_server::RaftHandle;
use crate::storage::{StableStore, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("no known leader")]
    NoLeader,
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),
    #[error("stored client address for '{0}' is not valid UTF-8")]
    InvalidAddress(NodeId),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Raft(#[from] RaftError),
}

/// Write the client address of every voter (self included)
pub fn record_client_addresses(config: &NodeConfig, stable: &dyn StableStore) -> Result<(), ClusterError> {
    for (id, addr) in config.client_addresses() {
        set_client_addr(stable, &id, &addr)?;
    }
    Ok(())
}

/// Record every voter's client address, then bootstrap Raft with the full voter set
///
/// Fails with `RaftError::AlreadyBootstrapped` when the node already has
/// persisted Raft state; the address mapping is refreshed either way.
pub async fn bootstrap_cluster(
    config: &NodeConfig,
    stable: &dyn StableStore,
    raft: &RaftHandle,
) -> Result<(), ClusterError> {
    record_client_addresses(config, stable)?;
    let configuration = config.cluster_configuration();
    let voters = configuration.len();
    raft.bootstrap(configuration).await?;
    info!(node = %config.id, voters, "cluster bootstrapped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::raft_core::RaftCore;
    use crate::core::raft_server::RaftServer;
    use crate::state_machine::TestStateMachine;
    use crate::storage::{MemoryStableStore, MemoryStorage};
    use crate::transport::inmemory::create_cluster;

    #[tokio::test]
    async fn test_bootstrap_records_addresses_and_rejects_second_call() {
        let config = NodeConfig::new("a", "127.0.0.1:7001", "127.0.0.1:6001")
            .with_peers(parse_peers("b=127.0.0.1:7002|127.0.0.1:6002").unwrap());
        let stable = MemoryStableStore::new();

        let core = RaftCore::new("a", Box::new(MemoryStorage::new()), Box::new(TestStateMachine::new())).unwrap();
        let (mut transports, _handles) = create_cluster(&["a", "b"]);
        let (server, shared) = RaftServer::new(core, transports.remove("a").unwrap());
        let handle = server.start();

        bootstrap_cluster(&config, &stable, &handle).await.unwrap();
        assert_eq!(client_addr(&stable, "a").unwrap(), "127.0.0.1:6001");
        assert_eq!(client_addr(&stable, "b").unwrap(), "127.0.0.1:6002");
        assert_eq!(shared.lock().await.configuration, config.cluster_configuration());

        let again = bootstrap_cluster(&config, &stable, &handle).await;
        assert_eq!(again, Err(ClusterError::Raft(RaftError::AlreadyBootstrapped)));
    }
}
