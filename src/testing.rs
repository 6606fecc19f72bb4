//! Testing utilities for cluster integration tests
//!
//! `TestCluster` runs N in-process nodes on loopback: Raft RPC over the HTTP
//! transport and a RESP server per node, each on an ephemeral port.
//! `RespClient` is a minimal client for talking to those servers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;

use crate::api::{CommandHandler, Frame, ProtocolError, RespCodec, RespServer};
use crate::cluster::{bootstrap_cluster, ClusterError, Peer};
use crate::core::config::{NodeConfig, RaftConfig};
use crate::core::error::RaftError;
use crate::core::membership::NodeId;
use crate::core::raft_core::RaftCore;
use crate::core::raft_node::SharedCore;
use crate::core::raft_server::{RaftHandle, RaftServer};
use crate::kv::MemoryStore;
use crate::state_machine::KvStateMachine;
use crate::storage::{MemoryStableStore, MemoryStorage};
use crate::transport::http::{create_router, HttpTransport};

/// A single test node in the cluster
pub struct TestNode {
    pub id: NodeId,
    pub raft_addr: SocketAddr,
    pub client_addr: SocketAddr,
    pub raft_handle: RaftHandle,
    /// The node's replicated keyspace
    pub store: Arc<MemoryStore>,
    pub shared_core: SharedCore,
    http_shutdown_tx: Option<oneshot::Sender<()>>,
    resp_shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestNode {
    pub fn is_running(&self) -> bool {
        self.http_shutdown_tx.is_some()
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.http_shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.resp_shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.raft_handle.shutdown().await;
    }
}

/// A test cluster of bootstrapped nodes
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

/// Timing used unless a test supplies its own
pub fn fast_config() -> RaftConfig {
    RaftConfig::default()
        .with_heartbeat_interval(Duration::from_millis(50))
        .with_election_timeout(Duration::from_millis(150), Duration::from_millis(300))
}

impl TestCluster {
    /// Create and start a new 3-node cluster
    pub async fn new() -> Self {
        Self::with_nodes(3).await
    }

    pub async fn with_nodes(count: usize) -> Self {
        Self::with_nodes_and_config(count, fast_config()).await
    }

    pub async fn with_nodes_and_config(count: usize, config: RaftConfig) -> Self {
        let ids: Vec<NodeId> = (1..=count).map(|i| format!("node{}", i)).collect();

        // Bind everything first so every node knows every address
        let mut bound = Vec::new();
        for id in &ids {
            let raft_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let raft_addr = raft_listener.local_addr().unwrap();
            let client_addr = client_listener.local_addr().unwrap();
            bound.push((id.clone(), raft_listener, client_listener, raft_addr, client_addr));
        }
        let all_peers: Vec<Peer> = bound
            .iter()
            .map(|(id, _, _, raft_addr, client_addr)| Peer {
                id: id.clone(),
                raft_addr: raft_addr.to_string(),
                client_addr: client_addr.to_string(),
            })
            .collect();

        let mut nodes = Vec::new();
        let mut node_configs = Vec::new();
        let mut stables = Vec::new();

        for (id, raft_listener, client_listener, raft_addr, client_addr) in bound {
            let peers: Vec<Peer> = all_peers.iter().filter(|p| p.id != id).cloned().collect();
            let node_config = NodeConfig::new(id.clone(), raft_addr.to_string(), client_addr.to_string())
                .with_peers(peers);

            let peer_addrs: HashMap<NodeId, String> = node_config
                .peers
                .iter()
                .map(|p| (p.id.clone(), p.raft_addr.clone()))
                .collect();
            let transport = HttpTransport::new(peer_addrs, Duration::from_secs(2)).unwrap();

            let store = Arc::new(MemoryStore::new());
            let stable = Arc::new(MemoryStableStore::new());
            let core = RaftCore::new(
                id.clone(),
                Box::new(MemoryStorage::new()),
                Box::new(KvStateMachine::new(store.clone())),
            )
            .unwrap();

            let (server, shared_core) = RaftServer::with_config(core, transport, config.clone());
            let raft_handle = server.start();

            let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
            let router = create_router(shared_core.clone());
            tokio::spawn(async move {
                axum::serve(raft_listener, router)
                    .with_graceful_shutdown(async {
                        let _ = http_shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });

            let handler = CommandHandler::new(
                id.clone(),
                store.clone(),
                raft_handle.clone(),
                stable.clone(),
                node_config.apply_timeout,
            );
            let (resp_shutdown_tx, resp_shutdown_rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                RespServer::new(handler)
                    .serve_with_shutdown(client_listener, async {
                        let _ = resp_shutdown_rx.await;
                    })
                    .await
                    .unwrap();
            });

            nodes.push(TestNode {
                id,
                raft_addr,
                client_addr,
                raft_handle,
                store,
                shared_core,
                http_shutdown_tx: Some(http_shutdown_tx),
                resp_shutdown_tx: Some(resp_shutdown_tx),
            });
            node_configs.push(node_config);
            stables.push(stable);
        }

        for ((node, node_config), stable) in nodes.iter().zip(&node_configs).zip(&stables) {
            match bootstrap_cluster(node_config, stable.as_ref(), &node.raft_handle).await {
                // A fast leader may already have replicated the configuration here
                Ok(()) | Err(ClusterError::Raft(RaftError::AlreadyBootstrapped)) => {}
                Err(e) => panic!("bootstrap of {} failed: {}", node.id, e),
            }
        }

        TestCluster { nodes }
    }

    /// Shutdown all nodes
    pub async fn shutdown(mut self) {
        for node in &mut self.nodes {
            node.stop().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Stop one node's servers and Raft loop
    pub async fn shutdown_node(&mut self, index: usize) {
        self.nodes[index].stop().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Index of a running node that considers itself leader
    pub fn leader_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.is_running() && n.raft_handle.is_leader())
    }

    /// Wait for a leader to be elected, with timeout
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(index) = self.leader_index() {
                return Some(index);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    /// Index of a running node that knows the leader but is not it
    pub fn follower_index(&self) -> Option<usize> {
        self.nodes.iter().position(|n| {
            n.is_running() && !n.raft_handle.is_leader() && n.raft_handle.current_leader().is_some()
        })
    }

    pub async fn wait_for_follower(&self, timeout: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Some(index) = self.follower_index() {
                return Some(index);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    /// Wait until every running node has applied at least `index`
    pub async fn wait_for_applied(&self, index: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            let mut all = true;
            for node in self.nodes.iter().filter(|n| n.is_running()) {
                if node.shared_core.lock().await.last_applied < index {
                    all = false;
                    break;
                }
            }
            if all {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Connect a RESP client to one node's client address
    pub async fn client(&self, index: usize) -> RespClient {
        RespClient::connect(self.nodes[index].client_addr).await.unwrap()
    }
}

/// Minimal RESP client: one request, one reply
pub struct RespClient {
    framed: Framed<TcpStream, RespCodec>,
}

impl RespClient {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, RespCodec::new()),
        })
    }

    /// Send `args` as an array of bulk strings and wait for the reply
    pub async fn command(&mut self, args: &[&str]) -> Result<Frame, ProtocolError> {
        let request = Frame::Array(
            args.iter()
                .map(|a| Frame::Bulk(bytes::Bytes::copy_from_slice(a.as_bytes())))
                .collect(),
        );
        self.framed.send(request).await?;
        match self.framed.next().await {
            Some(reply) => reply,
            None => Err(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into())),
        }
    }
}
