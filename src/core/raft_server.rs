//! RaftServer - event loop driving elections, heartbeats and replication
//!
//! The loop owns the timers. Client-facing work goes through a cloneable
//! `RaftHandle`; proposals are appended under the core lock and resolved
//! later, when `RaftCore` applies the entry.

use std::collections::HashSet;
use std::pin::pin;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::config::RaftConfig;
use super::error::RaftError;
use super::membership::{ClusterConfiguration, NodeId};
use super::raft_core::{LeadershipState, Proposal, RaftCore, RaftState};
use super::raft_node::{PeerProgress, RaftNode, SharedCore};
use crate::state_machine::ApplyOutput;
use crate::transport::Transport;

/// Command sent to the RaftServer from clients
enum Command {
    /// Append a payload to the leader's log
    Propose {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Proposal, RaftError>>,
    },
    /// Write the initial voter set
    Bootstrap {
        configuration: ClusterConfiguration,
        reply: oneshot::Sender<Result<(), RaftError>>,
    },
}

/// Handle for interacting with a running RaftServer
#[derive(Clone)]
pub struct RaftHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
    leadership: watch::Receiver<LeadershipState>,
}

impl RaftHandle {
    async fn send<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<R, RaftError>>) -> Command,
    ) -> Result<R, RaftError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| RaftError::Shutdown)?;
        reply_rx.await.map_err(|_| RaftError::Shutdown)?
    }

    /// Append `payload` to the log; fails with `NotLeader` on any other node
    ///
    /// Success means the entry is durable on this node only.
    pub async fn propose(&self, payload: Vec<u8>) -> Result<Proposal, RaftError> {
        self.send(|reply| Command::Propose { payload, reply }).await
    }

    /// Wait until the proposed entry is applied locally
    ///
    /// A `Timeout` does not retract the entry; it may still commit later.
    pub async fn wait_committed(&self, proposal: Proposal, timeout: Duration) -> Result<ApplyOutput, RaftError> {
        match tokio::time::timeout(timeout, proposal.outcome).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RaftError::Shutdown),
            Err(_) => {
                debug!(index = proposal.index, term = proposal.term, "proposal timed out");
                Err(RaftError::Timeout)
            }
        }
    }

    /// Propose and wait for the entry to be applied
    pub async fn apply(&self, payload: Vec<u8>, timeout: Duration) -> Result<ApplyOutput, RaftError> {
        let proposal = self.propose(payload).await?;
        self.wait_committed(proposal, timeout).await
    }

    /// Best local knowledge of the leader (may be stale)
    pub fn current_leader(&self) -> Option<NodeId> {
        self.leadership.borrow().leader.clone()
    }

    pub fn leadership(&self) -> LeadershipState {
        self.leadership.borrow().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.borrow().role == RaftState::Leader
    }

    /// Write the initial voter set; fails with `AlreadyBootstrapped` on a
    /// node that has any persisted state
    pub async fn bootstrap(&self, configuration: ClusterConfiguration) -> Result<(), RaftError> {
        self.send(|reply| Command::Bootstrap { configuration, reply }).await
    }

    /// Shutdown the RaftServer gracefully
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Raft server that handles client commands and coordinates with RaftNode
pub struct RaftServer<T: Transport> {
    node: RaftNode<T>,
    command_rx: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    shutdown_rx: mpsc::Receiver<()>,
    shutdown_tx: mpsc::Sender<()>,
    leadership: watch::Receiver<LeadershipState>,
    config: RaftConfig,
}

impl<T: Transport + 'static> RaftServer<T> {
    /// Create a new RaftServer with default config
    /// Returns the server and shared core for RPC handling
    pub fn new(core: RaftCore, transport: T) -> (Self, SharedCore) {
        Self::with_config(core, transport, RaftConfig::default())
    }

    /// Create a new RaftServer with custom config
    /// Returns the server and shared core for RPC handling
    pub fn with_config(mut core: RaftCore, transport: T, config: RaftConfig) -> (Self, SharedCore) {
        core.set_snapshot_threshold(config.snapshot_threshold);
        let leadership = core.subscribe_leadership();
        let (command_tx, command_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let node = RaftNode::new(core, transport);
        let shared_core = node.shared_core();
        let server = Self {
            node,
            command_rx,
            command_tx,
            shutdown_rx,
            shutdown_tx,
            leadership,
            config,
        };
        (server, shared_core)
    }

    /// Start the server and return a handle for interaction
    pub fn start(self) -> RaftHandle {
        let handle = self.handle();
        tokio::spawn(self.run());
        handle
    }

    /// Handle to a server that has not been started yet
    pub fn handle(&self) -> RaftHandle {
        RaftHandle {
            command_tx: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            leadership: self.leadership.clone(),
        }
    }

    /// Main server loop
    async fn run(mut self) {
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        // Use Delay behavior to prevent accumulated missed ticks from starving election timeout
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut election_timeout = self.config.random_election_timeout();

        // Each peer has at most one exchange in flight; `wanted` marks peers
        // that should get another as soon as theirs returns
        let mut wanted: HashSet<NodeId> = HashSet::new();
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let mut exchanges: FuturesUnordered<BoxFuture<'static, (NodeId, PeerProgress)>> =
            FuturesUnordered::new();
        let mut election: Option<JoinHandle<bool>> = None;

        loop {
            // Calculate election deadline based on last_heartbeat from core
            let election_deadline = self.get_election_deadline(election_timeout).await;
            let election_sleep = pin!(sleep_until(election_deadline));

            tokio::select! {
                // Handle shutdown signal
                _ = self.shutdown_rx.recv() => {
                    break;
                }
                // Handle client commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        Command::Propose { payload, reply } => {
                            let core = self.node.shared_core();
                            let mut core = core.lock().await;
                            let result = core.propose(payload);
                            if result.is_ok() {
                                wanted.extend(core.peers());
                            }
                            let _ = reply.send(result);
                        }
                        Command::Bootstrap { configuration, reply } => {
                            let result = self.node.shared_core().lock().await.bootstrap(configuration);
                            let _ = reply.send(result);
                        }
                    }
                }
                Some((peer, progress)) = exchanges.next(), if !exchanges.is_empty() => {
                    in_flight.remove(&peer);
                    match progress {
                        PeerProgress::Behind => {
                            wanted.insert(peer);
                        }
                        PeerProgress::NotLeader => wanted.clear(),
                        PeerProgress::CaughtUp | PeerProgress::Unreachable => {}
                    }
                }
                won = wait_election(&mut election) => {
                    election = None;
                    if won {
                        // Replicate immediately to establish leadership
                        wanted.extend(self.node.shared_core().lock().await.peers());
                    }
                }
                // Send heartbeats if leader
                _ = heartbeat_interval.tick() => {
                    let core = self.node.shared_core();
                    let mut core = core.lock().await;
                    if core.state == RaftState::Leader {
                        // Update our own heartbeat timer to prevent election timeout
                        core.last_heartbeat = Instant::now();
                        core.prune_abandoned_proposals();
                        wanted.extend(core.peers());
                    }
                }
                // Election timeout - start election if not leader
                _ = election_sleep => {
                    let (state, is_voter) = {
                        let core = self.node.shared_core();
                        let core = core.lock().await;
                        (core.state, core.is_voter())
                    };
                    // Check if we actually timed out (last_heartbeat might have been updated)
                    if state != RaftState::Leader
                        && is_voter
                        && self.has_election_timed_out(election_timeout).await
                    {
                        if let Some(stale) = election.take() {
                            stale.abort();
                        }
                        self.node.start_election().await;
                        let node = self.node.clone();
                        election = Some(tokio::spawn(async move { node.request_votes().await }));
                        election_timeout = self.config.random_election_timeout();
                    }
                }
                else => break, // All channels closed, shutdown
            }

            let ready: Vec<NodeId> = wanted.iter().filter(|peer| !in_flight.contains(*peer)).cloned().collect();
            for peer in ready {
                wanted.remove(&peer);
                in_flight.insert(peer.clone());
                exchanges.push(self.spawn_exchange(peer));
            }
        }

        if let Some(election) = election {
            election.abort();
        }
        info!("raft server stopped");
    }

    /// Run one replication exchange with `peer` on its own task
    fn spawn_exchange(&self, peer: NodeId) -> BoxFuture<'static, (NodeId, PeerProgress)> {
        let node = self.node.clone();
        let target = peer.clone();
        let task = tokio::spawn(async move { node.replicate_to_peer(&target).await });
        async move {
            let progress = task.await.unwrap_or(PeerProgress::Unreachable);
            debug!(peer = %peer, ?progress, "replication exchange finished");
            (peer, progress)
        }
        .boxed()
    }

    /// Get election deadline based on last_heartbeat from core
    async fn get_election_deadline(&self, timeout: Duration) -> Instant {
        let core = self.node.shared_core();
        let last_heartbeat = core.lock().await.last_heartbeat;
        last_heartbeat + timeout
    }

    /// Check if election has actually timed out (last_heartbeat + timeout < now)
    async fn has_election_timed_out(&self, timeout: Duration) -> bool {
        let core = self.node.shared_core();
        let last_heartbeat = core.lock().await.last_heartbeat;
        Instant::now() >= last_heartbeat + timeout
    }

    /// Start an election (delegates to RaftNode)
    pub async fn start_election(&self) {
        self.node.start_election().await;
    }

    /// Request votes from all peers (delegates to RaftNode)
    pub async fn request_votes(&self) -> bool {
        self.node.request_votes().await
    }

    /// Get current state
    pub async fn state(&self) -> RaftState {
        self.node.state().await
    }

    /// Get commit index
    pub async fn commit_index(&self) -> u64 {
        self.node.commit_index().await
    }
}

/// Resolve with the outcome of the running election; never resolves if there is none
async fn wait_election(election: &mut Option<JoinHandle<bool>>) -> bool {
    match election {
        Some(handle) => handle.await.unwrap_or(false),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryStore, Store};
    use crate::state_machine::{Command as KvCommand, KvStateMachine, TestStateMachine};
    use crate::storage::MemoryStorage;
    use crate::transport::inmemory::{create_cluster, create_cluster_with_timeout};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn configuration(ids: &[&str]) -> ClusterConfiguration {
        ids.iter().fold(ClusterConfiguration::new(), |c, id| c.with_voter(*id, "unused"))
    }

    /// Helper to create a bootstrapped RaftCore with MemoryStorage for tests
    fn new_test_core(id: &str, voters: &[&str]) -> RaftCore {
        let mut core = RaftCore::new(id, Box::new(MemoryStorage::new()), Box::new(TestStateMachine::new())).unwrap();
        core.bootstrap(configuration(voters)).unwrap();
        core
    }

    fn new_kv_core(id: &str) -> (RaftCore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let core = RaftCore::new(
            id,
            Box::new(MemoryStorage::new()),
            Box::new(KvStateMachine::new(store.clone())),
        )
        .unwrap();
        (core, store)
    }

    fn fast_config() -> RaftConfig {
        RaftConfig::default()
            .with_heartbeat_interval(Duration::from_millis(50))
            .with_election_timeout(Duration::from_millis(150), Duration::from_millis(300))
    }

    /// Advance paused time until the handle reports leadership
    async fn wait_until_leader(handle: &RaftHandle) {
        for _ in 0..100 {
            if handle.is_leader() {
                return;
            }
            tokio::time::advance(Duration::from_millis(50)).await;
            tokio::task::yield_now().await;
        }
        panic!("node did not become leader");
    }

    #[tokio::test]
    async fn test_server_not_leader() {
        let ids = ["1", "2", "3"];
        let (mut transports, _handles) = create_cluster(&ids);

        let (server, _shared) = RaftServer::new(new_test_core("1", &ids), transports.remove("1").unwrap());
        let handle = server.start();

        // Node is not leader, should fail
        let result = handle.propose(b"x".to_vec()).await;
        assert_eq!(result.unwrap_err(), RaftError::NotLeader { leader: None });
    }

    #[tokio::test]
    async fn test_election_via_server() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) = create_cluster(&ids);

        let (server1, _shared1) = RaftServer::new(new_test_core("1", &ids), transports.remove("1").unwrap());
        let shared2 = Arc::new(Mutex::new(new_test_core("2", &ids)));
        let shared3 = Arc::new(Mutex::new(new_test_core("3", &ids)));
        let leadership = server1.handle();

        server1.start_election().await;

        let mut handle2 = handles.remove("2").unwrap();
        let mut handle3 = handles.remove("3").unwrap();
        let (became_leader, _, _) = tokio::join!(
            server1.request_votes(),
            handle2.process_one_shared(&shared2),
            handle3.process_one_shared(&shared3),
        );

        assert!(became_leader);
        assert_eq!(server1.state().await, RaftState::Leader);
        assert_eq!(leadership.current_leader(), Some("1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_election_timeout_triggers_election() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) = create_cluster(&ids);

        let (server1, shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), fast_config());
        assert_eq!(shared1.lock().await.state, RaftState::Follower);
        assert_eq!(shared1.lock().await.current_term, 1);

        for id in ["2", "3"] {
            let core = Arc::new(Mutex::new(new_test_core(id, &ids)));
            tokio::spawn(handles.remove(id).unwrap().serve(core));
        }

        let handle = server1.start();
        wait_until_leader(&handle).await;

        let leadership = handle.leadership();
        assert_eq!(leadership.leader, Some("1".to_string()));
        assert!(leadership.term >= 2, "Term should have increased from election");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_election_before_timeout() {
        let ids = ["1", "2", "3"];
        let (mut transports, _handles) = create_cluster(&ids);

        let (server1, shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), fast_config());
        let _handle = server1.start();

        // Advance time but NOT past minimum election timeout
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;

        let core = shared1.lock().await;
        assert_eq!(core.state, RaftState::Follower, "Node should remain follower before election timeout");
        assert_eq!(core.current_term, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbootstrapped_node_never_campaigns() {
        let (core, _) = new_kv_core("1");
        let (server, shared) = RaftServer::with_config(core, create_cluster(&["1"]).0.remove("1").unwrap(), fast_config());
        let _handle = server.start();

        for _ in 0..20 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(shared.lock().await.current_term, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_command_flow() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) =
            create_cluster_with_timeout(&ids, Some(Duration::from_millis(100)));

        let (server1, shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), fast_config());
        let mut followers = Vec::new();
        for id in ["2", "3"] {
            let core = Arc::new(Mutex::new(new_test_core(id, &ids)));
            tokio::spawn(handles.remove(id).unwrap().serve(core.clone()));
            followers.push(core);
        }

        let handle = server1.start();
        wait_until_leader(&handle).await;

        let output = handle.apply(b"SET x=42".to_vec(), Duration::from_secs(1)).await;
        assert_eq!(output, Ok(ApplyOutput::Stored));

        // configuration + blank + command
        let leader = shared1.lock().await;
        assert_eq!(leader.log.len(), 3);
        assert_eq!(leader.commit_index, 3);
        assert_eq!(leader.last_applied, 3);
        drop(leader);

        // Followers learn the commit index on the next heartbeat
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(50)).await;
            tokio::task::yield_now().await;
        }
        for follower in followers {
            let follower = follower.lock().await;
            assert_eq!(follower.log.len(), 3);
            assert_eq!(follower.commit_index, 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_does_not_stall_commits() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) = create_cluster_with_timeout(&ids, Some(Duration::from_secs(2)));

        let (server1, _shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), fast_config());
        let core2 = Arc::new(Mutex::new(new_test_core("2", &ids)));
        tokio::spawn(handles.remove("2").unwrap().serve(core2.clone()));
        // Node 3 queues requests but never answers
        let _silent = handles.remove("3").unwrap();

        let handle = server1.start();
        wait_until_leader(&handle).await;

        let timeout = Duration::from_secs(1);
        for i in 0..5u8 {
            let started = Instant::now();
            assert_eq!(handle.apply(vec![i], timeout).await, Ok(ApplyOutput::Stored));
            assert!(started.elapsed() < timeout);
        }
        // configuration + blank + five commands
        assert_eq!(core2.lock().await.log.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_prunes_abandoned_proposals() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) =
            create_cluster_with_timeout(&ids, Some(Duration::from_millis(50)));

        let config = fast_config().with_election_timeout(Duration::from_secs(100), Duration::from_secs(100));
        let (server1, shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), config);
        let shared2 = Arc::new(Mutex::new(new_test_core("2", &ids)));
        let mut handle2 = handles.remove("2").unwrap();

        server1.start_election().await;
        tokio::join!(server1.request_votes(), handle2.process_one_shared(&shared2));
        // Peers stop answering, so nothing commits
        drop(handle2);
        drop(handles);

        let handle = server1.start();
        for i in 0..3u8 {
            let result = handle.apply(vec![i], Duration::from_millis(100)).await;
            assert_eq!(result, Err(RaftError::Timeout));
        }

        // The next heartbeat drops the waiters nobody listens to any more
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(50)).await;
            tokio::task::yield_now().await;
        }
        let leader = shared1.lock().await;
        assert_eq!(leader.state, RaftState::Leader);
        assert_eq!(leader.pending_proposals(), 0);
        assert_eq!(leader.log.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_node_bootstrap_and_writes() {
        let (core, store) = new_kv_core("solo");
        let (mut transports, _handles) = create_cluster(&["solo"]);
        let (server, _shared) = RaftServer::with_config(core, transports.remove("solo").unwrap(), fast_config());
        let handle = server.start();

        handle.bootstrap(configuration(&["solo"])).await.unwrap();
        assert_eq!(
            handle.bootstrap(configuration(&["solo"])).await,
            Err(RaftError::AlreadyBootstrapped)
        );
        wait_until_leader(&handle).await;

        let timeout = Duration::from_secs(1);
        let stored = handle.apply(KvCommand::put("k", "v").encode(), timeout).await;
        assert_eq!(stored, Ok(ApplyOutput::Stored));
        assert_eq!(store.get(b"k").unwrap(), b"v".to_vec());

        let removed = handle.apply(KvCommand::delete("k").encode(), timeout).await;
        assert_eq!(removed, Ok(ApplyOutput::Deleted { removed: 1 }));
        let absent = handle.apply(KvCommand::delete("k").encode(), timeout).await;
        assert_eq!(absent, Ok(ApplyOutput::Deleted { removed: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_isolated_cannot_commit() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) =
            create_cluster_with_timeout(&ids, Some(Duration::from_millis(50)));

        // Long election timeout so the isolated leader keeps its role
        let config = fast_config().with_election_timeout(Duration::from_secs(100), Duration::from_secs(100));
        let (server1, shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), config);
        let shared2 = Arc::new(Mutex::new(new_test_core("2", &ids)));
        let shared3 = Arc::new(Mutex::new(new_test_core("3", &ids)));
        let mut handle2 = handles.remove("2").unwrap();
        let mut handle3 = handles.remove("3").unwrap();

        server1.start_election().await;
        tokio::join!(
            server1.request_votes(),
            handle2.process_one_shared(&shared2),
            handle3.process_one_shared(&shared3),
        );
        // Partition: peers stop answering
        drop(handle2);
        drop(handle3);

        let handle = server1.start();
        let proposal = handle.propose(b"x".to_vec()).await.unwrap();
        let index = proposal.index;
        let result = handle.wait_committed(proposal, Duration::from_millis(500)).await;

        assert_eq!(result, Err(RaftError::Timeout));
        // Not retracted, just uncommitted
        let leader = shared1.lock().await;
        assert!(leader.get_log_entry(index).is_some());
        assert!(leader.commit_index < index);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proposal_fails_when_leader_steps_down() {
        let ids = ["1", "2", "3"];
        let (mut transports, mut handles) =
            create_cluster_with_timeout(&ids, Some(Duration::from_millis(50)));

        let config = fast_config().with_election_timeout(Duration::from_secs(100), Duration::from_secs(100));
        let (server1, shared1) =
            RaftServer::with_config(new_test_core("1", &ids), transports.remove("1").unwrap(), config);
        let shared2 = Arc::new(Mutex::new(new_test_core("2", &ids)));
        let mut handle2 = handles.remove("2").unwrap();

        server1.start_election().await;
        tokio::join!(server1.request_votes(), handle2.process_one_shared(&shared2));
        drop(handle2);
        drop(handles);

        let handle = server1.start();
        let proposal = handle.propose(b"x".to_vec()).await.unwrap();

        // A new leader in a higher term contacts the old one
        {
            let mut core = shared1.lock().await;
            let args = crate::core::raft_core::AppendEntriesArgs {
                term: core.current_term + 1,
                leader_id: "3".to_string(),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: 0,
            };
            core.handle_append_entries(&args).unwrap();
        }

        let result = handle.wait_committed(proposal, Duration::from_secs(1)).await;
        assert_eq!(result, Err(RaftError::LeadershipLost));
        assert_eq!(handle.current_leader(), Some("3".to_string()));
        assert_eq!(
            handle.propose(b"y".to_vec()).await.unwrap_err(),
            RaftError::NotLeader { leader: Some("3".to_string()) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_server() {
        let (mut transports, _handles) = create_cluster(&["solo"]);
        let (server, _shared) =
            RaftServer::with_config(new_test_core("solo", &["solo"]), transports.remove("solo").unwrap(), fast_config());
        let handle = server.start();

        handle.shutdown().await;
        tokio::task::yield_now().await;

        assert_eq!(handle.propose(b"x".to_vec()).await.unwrap_err(), RaftError::Shutdown);
    }
}
