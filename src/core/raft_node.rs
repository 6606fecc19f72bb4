//! RaftNode - High-level Raft node with consensus logic

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::raft_core::{
    AppendEntriesResult, InstallSnapshotResult, RaftCore, RaftState, ReplicationRequest,
};
use crate::transport::Transport;

/// Shared reference to RaftCore
pub type SharedCore = Arc<Mutex<RaftCore>>;

/// Where a peer stands after one replication exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerProgress {
    /// The peer holds the leader's whole log
    CaughtUp,
    /// The peer still lacks entries; send again right away
    Behind,
    /// No usable answer; retry on the next heartbeat
    Unreachable,
    /// This node is no longer leader
    NotLeader,
}

enum Outcome {
    Appended(u64, AppendEntriesResult),
    Installed(u64, InstallSnapshotResult),
}

/// High-level Raft node that handles consensus operations
///
/// The core lock is never held across a network call: requests are built
/// under the lock, sent concurrently without it, and each response is
/// folded back in under a fresh lock.
pub struct RaftNode<T: Transport> {
    core: SharedCore,
    transport: Arc<T>,
}

impl<T: Transport> Clone for RaftNode<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> RaftNode<T> {
    /// Create a new RaftNode
    pub fn new(core: RaftCore, transport: T) -> Self {
        Self::from_shared(Arc::new(Mutex::new(core)), transport)
    }

    /// Wrap a core that is already shared (e.g. with an RPC router)
    pub fn from_shared(core: SharedCore, transport: T) -> Self {
        Self {
            core,
            transport: Arc::new(transport),
        }
    }

    /// Get a shared reference to the core (for incoming RPC handling)
    pub fn shared_core(&self) -> SharedCore {
        self.core.clone()
    }

    /// Start an election
    pub async fn start_election(&self) {
        let mut core = self.core.lock().await;
        if let Err(e) = core.start_election() {
            error!(node = %core.id, error = %e, "failed to persist election state");
        }
    }

    /// Request votes from all peers (sends requests concurrently)
    /// Returns true if this node is leader when the round ends
    pub async fn request_votes(&self) -> bool {
        let (args, peers) = {
            let core = self.core.lock().await;
            match core.state {
                RaftState::Leader => return true,
                RaftState::Follower => return false,
                RaftState::Candidate => {}
            }
            (core.request_vote_args(), core.peers())
        };

        // Send all vote requests concurrently, process as they arrive
        let mut futures: FuturesUnordered<_> = peers
            .into_iter()
            .map(|peer_id| {
                let args = args.clone();
                let transport = &self.transport;
                async move {
                    let result = transport.request_vote(&peer_id, args).await;
                    (peer_id, result)
                }
            })
            .collect();

        while let Some((peer_id, result)) = futures.next().await {
            match result {
                Ok(result) => {
                    let mut core = self.core.lock().await;
                    match core.handle_request_vote_result(&peer_id, &result) {
                        Ok(true) => return true, // Became leader, don't wait for remaining
                        Ok(false) => {}
                        Err(e) => {
                            error!(node = %core.id, error = %e, "failed to persist vote result");
                            return false;
                        }
                    }
                }
                Err(e) => debug!(peer = %peer_id, error = %e, "vote request failed"),
            }
        }

        false
    }

    /// Run one replication round: every peer gets the entries it is missing
    /// (an empty AppendEntries acts as heartbeat), or InstallSnapshot if it
    /// needs entries that have been compacted away.
    ///
    /// Waits for every peer so higher terms are noticed and commit advances
    /// as far as this round allows. Returns (still_leader, success_count).
    pub async fn replicate_to_peers(&self) -> (bool, usize) {
        let peers = {
            let core = self.core.lock().await;
            if core.state != RaftState::Leader {
                return (false, 0);
            }
            core.peers()
        };

        let mut futures: FuturesUnordered<_> =
            peers.iter().map(|peer| self.exchange(peer)).collect();

        let mut success_count = 0;
        while let Some((acked, _)) = futures.next().await {
            if acked {
                success_count += 1;
            }
        }

        let still_leader = self.core.lock().await.state == RaftState::Leader;
        (still_leader, success_count)
    }

    /// Send one AppendEntries or InstallSnapshot to `peer` and fold the reply in
    ///
    /// Unlike `replicate_to_peers` this never waits on other peers, so a
    /// slow follower only delays itself.
    pub async fn replicate_to_peer(&self, peer: &str) -> PeerProgress {
        let (_, progress) = self.exchange(peer).await;
        progress
    }

    /// Returns whether the peer acknowledged, and where it stands afterwards
    async fn exchange(&self, peer: &str) -> (bool, PeerProgress) {
        let request = {
            let core = self.core.lock().await;
            match core.replication_request(peer) {
                Some(request) => request,
                None if core.state != RaftState::Leader => return (false, PeerProgress::NotLeader),
                None => return (false, PeerProgress::Unreachable),
            }
        };

        // Lock released while the request is in flight
        let outcome = match request {
            ReplicationRequest::AppendEntries { args, match_index } => self
                .transport
                .append_entries(peer, args)
                .await
                .map(|r| Outcome::Appended(match_index, r)),
            ReplicationRequest::InstallSnapshot(args) => {
                let last_included_index = args.last_included_index;
                self.transport
                    .install_snapshot(peer, args)
                    .await
                    .map(|r| Outcome::Installed(last_included_index, r))
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(peer = %peer, error = %e, "replication request failed");
                return (false, PeerProgress::Unreachable);
            }
        };

        let mut core = self.core.lock().await;
        let (acked, handled) = match &outcome {
            Outcome::Appended(match_index, result) => (
                result.success,
                core.handle_append_entries_result(peer, *match_index, result),
            ),
            Outcome::Installed(index, result) => (
                matches!(result, InstallSnapshotResult::Success { .. }),
                core.handle_install_snapshot_result(peer, *index, result),
            ),
        };
        if let Err(e) = handled {
            error!(node = %core.id, error = %e, "failed to persist replication result");
        }

        let progress = if core.state != RaftState::Leader {
            PeerProgress::NotLeader
        } else if core.match_index.get(peer).copied().unwrap_or(0) >= core.last_log_index() {
            PeerProgress::CaughtUp
        } else {
            PeerProgress::Behind
        };
        (acked, progress)
    }

    /// Get current state
    pub async fn state(&self) -> RaftState {
        self.core.lock().await.state
    }

    /// Get commit index
    pub async fn commit_index(&self) -> u64 {
        self.core.lock().await.commit_index
    }
}
