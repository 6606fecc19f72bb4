//! Raft Consensus Algorithm Implementation
//!
//! This module implements the Raft consensus protocol as described in:
//! "In Search of an Understandable Consensus Algorithm" by Diego Ongaro and John Ousterhout
//!
//! `RaftCore` is synchronous and transport-agnostic: RPC handlers take
//! arguments and return results, and the async layers (`RaftNode`,
//! `RaftServer`) decide when and where to send them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::error::RaftError;
use super::membership::{ClusterConfiguration, NodeId};
use super::snapshot::{Snapshot, SnapshotError, SnapshotMetadata};
use crate::state_machine::{ApplyOutput, ApplyResult, Snapshotable};
use crate::storage::{Storage, StorageError};

/// Raft node states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftState {
    /// Follower: Passive state, receives updates from leader
    Follower,
    /// Candidate: Actively seeking votes to become leader
    Candidate,
    /// Leader: Handles all client requests and replicates log
    Leader,
}

/// Snapshot of this node's view of leadership, published on every change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadershipState {
    pub role: RaftState,
    pub term: u64,
    pub leader: Option<NodeId>,
}

/// What a log entry carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Appended by every new leader so entries from earlier terms can commit
    Blank,
    /// The voter set, written once at bootstrap
    Configuration(ClusterConfiguration),
    /// Encoded application command, opaque to consensus
    Command(#[serde(with = "crate::encoding::base64_bytes")] Vec<u8>),
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term when entry was received by leader
    pub term: u64,
    /// Index in the log (1-indexed)
    pub index: u64,
    pub payload: EntryPayload,
}

impl LogEntry {
    pub fn blank(term: u64, index: u64) -> Self {
        LogEntry { term, index, payload: EntryPayload::Blank }
    }

    pub fn command(term: u64, index: u64, payload: Vec<u8>) -> Self {
        LogEntry { term, index, payload: EntryPayload::Command(payload) }
    }

    pub fn configuration(term: u64, index: u64, configuration: ClusterConfiguration) -> Self {
        LogEntry { term, index, payload: EntryPayload::Configuration(configuration) }
    }

    /// Approximate size of this entry on the wire
    pub fn wire_size(&self) -> usize {
        const OVERHEAD: usize = 64;
        match &self.payload {
            EntryPayload::Blank => OVERHEAD,
            EntryPayload::Configuration(c) => {
                OVERHEAD + c.voters.iter().map(|(id, addr)| id.len() + addr.len() + 8).sum::<usize>()
            }
            EntryPayload::Command(bytes) => OVERHEAD + bytes.len().div_ceil(3) * 4,
        }
    }
}

/// Upper bound on the entry bytes in one AppendEntries request. A single
/// entry larger than this is still sent on its own.
pub const MAX_APPEND_BYTES: usize = 1024 * 1024;

/// RequestVote RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    /// Candidate's term
    pub term: u64,
    /// Candidate requesting vote
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry
    pub last_log_index: u64,
    /// Term of candidate's last log entry
    pub last_log_term: u64,
}

/// RequestVote RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResult {
    /// Current term, for candidate to update itself
    pub term: u64,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    /// Leader's term
    pub term: u64,
    pub leader_id: NodeId,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: u64,
    /// Term of prev_log_index entry
    pub prev_log_term: u64,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit_index
    pub leader_commit: u64,
}

/// AppendEntries RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    /// Current term, for leader to update itself
    pub term: u64,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
    /// Follower's last log index, lets the leader skip back quickly on rejection
    pub last_log_index: u64,
}

/// Result of handling an AppendEntries RPC
#[derive(Debug, Clone)]
pub struct HandleAppendEntriesOutput {
    /// The response to send back to the leader
    pub result: AppendEntriesResult,
    /// Leader ID if we recognized a valid leader
    pub leader_id: Option<NodeId>,
}

/// InstallSnapshot RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    /// Leader's term
    pub term: u64,
    pub leader_id: NodeId,
    /// Last log index included in snapshot
    pub last_included_index: u64,
    /// Term of last included entry
    pub last_included_term: u64,
    /// Voter set as of the snapshot
    pub configuration: ClusterConfiguration,
    /// Snapshot data
    #[serde(with = "crate::encoding::base64_bytes")]
    pub data: Vec<u8>,
}

/// InstallSnapshot RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstallSnapshotResult {
    /// Snapshot was installed, or the follower already had everything it covers
    Success { term: u64 },
    /// Snapshot installation failed
    Failed { term: u64, reason: String },
}

/// Next message a leader should send to bring one peer up to date
#[derive(Debug, Clone)]
pub enum ReplicationRequest {
    /// `match_index` is the index the peer will match on success
    AppendEntries { args: AppendEntriesArgs, match_index: u64 },
    InstallSnapshot(InstallSnapshotArgs),
}

/// Handle returned by `propose`, resolved when the entry is applied
#[derive(Debug)]
pub struct Proposal {
    pub index: u64,
    pub term: u64,
    pub(crate) outcome: oneshot::Receiver<Result<ApplyOutput, RaftError>>,
}

/// A client waiting for its proposed entry to be applied
struct Waiter {
    term: u64,
    reply: oneshot::Sender<Result<ApplyOutput, RaftError>>,
}

/// Core Raft state machine (sync, transport-agnostic)
pub struct RaftCore {
    // Storage backend for persistent state
    storage: Box<dyn Storage>,
    // State machine to apply committed entries to (must support snapshots)
    state_machine: Box<dyn Snapshotable>,

    // Persistent state on all servers (updated on stable storage before responding to RPCs)
    /// Latest term server has seen (initialized to 0 on first boot, increases monotonically)
    pub current_term: u64,
    /// Candidate ID that received vote in current term (or None if none)
    pub voted_for: Option<NodeId>,
    /// Log entries after the snapshot (first index is snapshot_last_index + 1)
    pub log: Vec<LogEntry>,
    /// Last log index included in snapshot (0 if no snapshot)
    pub snapshot_last_index: u64,
    /// Term of the last log entry included in snapshot (0 if no snapshot)
    pub snapshot_last_term: u64,
    /// Voter set, recovered from the snapshot or the latest configuration entry
    pub configuration: ClusterConfiguration,

    // Volatile state on all servers
    /// Index of highest log entry known to be committed (initialized to 0, increases monotonically)
    pub commit_index: u64,
    /// Index of highest log entry applied to state machine (initialized to 0, increases monotonically)
    pub last_applied: u64,

    // Volatile state on leaders (reinitialized after election)
    /// For each server, index of next log entry to send to that server
    pub next_index: HashMap<NodeId, u64>,
    /// For each server, index of highest log entry known to be replicated on server
    pub match_index: HashMap<NodeId, u64>,

    /// Unique identifier for this node
    pub id: NodeId,
    pub state: RaftState,
    /// Voters that have granted votes in the current election (used by candidates)
    votes_received: HashSet<NodeId>,
    /// Current known leader (updated when receiving valid AppendEntries)
    pub current_leader: Option<NodeId>,
    /// Last time we received a valid heartbeat from leader (for election timeout)
    pub last_heartbeat: Instant,
    /// Number of applied log entries before triggering automatic snapshot (0 = disabled)
    snapshot_threshold: u64,
    /// Proposals waiting for their entry to be applied, keyed by index
    waiters: HashMap<u64, Waiter>,
    leadership_tx: watch::Sender<LeadershipState>,
}

impl RaftCore {
    /// Create a new Raft core with the given storage backend and state machine
    ///
    /// Loads persistent state (term, voted_for, log, snapshot) from storage
    /// and restores the state machine from the snapshot if one exists.
    pub fn new(
        id: impl Into<NodeId>,
        storage: Box<dyn Storage>,
        mut state_machine: Box<dyn Snapshotable>,
    ) -> Result<Self, RaftError> {
        let id = id.into();
        let current_term = storage.load_term()?;
        let voted_for = storage.load_voted_for()?;
        let log = storage.load_log()?;

        let (snapshot_last_index, snapshot_last_term, snapshot_configuration) =
            match storage.load_snapshot()? {
                Some(snapshot) => {
                    state_machine.restore(&snapshot.data).map_err(|e| {
                        StorageError::Corruption(format!("snapshot restore failed: {}", e))
                    })?;
                    let metadata = snapshot.metadata;
                    (
                        metadata.last_included_index,
                        metadata.last_included_term,
                        metadata.configuration,
                    )
                }
                None => (0, 0, ClusterConfiguration::default()),
            };

        // Everything in the snapshot is committed and applied
        let commit_index = snapshot_last_index;
        let last_applied = snapshot_last_index;

        let (leadership_tx, _) = watch::channel(LeadershipState {
            role: RaftState::Follower,
            term: current_term,
            leader: None,
        });

        let mut core = RaftCore {
            storage,
            state_machine,
            current_term,
            voted_for,
            log,
            snapshot_last_index,
            snapshot_last_term,
            configuration: snapshot_configuration,
            commit_index,
            last_applied,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            id,
            state: RaftState::Follower,
            votes_received: HashSet::new(),
            current_leader: None,
            last_heartbeat: Instant::now(),
            snapshot_threshold: 1000,
            waiters: HashMap::new(),
            leadership_tx,
        };
        core.recompute_configuration();

        if core.has_existing_state() {
            info!(
                node = %core.id,
                term = core.current_term,
                last_log_index = core.last_log_index(),
                snapshot_index = core.snapshot_last_index,
                "recovered persisted raft state"
            );
        }
        Ok(core)
    }

    /// Set the snapshot threshold (number of applied entries before auto-snapshot)
    /// Set to 0 to disable automatic snapshots
    pub fn set_snapshot_threshold(&mut self, threshold: u64) {
        self.snapshot_threshold = threshold;
    }

    /// Subscribe to leadership changes
    pub fn subscribe_leadership(&self) -> watch::Receiver<LeadershipState> {
        self.leadership_tx.subscribe()
    }

    pub fn leadership(&self) -> LeadershipState {
        LeadershipState {
            role: self.state,
            term: self.current_term,
            leader: self.current_leader.clone(),
        }
    }

    fn publish_leadership(&self) {
        let current = self.leadership();
        self.leadership_tx.send_if_modified(|published| {
            if *published == current {
                false
            } else {
                *published = current;
                true
            }
        });
    }

    /// True if this node has ever persisted term, log or snapshot state
    pub fn has_existing_state(&self) -> bool {
        self.current_term > 0 || !self.log.is_empty() || self.snapshot_last_index > 0
    }

    /// Write the initial voter set as the first log entry
    ///
    /// Every node bootstrapped with the same configuration ends up with an
    /// identical entry at index 1, term 1.
    pub fn bootstrap(&mut self, configuration: ClusterConfiguration) -> Result<(), RaftError> {
        if self.has_existing_state() {
            return Err(RaftError::AlreadyBootstrapped);
        }

        self.set_term(1)?;
        self.persist_log_entries(vec![LogEntry::configuration(1, 1, configuration.clone())])?;
        self.configuration = configuration;
        self.last_heartbeat = Instant::now();
        self.publish_leadership();

        info!(node = %self.id, voters = self.configuration.len(), "bootstrapped cluster");
        Ok(())
    }

    pub fn is_voter(&self) -> bool {
        self.configuration.contains(&self.id)
    }

    /// All voters except this node
    pub fn peers(&self) -> Vec<NodeId> {
        self.configuration.peers_of(&self.id)
    }

    // === Persistence helpers ===

    fn set_term(&mut self, term: u64) -> Result<(), StorageError> {
        self.storage.save_term(term)?;
        self.current_term = term;
        Ok(())
    }

    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<(), StorageError> {
        self.storage.save_voted_for(voted_for.as_deref())?;
        self.voted_for = voted_for;
        Ok(())
    }

    fn persist_log_entries(&mut self, entries: Vec<LogEntry>) -> Result<(), StorageError> {
        self.storage.append_log_entries(&entries)?;
        self.log.extend(entries);
        Ok(())
    }

    /// Drop every entry with index >= from_index
    fn persist_truncate_log(&mut self, from_index: u64) -> Result<(), StorageError> {
        self.storage.truncate_log(from_index)?;
        self.log.retain(|e| e.index < from_index);
        Ok(())
    }

    /// Adopt a higher term: clear the vote and return to follower
    fn step_down(&mut self, new_term: u64) -> Result<(), StorageError> {
        let old_state = self.state;
        self.set_term(new_term)?;
        self.set_voted_for(None)?;
        self.current_leader = None;
        self.become_follower();
        if old_state != RaftState::Follower {
            info!(node = %self.id, was = ?old_state, term = new_term, "stepped down to follower");
        }
        Ok(())
    }

    fn become_follower(&mut self) {
        if self.state == RaftState::Leader {
            self.fail_waiters(RaftError::LeadershipLost);
        }
        self.state = RaftState::Follower;
        self.votes_received.clear();
        self.publish_leadership();
    }

    fn fail_waiters(&mut self, error: RaftError) {
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.reply.send(Err(error.clone()));
        }
    }

    /// Drop waiters whose caller stopped listening (timed out or disconnected)
    ///
    /// The entries stay in the log; only the reply slot is released.
    pub fn prune_abandoned_proposals(&mut self) {
        let before = self.waiters.len();
        self.waiters.retain(|_, waiter| !waiter.reply.is_closed());
        let pruned = before - self.waiters.len();
        if pruned > 0 {
            debug!(node = %self.id, pruned, "dropped abandoned proposals");
        }
    }

    /// Number of proposals still waiting to be applied
    pub fn pending_proposals(&self) -> usize {
        self.waiters.len()
    }

    /// Get the last log index (returns snapshot_last_index if log is empty)
    pub fn last_log_index(&self) -> u64 {
        self.log.last().map_or(self.snapshot_last_index, |e| e.index)
    }

    /// Get the term of the last log entry (returns snapshot_last_term if log is empty)
    pub fn last_log_term(&self) -> u64 {
        self.log.last().map_or(self.snapshot_last_term, |e| e.term)
    }

    /// Get a log entry by its index, accounting for snapshot offset
    /// Returns None if the entry is in the snapshot or beyond the log
    pub fn get_log_entry(&self, index: u64) -> Option<&LogEntry> {
        if index <= self.snapshot_last_index {
            return None;
        }
        // log[0] is entry at index (snapshot_last_index + 1)
        let offset = (index - self.snapshot_last_index - 1) as usize;
        self.log.get(offset)
    }

    /// Term of the entry at `index`, including the snapshot boundary
    /// None if the index is compacted away or beyond the log
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            Some(0)
        } else if index == self.snapshot_last_index {
            Some(self.snapshot_last_term)
        } else {
            self.get_log_entry(index).map(|e| e.term)
        }
    }

    /// Derive the voter set from the snapshot and the latest configuration entry
    fn recompute_configuration(&mut self) {
        let from_log = self.log.iter().rev().find_map(|e| match &e.payload {
            EntryPayload::Configuration(c) => Some(c.clone()),
            _ => None,
        });
        if let Some(configuration) = from_log {
            self.configuration = configuration;
        }
    }

    /// Check if candidate's log is at least as up-to-date as receiver's log
    pub fn is_log_up_to_date(&self, candidate_last_log_term: u64, candidate_last_log_index: u64) -> bool {
        let my_last_term = self.last_log_term();
        let my_last_index = self.last_log_index();

        candidate_last_log_term > my_last_term
            || (candidate_last_log_term == my_last_term && candidate_last_log_index >= my_last_index)
    }

    /// Handle RequestVote RPC
    pub fn handle_request_vote(&mut self, vote_req: &RequestVoteArgs) -> Result<RequestVoteResult, StorageError> {
        let deny = |term| RequestVoteResult { term, vote_granted: false };

        // Decline requests with stale term immediately
        if vote_req.term < self.current_term {
            return Ok(deny(self.current_term));
        }

        // If RPC request or response contains term T > currentTerm: set currentTerm = T, convert to follower
        if vote_req.term > self.current_term {
            self.step_down(vote_req.term)?;
        }

        // If already voted for another candidate, decline vote
        if self.voted_for.as_ref().is_some_and(|v| *v != vote_req.candidate_id) {
            return Ok(deny(self.current_term));
        }

        if !self.is_log_up_to_date(vote_req.last_log_term, vote_req.last_log_index) {
            return Ok(deny(self.current_term));
        }

        self.set_voted_for(Some(vote_req.candidate_id.clone()))?;
        // Granting a vote also defers our own candidacy
        self.last_heartbeat = Instant::now();
        debug!(node = %self.id, candidate = %vote_req.candidate_id, term = self.current_term, "granted vote");

        Ok(RequestVoteResult {
            term: self.current_term,
            vote_granted: true,
        })
    }

    /// Handle AppendEntries RPC (heartbeat or log replication)
    pub fn handle_append_entries(
        &mut self,
        append_req: &AppendEntriesArgs,
    ) -> Result<HandleAppendEntriesOutput, StorageError> {
        if append_req.term > self.current_term {
            self.step_down(append_req.term)?;
        }

        if append_req.term < self.current_term {
            return Ok(HandleAppendEntriesOutput {
                result: self.append_result(false),
                leader_id: None,
            });
        }

        // Valid AppendEntries from current leader - reset election timeout
        if self.state != RaftState::Follower {
            self.become_follower();
        }
        self.current_leader = Some(append_req.leader_id.clone());
        self.last_heartbeat = Instant::now();
        self.publish_leadership();
        let leader_id = Some(append_req.leader_id.clone());

        if !self.prev_entry_matches(append_req.prev_log_index, append_req.prev_log_term) {
            return Ok(HandleAppendEntriesOutput {
                result: self.append_result(false),
                leader_id,
            });
        }

        self.append_from_leader(&append_req.entries)?;

        // Only the prefix this request proved identical to the leader's log may commit;
        // anything past it could be a stale tail from an older term
        let last_new_index = append_req.prev_log_index + append_req.entries.len() as u64;
        if append_req.leader_commit > self.commit_index {
            let new_commit = append_req.leader_commit.min(last_new_index);
            if new_commit > self.commit_index {
                self.commit_index = new_commit;
                self.apply_committed_entries();
            }
        }

        Ok(HandleAppendEntriesOutput {
            result: self.append_result(true),
            leader_id,
        })
    }

    fn append_result(&self, success: bool) -> AppendEntriesResult {
        AppendEntriesResult {
            term: self.current_term,
            success,
            last_log_index: self.last_log_index(),
        }
    }

    fn prev_entry_matches(&self, prev_log_index: u64, prev_log_term: u64) -> bool {
        if prev_log_index > self.last_log_index() {
            return false;
        }
        if prev_log_index < self.snapshot_last_index {
            // Inside our snapshot, hence committed, hence identical on the leader
            return true;
        }
        self.term_at(prev_log_index) == Some(prev_log_term)
    }

    /// Append entries from a leader, truncating any conflicting suffix
    fn append_from_leader(&mut self, entries: &[LogEntry]) -> Result<(), StorageError> {
        let mut to_append = Vec::new();
        let mut truncated = false;

        for entry in entries {
            if entry.index <= self.snapshot_last_index {
                continue;
            }
            if !to_append.is_empty() {
                to_append.push(entry.clone());
                continue;
            }
            match self.get_log_entry(entry.index).map(|e| e.term) {
                // Already present (idempotent)
                Some(term) if term == entry.term => {}
                Some(_) => {
                    warn!(node = %self.id, index = entry.index, "truncating conflicting log suffix");
                    self.persist_truncate_log(entry.index)?;
                    truncated = true;
                    to_append.push(entry.clone());
                }
                None => to_append.push(entry.clone()),
            }
        }

        let has_configuration = to_append
            .iter()
            .any(|e| matches!(e.payload, EntryPayload::Configuration(_)));

        if !to_append.is_empty() {
            debug!(
                node = %self.id,
                first = to_append[0].index,
                count = to_append.len(),
                "replicated entries"
            );
            self.persist_log_entries(to_append)?;
        }
        if truncated || has_configuration {
            self.recompute_configuration();
        }
        Ok(())
    }

    /// Handle InstallSnapshot RPC
    pub fn handle_install_snapshot(
        &mut self,
        args: &InstallSnapshotArgs,
    ) -> Result<InstallSnapshotResult, StorageError> {
        if args.term < self.current_term {
            return Ok(InstallSnapshotResult::Failed {
                term: self.current_term,
                reason: "stale term".to_string(),
            });
        }

        if args.term > self.current_term {
            self.step_down(args.term)?;
        }
        if self.state != RaftState::Follower {
            self.become_follower();
        }

        // Reset election timeout - we heard from valid leader
        self.last_heartbeat = Instant::now();
        self.current_leader = Some(args.leader_id.clone());
        self.publish_leadership();

        // Already applied everything the snapshot covers
        if args.last_included_index <= self.last_applied {
            debug!(
                node = %self.id,
                snapshot_index = args.last_included_index,
                last_applied = self.last_applied,
                "ignoring snapshot already covered locally"
            );
            return Ok(InstallSnapshotResult::Success { term: self.current_term });
        }

        // Save snapshot to storage first, before touching the state machine
        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                last_included_index: args.last_included_index,
                last_included_term: args.last_included_term,
                configuration: args.configuration.clone(),
            },
            data: args.data.clone(),
        };
        if let Err(e) = self.storage.save_snapshot(&snapshot) {
            return Ok(InstallSnapshotResult::Failed {
                term: self.current_term,
                reason: format!("failed to save snapshot: {}", e),
            });
        }

        if let Err(e) = self.state_machine.restore(&args.data) {
            error!(node = %self.id, error = %e, "failed to restore state machine from snapshot");
            return Ok(InstallSnapshotResult::Failed {
                term: self.current_term,
                reason: format!("failed to restore snapshot: {}", e),
            });
        }

        // Keep the log suffix only if it continues from the snapshot
        let keeps_suffix = self.term_at(args.last_included_index) == Some(args.last_included_term);
        if keeps_suffix {
            self.log.retain(|e| e.index > args.last_included_index);
            self.storage.compact_log(args.last_included_index + 1)?;
        } else {
            self.log.clear();
            self.storage.truncate_log(0)?;
        }

        self.snapshot_last_index = args.last_included_index;
        self.snapshot_last_term = args.last_included_term;
        self.configuration = args.configuration.clone();
        self.recompute_configuration();
        self.commit_index = self.commit_index.max(args.last_included_index);
        self.last_applied = args.last_included_index;

        info!(
            node = %self.id,
            index = args.last_included_index,
            term = args.last_included_term,
            "installed snapshot from leader"
        );
        Ok(InstallSnapshotResult::Success { term: self.current_term })
    }

    /// Start a new election (called when election timeout elapses)
    pub fn start_election(&mut self) -> Result<(), StorageError> {
        self.set_term(self.current_term + 1)?;
        let id = self.id.clone();
        self.set_voted_for(Some(id.clone()))?;

        self.state = RaftState::Candidate;
        self.current_leader = None;
        self.votes_received.clear();
        self.votes_received.insert(id);
        // Reset election timer so we don't immediately timeout again
        self.last_heartbeat = Instant::now();
        self.publish_leadership();
        info!(node = %self.id, term = self.current_term, "became candidate");

        // A single-voter cluster already has its majority
        if self.votes_received.len() >= self.configuration.quorum() {
            self.become_leader()?;
        }
        Ok(())
    }

    /// Become leader (called after receiving majority of votes)
    pub fn become_leader(&mut self) -> Result<(), StorageError> {
        self.state = RaftState::Leader;
        self.current_leader = Some(self.id.clone());
        self.last_heartbeat = Instant::now();

        // Reinitialize next_index and match_index BEFORE appending no-op
        // so next_index points at the no-op and the first round carries it
        let last_index = self.last_log_index();
        self.next_index.clear();
        self.match_index.clear();
        for peer_id in self.peers() {
            self.next_index.insert(peer_id.clone(), last_index + 1);
            self.match_index.insert(peer_id, 0);
        }

        // Leader can only commit entries from its own term (Raft paper Section 5.4.2)
        let blank = LogEntry::blank(self.current_term, last_index + 1);
        self.persist_log_entries(vec![blank])?;
        self.publish_leadership();
        info!(node = %self.id, term = self.current_term, "became leader");

        self.advance_commit_index();
        Ok(())
    }

    /// Append a client command to the leader's log
    ///
    /// The returned proposal resolves once the entry is applied here, or
    /// fails if this node loses leadership first.
    pub fn propose(&mut self, payload: Vec<u8>) -> Result<Proposal, RaftError> {
        if self.state != RaftState::Leader {
            return Err(RaftError::NotLeader {
                leader: self.current_leader.clone(),
            });
        }

        let index = self.last_log_index() + 1;
        let term = self.current_term;
        self.persist_log_entries(vec![LogEntry::command(term, index, payload)])?;
        debug!(node = %self.id, index, term, "appended proposal");

        let (reply, outcome) = oneshot::channel();
        self.waiters.insert(index, Waiter { term, reply });

        // Commits immediately when this node is the only voter
        self.advance_commit_index();
        Ok(Proposal { index, term, outcome })
    }

    /// Advance commit_index to the highest current-term index stored on a majority
    pub fn advance_commit_index(&mut self) {
        if self.state != RaftState::Leader {
            return;
        }

        let quorum = self.configuration.quorum();
        let mut new_commit = None;
        for n in (self.commit_index + 1..=self.last_log_index()).rev() {
            // Raft safety: only count replicas for entries from the current term
            match self.term_at(n) {
                Some(term) if term == self.current_term => {}
                _ => break,
            }
            let replicated = self
                .configuration
                .voters
                .keys()
                .filter(|voter| {
                    **voter == self.id || self.match_index.get(*voter).is_some_and(|m| *m >= n)
                })
                .count();
            if replicated >= quorum {
                new_commit = Some(n);
                break;
            }
        }

        if let Some(n) = new_commit {
            debug!(node = %self.id, index = n, "advanced commit index");
            self.commit_index = n;
            self.apply_committed_entries();
        }
    }

    /// Apply committed entries to the state machine, in index order
    ///
    /// Resolves any waiting proposal and triggers an automatic snapshot when
    /// the threshold is reached. Returns (index, result) for each entry
    /// applied.
    pub fn apply_committed_entries(&mut self) -> Vec<(u64, ApplyResult)> {
        let mut results = Vec::new();
        while self.last_applied < self.commit_index {
            let index = self.last_applied + 1;
            let Some(entry) = self.get_log_entry(index) else {
                error!(node = %self.id, index, "committed entry missing from log");
                break;
            };
            let entry_term = entry.term;
            let command = match &entry.payload {
                EntryPayload::Command(payload) => Some(payload.clone()),
                EntryPayload::Blank | EntryPayload::Configuration(_) => None,
            };
            let result = match command {
                Some(payload) => self.state_machine.apply(&payload),
                None => Ok(ApplyOutput::Empty),
            };
            self.last_applied = index;

            if let Some(waiter) = self.waiters.remove(&index) {
                let outcome = if waiter.term == entry_term {
                    result.clone().map_err(RaftError::from)
                } else {
                    Err(RaftError::LeadershipLost)
                };
                let _ = waiter.reply.send(outcome);
            }
            results.push((index, result));
        }

        // All nodes snapshot independently to bound log growth
        if self.snapshot_threshold > 0 {
            let entries_since_snapshot = self.last_applied - self.snapshot_last_index;
            if entries_since_snapshot >= self.snapshot_threshold {
                info!(node = %self.id, entries_since_snapshot, "automatic snapshot triggered");
                if let Err(e) = self.take_snapshot() {
                    warn!(node = %self.id, error = %e, "automatic snapshot failed");
                }
            }
        }

        results
    }

    /// Take a snapshot of the state machine up to last_applied
    /// Discards log entries covered by the snapshot
    pub fn take_snapshot(&mut self) -> Result<(), SnapshotError> {
        if self.last_applied == 0 {
            return Err(SnapshotError::NothingApplied);
        }
        if self.last_applied <= self.snapshot_last_index {
            return Err(SnapshotError::AlreadyCovered {
                snapshot_index: self.snapshot_last_index,
                last_applied: self.last_applied,
            });
        }

        let last_applied_term = self
            .get_log_entry(self.last_applied)
            .map(|e| e.term)
            .ok_or(SnapshotError::MissingEntry(self.last_applied))?;

        let snapshot = Snapshot {
            metadata: SnapshotMetadata {
                last_included_index: self.last_applied,
                last_included_term: last_applied_term,
                configuration: self.configuration.clone(),
            },
            data: self.state_machine.snapshot()?,
        };
        self.storage.save_snapshot(&snapshot)?;

        self.snapshot_last_index = snapshot.metadata.last_included_index;
        self.snapshot_last_term = snapshot.metadata.last_included_term;

        let keep_from = self.snapshot_last_index + 1;
        self.storage.compact_log(keep_from)?;
        self.log.retain(|entry| entry.index >= keep_from);

        info!(
            node = %self.id,
            index = self.snapshot_last_index,
            term = self.snapshot_last_term,
            "snapshot taken"
        );
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        self.storage.load_snapshot()
    }

    pub fn request_vote_args(&self) -> RequestVoteArgs {
        RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        }
    }

    /// Build the next message for `peer`: AppendEntries with everything from
    /// its `next_index`, or InstallSnapshot if that prefix is compacted away
    pub fn replication_request(&self, peer: &str) -> Option<ReplicationRequest> {
        if self.state != RaftState::Leader {
            return None;
        }
        let next_idx = self.next_index.get(peer).copied().unwrap_or(1).max(1);

        if next_idx <= self.snapshot_last_index {
            return match self.load_snapshot() {
                Ok(Some(snapshot)) => Some(ReplicationRequest::InstallSnapshot(InstallSnapshotArgs {
                    term: self.current_term,
                    leader_id: self.id.clone(),
                    last_included_index: snapshot.metadata.last_included_index,
                    last_included_term: snapshot.metadata.last_included_term,
                    configuration: snapshot.metadata.configuration,
                    data: snapshot.data,
                })),
                Ok(None) => {
                    error!(node = %self.id, "log is compacted but no snapshot is stored");
                    None
                }
                Err(e) => {
                    warn!(node = %self.id, error = %e, "failed to load snapshot for lagging peer");
                    None
                }
            };
        }

        let prev_log_index = next_idx - 1;
        let prev_log_term = self.term_at(prev_log_index).unwrap_or(0);
        let mut entries = Vec::new();
        let mut batch_bytes = 0;
        for entry in self.log.iter().filter(|e| e.index >= next_idx) {
            let size = entry.wire_size();
            if !entries.is_empty() && batch_bytes + size > MAX_APPEND_BYTES {
                break;
            }
            batch_bytes += size;
            entries.push(entry.clone());
        }
        let match_index = prev_log_index + entries.len() as u64;

        Some(ReplicationRequest::AppendEntries {
            args: AppendEntriesArgs {
                term: self.current_term,
                leader_id: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            },
            match_index,
        })
    }

    /// Handle a RequestVote result (called by candidate after receiving vote response)
    /// Returns true if this node became leader as a result
    pub fn handle_request_vote_result(
        &mut self,
        peer_id: &str,
        result: &RequestVoteResult,
    ) -> Result<bool, StorageError> {
        if result.term > self.current_term {
            self.step_down(result.term)?;
            return Ok(false);
        }

        // Stale response from an earlier election, or we already moved on
        if self.state != RaftState::Candidate || result.term < self.current_term {
            return Ok(false);
        }

        if result.vote_granted && self.configuration.contains(peer_id) {
            self.votes_received.insert(peer_id.to_string());
        }

        if self.votes_received.len() >= self.configuration.quorum() {
            self.become_leader()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Handle an AppendEntries result (called by leader after receiving replication response)
    ///
    /// `sent_match_index` is the index the peer matches if it accepted the
    /// request (prev_log_index + number of entries sent).
    pub fn handle_append_entries_result(
        &mut self,
        peer_id: &str,
        sent_match_index: u64,
        result: &AppendEntriesResult,
    ) -> Result<(), StorageError> {
        if result.term > self.current_term {
            self.step_down(result.term)?;
            return Ok(());
        }
        if self.state != RaftState::Leader || result.term < self.current_term {
            return Ok(());
        }

        if result.success {
            let current_match = self.match_index.get(peer_id).copied().unwrap_or(0);
            if sent_match_index > current_match {
                self.match_index.insert(peer_id.to_string(), sent_match_index);
            }
            let next = self.next_index.entry(peer_id.to_string()).or_insert(1);
            *next = (*next).max(sent_match_index + 1);
            self.advance_commit_index();
        } else {
            // Back off, jumping straight past the end of a short follower log
            let current_next = self.next_index.get(peer_id).copied().unwrap_or(1);
            let retry = current_next
                .saturating_sub(1)
                .min(result.last_log_index + 1)
                .max(1);
            self.next_index.insert(peer_id.to_string(), retry);
        }
        Ok(())
    }

    /// Handle an InstallSnapshot result (called by leader)
    pub fn handle_install_snapshot_result(
        &mut self,
        peer_id: &str,
        last_included_index: u64,
        result: &InstallSnapshotResult,
    ) -> Result<(), StorageError> {
        match result {
            InstallSnapshotResult::Success { term } => {
                if *term > self.current_term {
                    return self.step_down(*term);
                }
                if self.state != RaftState::Leader {
                    return Ok(());
                }
                let current_match = self.match_index.get(peer_id).copied().unwrap_or(0);
                self.match_index
                    .insert(peer_id.to_string(), current_match.max(last_included_index));
                self.next_index
                    .insert(peer_id.to_string(), current_match.max(last_included_index) + 1);
                self.advance_commit_index();
            }
            InstallSnapshotResult::Failed { term, reason } => {
                if *term > self.current_term {
                    return self.step_down(*term);
                }
                warn!(node = %self.id, peer = %peer_id, %reason, "peer rejected snapshot");
            }
        }
        Ok(())
    }
}
