//! In-memory transport implementation for testing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::error;

use crate::core::membership::NodeId;
use crate::core::raft_core::{
    AppendEntriesArgs, AppendEntriesResult, InstallSnapshotArgs, InstallSnapshotResult, RaftCore,
    RequestVoteArgs, RequestVoteResult,
};
use crate::transport::{Transport, TransportError};

/// Request types that can be sent to a node
pub enum Request {
    RequestVote {
        args: RequestVoteArgs,
        reply: oneshot::Sender<RequestVoteResult>,
    },
    AppendEntries {
        args: AppendEntriesArgs,
        reply: oneshot::Sender<AppendEntriesResult>,
    },
    InstallSnapshot {
        args: InstallSnapshotArgs,
        reply: oneshot::Sender<InstallSnapshotResult>,
    },
}

/// In-memory transport that uses channels for communication
pub struct InMemoryTransport {
    /// Senders to each node's request channel
    senders: HashMap<NodeId, mpsc::Sender<Request>>,
    /// Optional timeout for RPC calls
    timeout: Option<Duration>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport with senders to all nodes (no timeout)
    pub fn new(senders: HashMap<NodeId, mpsc::Sender<Request>>) -> Self {
        Self { senders, timeout: None }
    }

    /// Create a new in-memory transport with a timeout
    pub fn with_timeout(senders: HashMap<NodeId, mpsc::Sender<Request>>, timeout: Duration) -> Self {
        Self { senders, timeout: Some(timeout) }
    }

    async fn call<R>(
        &self,
        target: &str,
        request: impl FnOnce(oneshot::Sender<R>) -> Request,
    ) -> Result<R, TransportError> {
        let sender = self.senders.get(target).ok_or(TransportError::NodeNotFound)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(request(reply_tx))
            .await
            .map_err(|_| TransportError::ConnectionFailed)?;

        // Apply timeout if configured
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|_| TransportError::ConnectionFailed),
            None => reply_rx.await.map_err(|_| TransportError::ConnectionFailed),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn request_vote(
        &self,
        target: &str,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError> {
        self.call(target, |reply| Request::RequestVote { args, reply }).await
    }

    async fn append_entries(
        &self,
        target: &str,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError> {
        self.call(target, |reply| Request::AppendEntries { args, reply }).await
    }

    async fn install_snapshot(
        &self,
        target: &str,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotResult, TransportError> {
        self.call(target, |reply| Request::InstallSnapshot { args, reply }).await
    }
}

/// Handle for a node that processes incoming requests
pub struct NodeHandle {
    receiver: mpsc::Receiver<Request>,
}

impl NodeHandle {
    /// Process one incoming request using the given RaftCore
    pub async fn process_one(&mut self, node: &mut RaftCore) -> bool {
        match self.receiver.recv().await {
            Some(request) => {
                Self::handle_request(request, node);
                true
            }
            None => false,
        }
    }

    /// Process one request using a shared node (for use with RaftServer)
    /// This method receives the request first, then briefly locks to process
    pub async fn process_one_shared(&mut self, node: &Arc<Mutex<RaftCore>>) -> bool {
        match self.receiver.recv().await {
            Some(request) => {
                let mut n = node.lock().await;
                Self::handle_request(request, &mut n);
                true
            }
            None => false,
        }
    }

    /// Keep serving requests until every sender is dropped
    pub async fn serve(mut self, node: Arc<Mutex<RaftCore>>) {
        while self.process_one_shared(&node).await {}
    }

    // On a storage failure the reply is dropped, which the caller sees as a
    // failed connection
    fn handle_request(request: Request, node: &mut RaftCore) {
        match request {
            Request::RequestVote { args, reply } => match node.handle_request_vote(&args) {
                Ok(result) => {
                    let _ = reply.send(result);
                }
                Err(e) => error!(node = %node.id, error = %e, "request_vote failed"),
            },
            Request::AppendEntries { args, reply } => match node.handle_append_entries(&args) {
                Ok(output) => {
                    let _ = reply.send(output.result);
                }
                Err(e) => error!(node = %node.id, error = %e, "append_entries failed"),
            },
            Request::InstallSnapshot { args, reply } => match node.handle_install_snapshot(&args) {
                Ok(result) => {
                    let _ = reply.send(result);
                }
                Err(e) => error!(node = %node.id, error = %e, "install_snapshot failed"),
            },
        }
    }
}

pub type ClusterTransports = (HashMap<NodeId, InMemoryTransport>, HashMap<NodeId, NodeHandle>);

/// Create transports and handles for a cluster of nodes
pub fn create_cluster(node_ids: &[&str]) -> ClusterTransports {
    create_cluster_with_timeout(node_ids, None)
}

/// Create transports and handles for a cluster of nodes with optional timeout
pub fn create_cluster_with_timeout(node_ids: &[&str], timeout: Option<Duration>) -> ClusterTransports {
    let mut senders: HashMap<NodeId, mpsc::Sender<Request>> = HashMap::new();
    let mut handles: HashMap<NodeId, NodeHandle> = HashMap::new();

    // Create a channel for each node
    for &id in node_ids {
        let (tx, rx) = mpsc::channel(32);
        senders.insert(id.to_string(), tx);
        handles.insert(id.to_string(), NodeHandle { receiver: rx });
    }

    // Create a transport for each node with senders to all other nodes
    let mut transports = HashMap::new();
    for &id in node_ids {
        let other_senders: HashMap<NodeId, mpsc::Sender<Request>> = senders
            .iter()
            .filter(|(k, _)| k.as_str() != id)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let transport = match timeout {
            Some(t) => InMemoryTransport::with_timeout(other_senders, t),
            None => InMemoryTransport::new(other_senders),
        };
        transports.insert(id.to_string(), transport);
    }

    (transports, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::membership::ClusterConfiguration;
    use crate::core::raft_core::RaftState;
    use crate::state_machine::TestStateMachine;
    use crate::storage::MemoryStorage;

    fn new_test_core(id: &str) -> RaftCore {
        let mut core = RaftCore::new(id, Box::new(MemoryStorage::new()), Box::new(TestStateMachine::new())).unwrap();
        let configuration = ["1", "2", "3"]
            .iter()
            .fold(ClusterConfiguration::new(), |c, id| c.with_voter(*id, "unused"));
        core.bootstrap(configuration).unwrap();
        core
    }

    fn vote_args(term: u64) -> RequestVoteArgs {
        RequestVoteArgs {
            term,
            candidate_id: "1".to_string(),
            last_log_index: 1,
            last_log_term: 1,
        }
    }

    #[tokio::test]
    async fn test_request_vote() {
        let (transports, mut handles) = create_cluster(&["1", "2", "3"]);
        let mut node2 = new_test_core("2");

        // Node 1 requests vote from node 2
        let transport1 = &transports["1"];
        let vote_future = transport1.request_vote("2", vote_args(2));

        // Process the request on node 2
        let handle2 = handles.get_mut("2").unwrap();
        let (result, _) = tokio::join!(vote_future, handle2.process_one(&mut node2));

        let result = result.unwrap();
        assert!(result.vote_granted);
        assert_eq!(result.term, 2);
        assert_eq!(node2.voted_for, Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_append_entries() {
        let (transports, mut handles) = create_cluster(&["1", "2", "3"]);
        let mut node2 = new_test_core("2");

        let args = AppendEntriesArgs {
            term: 1,
            leader_id: "1".to_string(),
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: 0,
        };
        let append_future = transports["1"].append_entries("2", args);

        let handle2 = handles.get_mut("2").unwrap();
        let (result, _) = tokio::join!(append_future, handle2.process_one(&mut node2));

        let result = result.unwrap();
        assert!(result.success);
        assert_eq!(result.term, 1);
        assert_eq!(node2.current_leader, Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_node_not_found() {
        let (transports, _handles) = create_cluster(&["1", "2"]);

        // Try to send to non-existent node
        let result = transports["1"].request_vote("99", vote_args(2)).await;
        assert_eq!(result.unwrap_err(), TransportError::NodeNotFound);
    }

    #[tokio::test]
    async fn test_election_via_transport() {
        let (transports, mut handles) = create_cluster(&["1", "2", "3"]);

        let mut node1 = new_test_core("1");
        let mut node2 = new_test_core("2");
        let mut node3 = new_test_core("3");

        node1.start_election().unwrap();
        let args = node1.request_vote_args();

        let transport1 = &transports["1"];
        let vote2_future = transport1.request_vote("2", args.clone());
        let vote3_future = transport1.request_vote("3", args);

        let mut handle2 = handles.remove("2").unwrap();
        let mut handle3 = handles.remove("3").unwrap();

        let (result2, result3, _, _) = tokio::join!(
            vote2_future,
            vote3_future,
            handle2.process_one(&mut node2),
            handle3.process_one(&mut node3),
        );

        let became_leader2 = node1.handle_request_vote_result("2", &result2.unwrap()).unwrap();
        let became_leader3 = node1.handle_request_vote_result("3", &result3.unwrap()).unwrap();

        assert!(became_leader2 || became_leader3);
        assert_eq!(node1.state, RaftState::Leader);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_vote_timeout() {
        let timeout = Duration::from_millis(100);
        let (transports, _handles) = create_cluster_with_timeout(&["1", "2"], Some(timeout));

        // Request vote but don't process on node 2 - should timeout
        let result = transports["1"].request_vote("2", vote_args(2)).await;
        assert_eq!(result.unwrap_err(), TransportError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_responses_and_timeouts() {
        let timeout = Duration::from_millis(100);
        let (transports, mut handles) = create_cluster_with_timeout(&["1", "2", "3"], Some(timeout));
        let mut node2 = new_test_core("2");
        // Node 3 won't respond

        let transport1 = &transports["1"];
        let mut handle2 = handles.remove("2").unwrap();

        let (result2, result3, _) = tokio::join!(
            transport1.request_vote("2", vote_args(2)),
            transport1.request_vote("3", vote_args(2)),
            handle2.process_one(&mut node2),
        );

        assert!(result2.unwrap().vote_granted);
        assert_eq!(result3.unwrap_err(), TransportError::Timeout);
    }

    #[tokio::test]
    async fn test_dropped_handle_is_connection_failure() {
        let (transports, handles) = create_cluster(&["1", "2"]);
        drop(handles);

        let result = transports["1"].request_vote("2", vote_args(2)).await;
        assert_eq!(result.unwrap_err(), TransportError::ConnectionFailed);
    }
}
