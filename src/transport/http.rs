//! HTTP transport implementation for Raft RPC
//!
//! Uses axum for the server and reqwest for the client. Each RPC is a JSON
//! POST to `/raft/<rpc>` on the peer's consensus address.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, warn};

use crate::core::membership::NodeId;
use crate::core::raft_core::{
    AppendEntriesArgs, AppendEntriesResult, InstallSnapshotArgs, InstallSnapshotResult,
    RequestVoteArgs, RequestVoteResult,
};
use crate::core::raft_node::SharedCore;
use crate::transport::{Transport, TransportError};

/// HTTP transport for Raft RPC communication
pub struct HttpTransport {
    /// Map of node ID to address (e.g., "127.0.0.1:8001")
    peers: HashMap<NodeId, String>,
    /// HTTP client with timeout
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a new HTTP transport with peer addresses
    pub fn new(peers: HashMap<NodeId, String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(HttpTransport { peers, client })
    }

    async fn post<A: Serialize, R: DeserializeOwned>(
        &self,
        target: &str,
        rpc: &str,
        args: &A,
    ) -> Result<R, TransportError> {
        let addr = self.peers.get(target).ok_or(TransportError::NodeNotFound)?;
        let url = format!("http://{}/raft/{}", addr, rpc);

        let response = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::ConnectionFailed
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(peer = %target, rpc, status = status.as_u16(), "peer rejected rpc");
            return Err(TransportError::Remote { status: status.as_u16() });
        }

        response
            .json::<R>()
            .await
            .map_err(|_| TransportError::ConnectionFailed)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request_vote(
        &self,
        target: &str,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError> {
        self.post(target, "request_vote", &args).await
    }

    async fn append_entries(
        &self,
        target: &str,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError> {
        self.post(target, "append_entries", &args).await
    }

    async fn install_snapshot(
        &self,
        target: &str,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotResult, TransportError> {
        self.post(target, "install_snapshot", &args).await
    }
}

/// Largest RPC body the router accepts. Snapshots carry the whole keyspace,
/// so this sits well above axum's 2 MiB default.
pub const MAX_RPC_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// Create an axum router for handling Raft RPCs
pub fn create_router(core: SharedCore) -> Router {
    Router::new()
        .route("/raft/request_vote", post(handle_request_vote))
        .route("/raft/append_entries", post(handle_append_entries))
        .route("/raft/install_snapshot", post(handle_install_snapshot))
        .layer(DefaultBodyLimit::max(MAX_RPC_BODY_BYTES))
        .with_state(core)
}

async fn handle_request_vote(
    State(core): State<SharedCore>,
    Json(args): Json<RequestVoteArgs>,
) -> Result<Json<RequestVoteResult>, StatusCode> {
    let mut core = core.lock().await;
    core.handle_request_vote(&args).map(Json).map_err(|e| {
        error!(node = %core.id, error = %e, "request_vote failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn handle_append_entries(
    State(core): State<SharedCore>,
    Json(args): Json<AppendEntriesArgs>,
) -> Result<Json<AppendEntriesResult>, StatusCode> {
    let mut core = core.lock().await;
    match core.handle_append_entries(&args) {
        Ok(output) => Ok(Json(output.result)),
        Err(e) => {
            error!(node = %core.id, error = %e, "append_entries failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn handle_install_snapshot(
    State(core): State<SharedCore>,
    Json(args): Json<InstallSnapshotArgs>,
) -> Result<Json<InstallSnapshotResult>, StatusCode> {
    let mut core = core.lock().await;
    core.handle_install_snapshot(&args).map(Json).map_err(|e| {
        error!(node = %core.id, error = %e, "install_snapshot failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
