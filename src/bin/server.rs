//! Raft-replicated Redis-compatible server
//!
//! Runs one node: Raft RPC over HTTP on `--raft-addr`, RESP clients on
//! `--client-addr`.
//!
//! Example for a 3-node cluster:
//!   raft-redis-server --id n1 --raft-addr 127.0.0.1:7001 --client-addr 127.0.0.1:6001 --data-dir /tmp/n1 \
//!     --peers 'n2=127.0.0.1:7002|127.0.0.1:6002,n3=127.0.0.1:7003|127.0.0.1:6003'
//!
//! Every node is started with the full peer list; each bootstraps the same
//! voter set on first start and recovers from `--data-dir` afterwards.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use raft_redis::api::{CommandHandler, RespServer};
use raft_redis::cluster::{bootstrap_cluster, parse_peers, record_client_addresses};
use raft_redis::core::{NodeConfig, NodeId, RaftConfig, RaftCore, RaftServer};
use raft_redis::kv::MemoryStore;
use raft_redis::state_machine::KvStateMachine;
use raft_redis::storage::{FileStableStore, FileStorage, StableStore};
use raft_redis::transport::http::{create_router, HttpTransport};

#[derive(Debug, Parser)]
#[command(name = "raft-redis-server", about = "Raft-replicated key-value store speaking RESP")]
struct Args {
    /// Unique node ID
    #[arg(long, env = "RAFT_REDIS_ID")]
    id: String,

    /// Listen address for Raft RPC
    #[arg(long, env = "RAFT_REDIS_RAFT_ADDR")]
    raft_addr: String,

    /// Listen address for RESP clients
    #[arg(long, env = "RAFT_REDIS_CLIENT_ADDR")]
    client_addr: String,

    /// Directory holding the Raft log, snapshots and the stable store
    #[arg(long, env = "RAFT_REDIS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Other voters: id=raftAddr|clientAddr[,id=raftAddr|clientAddr...]
    #[arg(long, env = "RAFT_REDIS_PEERS", default_value = "")]
    peers: String,

    /// Applied entries between automatic snapshots (0 disables)
    #[arg(long, env = "RAFT_REDIS_SNAPSHOT_THRESHOLD", default_value_t = 1000)]
    snapshot_threshold: u64,

    /// How long a write waits to be applied before replying with an error
    #[arg(long, env = "RAFT_REDIS_APPLY_TIMEOUT_MS", default_value_t = 1000)]
    apply_timeout_ms: u64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "RAFT_REDIS_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn node_config(&self) -> Result<NodeConfig> {
        let peers = parse_peers(&self.peers).context("invalid --peers")?;
        if peers.iter().any(|p| p.id == self.id) {
            bail!("--peers must not contain this node's own ID '{}'", self.id);
        }
        Ok(NodeConfig::new(self.id.clone(), self.raft_addr.clone(), self.client_addr.clone())
            .with_peers(peers)
            .with_data_dir(self.data_dir.clone())
            .with_apply_timeout(Duration::from_millis(self.apply_timeout_ms)))
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);
    let config = args.node_config()?;

    info!(
        node = %config.id,
        raft_addr = %config.raft_addr,
        client_addr = %config.client_addr,
        data_dir = %config.data_dir.display(),
        peers = config.peers.len(),
        "starting node"
    );

    let storage = FileStorage::new(&config.data_dir).context("failed to open raft storage")?;
    let stable: Arc<dyn StableStore> =
        Arc::new(FileStableStore::open(&config.data_dir).context("failed to open stable store")?);

    let store = Arc::new(MemoryStore::new());
    let core = RaftCore::new(
        config.id.clone(),
        Box::new(storage),
        Box::new(KvStateMachine::new(store.clone())),
    )
    .context("failed to recover raft state")?;
    let recovered = core.has_existing_state();

    let peer_addrs: HashMap<NodeId, String> = config
        .peers
        .iter()
        .map(|p| (p.id.clone(), p.raft_addr.clone()))
        .collect();
    let transport = HttpTransport::new(peer_addrs, Duration::from_secs(2))?;

    let raft_config = RaftConfig::default().with_snapshot_threshold(args.snapshot_threshold);
    let (server, shared_core) = RaftServer::with_config(core, transport, raft_config);
    let raft = server.start();

    if recovered {
        // Addresses may have moved between restarts
        record_client_addresses(&config, stable.as_ref())?;
        info!(node = %config.id, "persisted state found, skipping bootstrap");
    } else {
        bootstrap_cluster(&config, stable.as_ref(), &raft)
            .await
            .context("bootstrap failed")?;
    }

    let raft_listener = TcpListener::bind(&config.raft_addr)
        .await
        .with_context(|| format!("failed to bind raft address {}", config.raft_addr))?;
    let client_listener = TcpListener::bind(&config.client_addr)
        .await
        .with_context(|| format!("failed to bind client address {}", config.client_addr))?;

    let router = create_router(shared_core);
    let raft_task = tokio::spawn(async move { axum::serve(raft_listener, router).await });
    info!(node = %config.id, addr = %config.raft_addr, "raft RPC listening");

    let handler = CommandHandler::new(config.id.clone(), store, raft.clone(), stable, config.apply_timeout);
    let resp = RespServer::new(handler).serve_with_shutdown(client_listener, async {
        let _ = tokio::signal::ctrl_c().await;
    });

    tokio::select! {
        result = resp => result.context("RESP server failed")?,
        result = raft_task => result.context("raft RPC task panicked")?.context("raft RPC server failed")?,
    }

    info!(node = %config.id, "shutting down");
    raft.shutdown().await;
    Ok(())
}
