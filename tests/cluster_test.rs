//! Cluster integration tests
//!
//! Real 3-node clusters on loopback: Raft RPC over HTTP, clients over RESP.

use std::time::Duration;

use bytes::Bytes;

use raft_redis::api::Frame;
use raft_redis::kv::{KvError, Store};
use raft_redis::testing::TestCluster;

fn bulk(s: &str) -> Frame {
    Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
}

/// Wait until every running node has applied the leader's commit index
async fn wait_replicated(cluster: &TestCluster, leader: usize) {
    let commit = cluster.nodes[leader].shared_core.lock().await.commit_index;
    assert!(
        cluster.wait_for_applied(commit, Duration::from_secs(5)).await,
        "followers should apply index {}",
        commit
    );
}

#[tokio::test]
async fn test_cluster_elects_one_leader() {
    let cluster = TestCluster::new().await;
    cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");

    // Give a few heartbeats for stale candidates to step down
    tokio::time::sleep(Duration::from_millis(300)).await;
    let leaders = cluster.nodes.iter().filter(|n| n.raft_handle.is_leader()).count();
    assert_eq!(leaders, 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_set_get_del_across_nodes() {
    let cluster = TestCluster::new().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    let follower = cluster
        .wait_for_follower(Duration::from_secs(5))
        .await
        .expect("Should have a follower");

    let mut leader_client = cluster.client(leader).await;
    let mut follower_client = cluster.client(follower).await;

    assert_eq!(leader_client.command(&["SET", "foo", "bar"]).await.unwrap(), Frame::ok());
    assert_eq!(leader_client.command(&["GET", "foo"]).await.unwrap(), bulk("bar"));

    wait_replicated(&cluster, leader).await;
    assert_eq!(follower_client.command(&["GET", "foo"]).await.unwrap(), bulk("bar"));

    assert_eq!(leader_client.command(&["DEL", "foo"]).await.unwrap(), Frame::Integer(1));
    assert_eq!(leader_client.command(&["GET", "foo"]).await.unwrap(), Frame::Null);
    assert_eq!(leader_client.command(&["DEL", "foo"]).await.unwrap(), Frame::Integer(0));

    wait_replicated(&cluster, leader).await;
    assert_eq!(follower_client.command(&["GET", "foo"]).await.unwrap(), Frame::Null);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_large_value_replicates_to_followers() {
    let cluster = TestCluster::new().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    let follower = cluster
        .wait_for_follower(Duration::from_secs(5))
        .await
        .expect("Should have a follower");

    // Well past axum's default body limit once wrapped in an RPC
    let value: String = (0..300 * 1024).map(|i| (b'a' + (i % 26) as u8) as char).collect();

    let mut leader_client = cluster.client(leader).await;
    assert_eq!(leader_client.command(&["SET", "big", &value]).await.unwrap(), Frame::ok());
    assert_eq!(leader_client.command(&["SET", "big2", &value]).await.unwrap(), Frame::ok());
    assert_eq!(leader_client.command(&["SET", "small", "v"]).await.unwrap(), Frame::ok());

    wait_replicated(&cluster, leader).await;
    let mut follower_client = cluster.client(follower).await;
    assert_eq!(follower_client.command(&["GET", "big"]).await.unwrap(), bulk(&value));
    assert_eq!(follower_client.command(&["GET", "big2"]).await.unwrap(), bulk(&value));
    assert_eq!(follower_client.command(&["GET", "small"]).await.unwrap(), bulk("v"));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_wrong_arity_does_not_mutate() {
    let cluster = TestCluster::new().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    let mut client = cluster.client(leader).await;

    assert_eq!(
        client.command(&["SET", "foo"]).await.unwrap(),
        Frame::error("ERR wrong number of arguments for 'SET' command")
    );
    assert_eq!(
        client.command(&["PING"]).await.unwrap(),
        Frame::error("ERR unknown command 'PING'")
    );
    assert_eq!(client.command(&["GET", "foo"]).await.unwrap(), Frame::Null);

    for node in &cluster.nodes {
        assert_eq!(node.store.get(b"foo"), Err(KvError::KeyNotFound));
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_follower_redirects_writes_to_leader() {
    let cluster = TestCluster::new().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    let follower = cluster
        .wait_for_follower(Duration::from_secs(5))
        .await
        .expect("Should have a follower");

    let mut client = cluster.client(follower).await;
    let expected = Frame::error(format!("MOVED -1 {}", cluster.nodes[leader].client_addr));
    assert_eq!(client.command(&["SET", "foo", "bar"]).await.unwrap(), expected);
    assert_eq!(client.command(&["DEL", "foo"]).await.unwrap(), expected);

    // Nothing was proposed, so nothing reaches any store
    tokio::time::sleep(Duration::from_millis(200)).await;
    for node in &cluster.nodes {
        assert!(node.store.is_empty());
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_clients() {
    let cluster = TestCluster::new().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");
    let addr = cluster.nodes[leader].client_addr;

    let mut handles = Vec::new();
    for i in 0..20 {
        handles.push(tokio::spawn(async move {
            let mut client = raft_redis::testing::RespClient::connect(addr).await.unwrap();
            let key = format!("key{}", i);
            let value = format!("value{}", i);
            client.command(&["SET", &key, &value]).await.unwrap()
        }));
    }
    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap(), Frame::ok());
    }

    wait_replicated(&cluster, leader).await;
    for node in &cluster.nodes {
        assert_eq!(node.store.len(), 20);
        assert_eq!(node.store.get(b"key7").unwrap(), b"value7".to_vec());
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_leader_failover_keeps_committed_writes() {
    let mut cluster = TestCluster::new().await;
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a leader");

    let mut client = cluster.client(leader).await;
    assert_eq!(client.command(&["SET", "before", "1"]).await.unwrap(), Frame::ok());
    wait_replicated(&cluster, leader).await;

    cluster.shutdown_node(leader).await;

    let new_leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .expect("Should elect a new leader");
    assert_ne!(new_leader, leader);

    let mut client = cluster.client(new_leader).await;
    assert_eq!(client.command(&["GET", "before"]).await.unwrap(), bulk("1"));
    assert_eq!(client.command(&["SET", "after", "2"]).await.unwrap(), Frame::ok());

    cluster.shutdown().await;
}
