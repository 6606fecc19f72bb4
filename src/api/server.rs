//! TCP accept loop for the RESP frontend
//!
//! One task per connection. Requests on a connection are answered in order,
//! so a slow write only holds up its own client.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::handler::CommandHandler;
use super::resp::{Frame, ProtocolError, RespCodec};

pub struct RespServer {
    handler: CommandHandler,
}

impl RespServer {
    pub fn new(handler: CommandHandler) -> Self {
        Self { handler }
    }

    /// Serve until the process exits
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until `shutdown` resolves; open connections finish on their own
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(addr = %local, "RESP server listening");
        let mut shutdown = pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %local, "RESP server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(handler, stream, peer).await {
                            debug!(%peer, error = %e, "connection closed");
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(handler: CommandHandler, stream: TcpStream, peer: SocketAddr) -> Result<(), ProtocolError> {
    debug!(%peer, "client connected");
    let mut framed = Framed::new(stream, RespCodec::new());

    while let Some(request) = framed.next().await {
        match request {
            Ok(frame) => {
                let reply = handler.handle(frame).await;
                framed.send(reply).await?;
            }
            Err(ProtocolError::Invalid(message)) => {
                // The stream position is lost; answer once and drop the client
                let err = ProtocolError::Invalid(message);
                framed.send(Frame::error(format!("ERR {}", err))).await?;
                return Err(err);
            }
            Err(e) => return Err(e),
        }
    }
    debug!(%peer, "client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    use crate::core::raft_core::RaftCore;
    use crate::core::raft_server::RaftServer;
    use crate::kv::{MemoryStore, Store};
    use crate::state_machine::KvStateMachine;
    use crate::storage::{MemoryStableStore, MemoryStorage};
    use crate::transport::inmemory::create_cluster;

    /// Server backed by a node that never leads; reads still work
    async fn spawn_follower_server() -> (SocketAddr, Arc<MemoryStore>, oneshot::Sender<()>) {
        let store = Arc::new(MemoryStore::new());
        let core = RaftCore::new(
            "a",
            Box::new(MemoryStorage::new()),
            Box::new(KvStateMachine::new(store.clone())),
        )
        .unwrap();
        let (mut transports, _handles) = create_cluster(&["a"]);
        let (raft_server, _shared) = RaftServer::new(core, transports.remove("a").unwrap());
        let handler = CommandHandler::new(
            "a",
            store.clone(),
            raft_server.handle(),
            Arc::new(MemoryStableStore::new()),
            Duration::from_secs(1),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            RespServer::new(handler)
                .serve_with_shutdown(listener, async {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });
        (addr, store, stop_tx)
    }

    async fn read_reply(stream: &mut TcpStream, expected_len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected_len];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let (addr, store, _stop) = spawn_follower_server().await;
        store.put(b"a", b"1").unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\nGET a\r\n")
            .await
            .unwrap();

        let expected = b"$1\r\n1\r\n$-1\r\n$1\r\n1\r\n";
        assert_eq!(read_reply(&mut stream, expected.len()).await, expected);
    }

    #[tokio::test]
    async fn test_write_on_non_leader_is_rejected_without_mutation() {
        let (addr, store, _stop) = spawn_follower_server().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"SET k v\r\n").await.unwrap();

        let expected = b"-ERR no known leader\r\n";
        assert_eq!(read_reply(&mut stream, expected.len()).await, expected);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let (addr, _store, _stop) = spawn_follower_server().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"*1\r\n$x\r\n").await.unwrap();

        let mut reply = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.starts_with(b"-ERR Protocol error"));
        assert!(reply.ends_with(b"\r\n"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, _store, stop) = spawn_follower_server().await;
        stop.send(()).unwrap();

        // Listener is dropped once the accept loop returns
        let mut refused = false;
        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(refused);
    }
}
