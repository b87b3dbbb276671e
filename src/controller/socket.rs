//! Per-connection socket handle used to push messages to shard clients

use crate::error::ManagerError;
use crate::protocol::ControlMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Write side of one control connection.
///
/// Cloned into the admission state for every shard that spoke on the
/// connection. Equality is connection identity. Once the write half is
/// released (peer EOF, a failed write, or an explicit close) every further
/// send fails with [`ManagerError::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct SocketHandle {
    conn_id: Uuid,
    peer: SocketAddr,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    write_timeout: Duration,
}

impl SocketHandle {
    pub fn new(
        conn_id: Uuid,
        peer: SocketAddr,
        writer: OwnedWriteHalf,
        write_timeout: Duration,
    ) -> Self {
        Self {
            conn_id,
            peer,
            writer: Arc::new(Mutex::new(Some(writer))),
            write_timeout,
        }
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write one message line, releasing the write half on failure
    pub async fn send(&self, message: &ControlMessage) -> Result<(), ManagerError> {
        let line = message.encode()?;
        let shard_id = message.shard();
        let op = message.op().as_str();

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ManagerError::ConnectionClosed { shard_id });
        };

        let write = async move {
            writer.write_all(&line).await?;
            writer.flush().await
        };

        let result = tokio::time::timeout(self.write_timeout, write).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                guard.take();
                Err(ManagerError::Send {
                    shard_id,
                    op,
                    source,
                })
            }
            Err(_) => {
                guard.take();
                Err(ManagerError::SendTimedOut {
                    shard_id,
                    op,
                    timeout: self.write_timeout,
                })
            }
        }
    }

    /// Half-close and release the write side
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Release the write side after the peer went away
    pub async fn mark_closed(&self) {
        self.writer.lock().await.take();
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for SocketHandle {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (SocketHandle, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();
        let handle = SocketHandle::new(Uuid::new_v4(), peer, write, Duration::from_secs(1));
        (handle, client)
    }

    #[tokio::test]
    async fn send_writes_one_json_line() {
        let (handle, client) = pair().await;
        handle.send(&ControlMessage::connect_ready(3)).await.unwrap();

        let mut lines = BufReader::new(client).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["op"], "CONNECT_READY");
        assert_eq!(value["shard"], 3);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (handle, _client) = pair().await;
        handle.close().await;
        assert!(handle.is_closed().await);

        let err = handle.send(&ControlMessage::ping(1)).await.unwrap_err();
        assert!(matches!(err, ManagerError::ConnectionClosed { shard_id: 1 }));
        assert!(err.is_dead_peer());
    }

    #[tokio::test]
    async fn write_to_vanished_peer_fails_then_stays_closed() {
        let (handle, client) = pair().await;
        drop(client);

        // The first writes can still land in the kernel buffer; the reset
        // surfaces on a later one.
        let mut failure = None;
        for _ in 0..50 {
            if let Err(err) = handle.send(&ControlMessage::ping(6)).await {
                failure = Some(err);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = failure.expect("writes to a closed peer never failed");
        assert!(matches!(err, ManagerError::Send { shard_id: 6, op: "PING", .. }));
        assert!(err.is_dead_peer());
        assert!(handle.is_closed().await);

        let err = handle.send(&ControlMessage::ping(6)).await.unwrap_err();
        assert!(matches!(err, ManagerError::ConnectionClosed { shard_id: 6 }));
    }

    #[tokio::test]
    async fn clones_compare_by_connection() {
        let (a, _ca) = pair().await;
        let (b, _cb) = pair().await;
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
