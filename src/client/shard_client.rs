//! Shard manager client

use crate::error::ManagerError;
use crate::protocol::{decode_line, ControlMessage, InboundKind, ShardId};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// How long to wait for a CONNECT_READY before asking again
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `done_connecting` waits for the controller to close its side
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// One control connection, used for exactly one shard's connect-cycle.
///
/// The "can-connect" signal belongs to the client, not to a shard, so
/// concurrently identifying shards each need their own client.
/// [`done_connecting`](Self::done_connecting) consumes the client.
#[derive(Debug)]
pub struct ShardClient {
    writer: OwnedWriteHalf,
    can_connect: watch::Receiver<bool>,
    listener: JoinHandle<()>,
    request_timeout: Duration,
    max_attempts: Option<u32>,
}

impl ShardClient {
    /// Connect to the shard manager
    pub async fn open_connection(host: &str, port: u16) -> Result<Self, ManagerError> {
        let addr = format!("{host}:{port}");
        info!(%addr, "Connecting to shard manager");

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ManagerError::connect(addr.clone(), source))?;

        info!(%addr, "Connected to shard manager");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, writer) = stream.into_split();
        let (can_connect_tx, can_connect) = watch::channel(false);
        let listener = tokio::spawn(message_listener(read_half, can_connect_tx));

        Self {
            writer,
            can_connect,
            listener,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Fail after `max_attempts` unanswered requests instead of asking forever
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// True once CONNECT_READY has been received on this connection
    pub fn can_connect(&self) -> bool {
        *self.can_connect.borrow()
    }

    async fn tell_manager(&mut self, message: ControlMessage) -> Result<(), ManagerError> {
        let line = message.encode()?;
        let shard_id = message.shard();
        let op = message.op().as_str();
        debug!(shard_id, op, "Telling shard manager");

        let send_err = |source| ManagerError::Send {
            shard_id,
            op,
            source,
        };
        self.writer.write_all(&line).await.map_err(send_err)?;
        self.writer.flush().await.map_err(send_err)
    }

    /// Ask to identify and wait until the controller allows it.
    ///
    /// Resends REQUEST_CONNECT every `request_timeout`; the controller treats
    /// repeats as a resend, never as a second reservation.
    pub async fn ask_to_connect(&mut self, shard_id: ShardId, priority: bool) -> Result<(), ManagerError> {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            self.tell_manager(ControlMessage::request_connect(shard_id, priority))
                .await?;

            let signalled = tokio::time::timeout(
                self.request_timeout,
                self.can_connect.wait_for(|ready| *ready),
            )
            .await
            .map(|ready| ready.is_ok());

            match signalled {
                Ok(true) => {
                    info!(shard_id, attempts, "Shard manager allowed shard to connect");
                    return Ok(());
                }
                // Listener ended without a CONNECT_READY
                Ok(false) => return Err(ManagerError::ConnectionClosed { shard_id }),
                Err(_) => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(ManagerError::AdmissionTimedOut { shard_id, attempts });
                    }
                    info!(
                        shard_id,
                        attempts,
                        "Timed out waiting for connection - asking the shard manager again"
                    );
                }
            }
        }
    }

    /// Report that the shard finished identifying and close the connection
    pub async fn done_connecting(mut self, shard_id: ShardId) -> Result<(), ManagerError> {
        self.tell_manager(ControlMessage::connect_complete(shard_id))
            .await?;
        let _ = self.writer.shutdown().await;

        // Drain until the controller closes its side so nothing unread is
        // left in our receive buffer when the socket drops.
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut self.listener)
            .await
            .is_err()
        {
            debug!(shard_id, "Shard manager did not close the connection in time");
        }
        Ok(())
    }
}

impl Drop for ShardClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Read controller messages; CONNECT_READY sets the can-connect signal.
/// Unparseable lines are skipped.
async fn message_listener(read_half: OwnedReadHalf, can_connect: watch::Sender<bool>) {
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::with_capacity(128);

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Error reading from shard manager");
                break;
            }
        }

        let Ok(inbound) = decode_line(&line) else {
            continue;
        };

        match inbound.kind {
            InboundKind::Message(ControlMessage::ConnectReady { shard }) => {
                info!(shard_id = shard, "Received CONNECT_READY from shard manager");
                can_connect.send_replace(true);
            }
            InboundKind::Message(ControlMessage::Ping { shard_id }) => {
                trace!(shard_id, "Received ping from shard manager");
            }
            other => debug!(message = ?other, "Ignoring message from shard manager"),
        }
    }

    debug!("Shard manager connection closed");
}
