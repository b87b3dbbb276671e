//! Admission controller server
//!
//! One TCP listener, one task per control connection, a dispatch loop and a
//! keepalive loop. All admission state lives behind a single lock that is
//! never held across an await point, so every decision sees a consistent
//! queue, connecting set and IDENTIFY window.

use super::socket::SocketHandle;
use super::state::{AdmissionState, RequestOutcome, StateSnapshot};
use super::ControllerSettings;
use crate::error::ManagerError;
use crate::metrics::ManagerMetrics;
use crate::protocol::{decode_line, ControlMessage, DecodeError, InboundKind, ShardId};

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// The single authority deciding which shard may identify next
pub struct AdmissionController {
    settings: ControllerSettings,
    state: Mutex<AdmissionState<SocketHandle>>,
    wake: Notify,
    metrics: ManagerMetrics,
    listening: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl AdmissionController {
    pub fn new(settings: ControllerSettings, metrics: ManagerMetrics) -> Arc<Self> {
        let state = AdmissionState::new(settings.max_concurrency, settings.rate_window);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            settings,
            state: Mutex::new(state),
            wake: Notify::new(),
            metrics,
            listening: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Bind the control listener. Failure here is fatal for the process.
    pub async fn bind(addr: &str) -> Result<TcpListener, ManagerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ManagerError::bind(addr, source))
    }

    /// True while `serve` is accepting connections
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.lock().snapshot(Instant::now())
    }

    /// Signal `serve` to stop
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Accept control connections and run the dispatch and keepalive loops
    /// until [`shutdown`](Self::shutdown) is called.
    ///
    /// Every spawned task is tracked and aborted on the way out.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ManagerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return Ok(());
        }

        let local_addr = listener.local_addr().ok();
        info!(
            addr = ?local_addr,
            max_concurrency = self.settings.max_concurrency,
            "Waiting for shard connections"
        );

        let mut loops = JoinSet::new();
        loops.spawn(Arc::clone(&self).dispatch_loop());
        loops.spawn(Arc::clone(&self).keepalive_loop());

        let mut connections = JoinSet::new();
        self.listening.store(true, Ordering::SeqCst);
        self.publish_state();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(Arc::clone(&self).handle_connection(stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept shard connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
                Some(joined) = loops.join_next() => {
                    // The loops never return on their own
                    error!(result = ?joined.map_err(|e| e.to_string()), "Controller loop exited");
                    break;
                }
                _ = shutdown_rx.changed() => {
                    info!("Shard manager shutting down");
                    break;
                }
            }
        }

        self.listening.store(false, Ordering::SeqCst);
        connections.shutdown().await;
        loops.shutdown().await;

        info!("Shard manager stopped");
        Ok(())
    }

    /// Read line-delimited JSON from one control connection until EOF
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let conn_id = Uuid::new_v4();
        info!(%conn_id, %peer, "New shard manager connection");

        let (read_half, write_half) = stream.into_split();
        let handle = SocketHandle::new(conn_id, peer, write_half, self.settings.write_timeout);
        let mut reader = BufReader::new(read_half);
        let mut line = Vec::with_capacity(256);

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => self.handle_line(&handle, &line).await,
                Err(e) => {
                    debug!(%conn_id, error = %e, "Error reading from shard connection");
                    break;
                }
            }
        }

        // Further sends to this connection fail, so the keepalive loop
        // purges any shard still bound to it.
        handle.mark_closed().await;
        info!(%conn_id, %peer, "Shard manager connection closed");
    }

    async fn handle_line(&self, handle: &SocketHandle, line: &[u8]) {
        let conn_id = handle.conn_id();

        let inbound = match decode_line(line) {
            Ok(inbound) => inbound,
            Err(err @ (DecodeError::Malformed(_) | DecodeError::NotAnObject)) => {
                debug!(%conn_id, error = %err, "Error reading line");
                self.metrics.record_ignored("malformed");
                return;
            }
            Err(DecodeError::MissingOp) => {
                warn!(
                    %conn_id,
                    line = %String::from_utf8_lossy(line).trim_end(),
                    "Message is missing opcode"
                );
                self.metrics.record_ignored("missing_op");
                return;
            }
        };

        if let Some(shard_id) = inbound.shard {
            self.state.lock().bind_handle(shard_id, handle.clone());
        }

        match inbound.kind {
            InboundKind::Message(ControlMessage::RequestConnect { shard, priority }) => {
                self.shard_request(shard, priority).await;
            }
            InboundKind::Message(ControlMessage::ConnectComplete { shard }) => {
                self.shard_connected(shard).await;
            }
            InboundKind::Message(message @ (ControlMessage::ConnectReady { .. } | ControlMessage::Ping { .. })) => {
                warn!(%conn_id, op = %message.op(), "Received a controller-only opcode from a shard");
                self.metrics.record_ignored("wrong_direction");
            }
            InboundKind::Unknown(op) => {
                warn!(%conn_id, op = %op, "Message with invalid opcode received");
                self.metrics.record_ignored("unknown_op");
            }
            InboundKind::Invalid { op, source } => {
                warn!(%conn_id, %op, error = %source, "Message with invalid fields received");
                self.metrics.record_ignored("invalid_payload");
            }
        }
    }

    /// Enqueue a shard, or resend CONNECT_READY if it is already connecting
    async fn shard_request(&self, shard_id: ShardId, priority: bool) {
        self.metrics.record_request(priority);
        let outcome = self.state.lock().request(shard_id, priority, Instant::now());

        match outcome {
            RequestOutcome::Queued => {
                info!(shard_id, priority, "Adding shard to the connection waitlist");
                self.wake.notify_one();
                self.publish_state();
            }
            RequestOutcome::AlreadyQueued => {
                info!(shard_id, "Shard already in the connection waitlist");
                self.metrics.record_duplicate("queued");
            }
            RequestOutcome::AlreadyConnecting => {
                info!(shard_id, "Shard asked to connect again - resending connect payload");
                self.metrics.record_duplicate("connecting");
                tokio::time::sleep(self.settings.resend_delay).await;
                self.resend_connect_ready(shard_id).await;
            }
        }
    }

    async fn resend_connect_ready(&self, shard_id: ShardId) {
        let handle = {
            let state = self.state.lock();
            if state.is_connecting(shard_id) {
                state.handle(shard_id)
            } else {
                None
            }
        };

        match handle {
            Some(handle) => {
                self.send_or_purge(shard_id, &handle, ControlMessage::connect_ready(shard_id))
                    .await;
            }
            None => debug!(shard_id, "Shard finished connecting before the resend"),
        }
    }

    /// Free the shard's slot and close its socket
    async fn shard_connected(&self, shard_id: ShardId) {
        let completion = self.state.lock().complete(shard_id, Instant::now());

        if completion.was_connecting {
            let connect_time = completion.connect_time.unwrap_or_default();
            let waited = completion.waited.unwrap_or_default();
            info!(
                shard_id,
                connect_secs = connect_time.as_secs_f64(),
                queued_secs = waited.as_secs_f64(),
                "Shard connected"
            );
            self.metrics.record_completion(connect_time);
            self.wake.notify_one();
        } else if completion.was_queued {
            warn!(shard_id, "CONNECT_COMPLETE received for a queued shard - withdrawing its request");
            self.metrics.record_ignored("still_queued");
        } else {
            warn!(shard_id, "CONNECT_COMPLETE received for a shard that was not connecting");
            self.metrics.record_ignored("not_connecting");
        }

        // One handle per connect-cycle
        if let Some(handle) = completion.handle {
            handle.close().await;
        }

        self.publish_state();
    }

    /// Send a message; a transport failure marks the shard dead
    async fn send_or_purge(&self, shard_id: ShardId, handle: &SocketHandle, message: ControlMessage) -> bool {
        match handle.send(&message).await {
            Ok(()) => true,
            Err(err) => {
                self.metrics.record_error(err.error_type_label());
                if err.is_dead_peer() {
                    self.purge_dead(shard_id, handle, &err);
                } else {
                    error!(shard_id, error = %err, "Failed to send control message");
                }
                false
            }
        }
    }

    fn purge_dead(&self, shard_id: ShardId, handle: &SocketHandle, err: &ManagerError) {
        let purged = self.state.lock().purge(shard_id, handle);

        if let Some(purged) = purged {
            info!(
                shard_id,
                conn_id = %handle.conn_id(),
                peer = %handle.peer(),
                error = %err,
                was_queued = purged.was_queued,
                was_connecting = purged.was_connecting,
                "Shard unreachable - removing it from the connectable shards"
            );
            self.metrics.record_dead_shard();
            if purged.was_connecting {
                self.wake.notify_one();
            }
            self.publish_state();
        }
    }

    /// Move queued shards to connecting whenever the cap and the IDENTIFY
    /// window allow. Runs on a fixed interval and whenever woken by an
    /// enqueue or a freed slot.
    async fn dispatch_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.dispatch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sends = JoinSet::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
                Some(joined) = sends.join_next(), if !sends.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "CONNECT_READY task panicked");
                        }
                    }
                    continue;
                }
            }

            let admitted = self.state.lock().admit(Instant::now());
            if admitted.is_empty() {
                continue;
            }

            for admission in admitted {
                info!(
                    shard_id = admission.shard_id,
                    priority = admission.priority,
                    queued_secs = admission.waited.as_secs_f64(),
                    "Telling shard that it can connect now"
                );
                self.metrics.record_dispatch(admission.priority, admission.waited);

                let this = Arc::clone(&self);
                sends.spawn(async move {
                    let message = ControlMessage::connect_ready(admission.shard_id);
                    this.send_or_purge(admission.shard_id, &admission.handle, message)
                        .await;
                });
            }

            self.publish_state();
        }
    }

    /// Ping every bound shard; shards whose socket fails are purged
    async fn keepalive_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.keepalive_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let handles = self.state.lock().handles();
            if handles.is_empty() {
                continue;
            }

            let mut pings = JoinSet::new();
            for (shard_id, handle) in handles {
                pings.spawn(async move {
                    let result = handle.send(&ControlMessage::ping(shard_id)).await;
                    (shard_id, handle, result)
                });
            }

            while let Some(joined) = pings.join_next().await {
                let Ok((shard_id, handle, result)) = joined else {
                    continue;
                };

                match result {
                    Ok(()) => debug!(shard_id, "Sent ping to shard"),
                    Err(err) => {
                        self.metrics.record_error(err.error_type_label());
                        if err.is_dead_peer() {
                            self.purge_dead(shard_id, &handle, &err);
                        }
                    }
                }
            }
        }
    }

    fn publish_state(&self) {
        let snapshot = self.snapshot();
        self.metrics.set_state(&snapshot);
    }
}
