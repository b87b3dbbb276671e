//! Identify gate
//!
//! Wraps a shard's identify routine so it only runs once the shard manager
//! allows it. When the gate is disabled the routine runs immediately.

use super::ShardClient;
use crate::config::GateConfig;
use crate::error::ManagerError;
use crate::protocol::ShardId;
use std::future::Future;
use tracing::{info, warn};

/// Per-process switch between gated and direct identifies
#[derive(Debug, Clone, Default)]
pub struct IdentifyGate {
    config: GateConfig,
}

impl IdentifyGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// A gate that never contacts the shard manager
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Run `identify` for `shard_id` once the shard manager allows it.
    ///
    /// Re-identifies should pass `priority = true` so they jump the queue.
    /// CONNECT_COMPLETE is reported whatever `identify` returns; a failure
    /// to report is only logged because the controller reclaims the slot
    /// once the dropped connection fails its next ping.
    pub async fn identify<F, Fut, T>(
        &self,
        shard_id: ShardId,
        priority: bool,
        identify: F,
    ) -> Result<T, ManagerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.config.enabled {
            return Ok(identify().await);
        }

        let client = loop {
            let mut client = self.open_client().await;
            match client.ask_to_connect(shard_id, priority).await {
                Ok(()) => break client,
                Err(err) if err.is_dead_peer() => {
                    warn!(
                        shard_id,
                        error = %err,
                        "Lost the shard manager while waiting - reconnecting"
                    );
                    tokio::time::sleep(self.config.connect_backoff()).await;
                }
                Err(err) => return Err(err),
            }
        };

        let output = identify().await;

        if let Err(err) = client.done_connecting(shard_id).await {
            warn!(shard_id, error = %err, "Failed to report CONNECT_COMPLETE");
        }

        Ok(output)
    }

    /// Connect to the shard manager, retrying until it is reachable
    async fn open_client(&self) -> ShardClient {
        loop {
            match ShardClient::open_connection(&self.config.host, self.config.port).await {
                Ok(client) => {
                    return client
                        .with_request_timeout(self.config.request_timeout())
                        .with_max_attempts(self.config.max_attempts);
                }
                Err(err) => {
                    info!(
                        error = %err,
                        backoff_secs = self.config.connect_backoff_secs,
                        "Failed to connect to shard manager - waiting"
                    );
                    tokio::time::sleep(self.config.connect_backoff()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_gate_runs_identify_directly() {
        let gate = IdentifyGate::disabled();
        assert!(!gate.is_enabled());

        let result = gate.identify(0, false, || async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
