//! Domain error types for the shard manager
//!
//! Structured thiserror types so every failure mode of the control plane can
//! be pattern-matched and labelled in metrics without parsing strings.
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, ManagerError>.

use crate::protocol::ShardId;
use std::time::Duration;
use thiserror::Error;

/// Shard manager domain errors
///
/// Example log output:
/// ```text
/// ManagerError::AdmissionTimedOut { shard_id: 3, attempts: 4 }
/// → "shard 3 was not admitted after 4 attempts"
/// ```
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Controller could not bind its listening socket (fatal at startup)
    #[error("failed to bind shard manager listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Client could not reach the controller
    #[error("failed to connect to shard manager at {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a control message to a peer failed
    #[error("failed to send {op} for shard {shard_id}")]
    Send {
        shard_id: ShardId,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Writing a control message did not finish in time
    #[error("sending {op} for shard {shard_id} timed out after {timeout:?}")]
    SendTimedOut {
        shard_id: ShardId,
        op: &'static str,
        timeout: Duration,
    },

    /// The peer connection was already closed when a send was attempted
    #[error("connection for shard {shard_id} is closed")]
    ConnectionClosed { shard_id: ShardId },

    /// Client gave up waiting for CONNECT_READY
    #[error("shard {shard_id} was not admitted after {attempts} attempts")]
    AdmissionTimedOut { shard_id: ShardId, attempts: u32 },

    /// Control message could not be encoded
    #[error("failed to encode control message")]
    Encode(#[source] serde_json::Error),

    /// Discord session start limit lookup failed
    #[error("failed to fetch max_concurrency from Discord")]
    MaxConcurrencyLookup(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Prometheus recorder could not be installed
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),

    /// Configuration error (missing or invalid setting)
    #[error("configuration error: {0}")]
    Config(String),
}

impl ManagerError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `shard_manager_errors_total`.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Connect { .. } => "connect",
            Self::Send { .. } => "send",
            Self::SendTimedOut { .. } => "send_timeout",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::AdmissionTimedOut { .. } => "admission_timeout",
            Self::Encode(_) => "encode",
            Self::MaxConcurrencyLookup(_) => "max_concurrency_lookup",
            Self::Metrics(_) => "metrics",
            Self::Config(_) => "config",
        }
    }

    /// Returns true if the error means the peer is gone and its shard
    /// should be purged from the controller.
    pub fn is_dead_peer(&self) -> bool {
        matches!(
            self,
            Self::Send { .. } | Self::SendTimedOut { .. } | Self::ConnectionClosed { .. }
        )
    }

    pub(crate) fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    pub(crate) fn connect(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connect {
            addr: addr.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for ManagerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
