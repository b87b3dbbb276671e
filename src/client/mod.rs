//! Shard-side adapter for the admission controller
//!
//! A bot process opens one [`ShardClient`] per shard identify and waits for
//! permission before touching the gateway. [`IdentifyGate`] wraps that dance
//! around an arbitrary identify routine and can be switched off per process.

mod gate;
mod shard_client;

pub use gate::IdentifyGate;
pub use shard_client::ShardClient;
