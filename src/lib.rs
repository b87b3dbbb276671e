//! Shard Manager - IDENTIFY admission control for Discord bots
//!
//! Discord lets a bot start at most `max_concurrency` gateway sessions per
//! rate limit window. When a bot's shards are spread over several
//! processes, nothing local can enforce that. This crate provides:
//! - an admission controller that queues shard identify requests (priority
//!   first, then arrival order) and releases them under the concurrency cap
//!   and a 5.5s IDENTIFY window
//! - a shard client and identify gate that bot processes use to wait for
//!   permission and report completion
//!
//! The control plane is newline-delimited JSON over plain TCP with no
//! authentication. Run it on a private network.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway_info;
pub mod health;
pub mod metrics;
pub mod protocol;

pub use client::{IdentifyGate, ShardClient};
pub use controller::{AdmissionController, ControllerSettings};
pub use error::ManagerError;
