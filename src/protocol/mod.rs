//! Control-plane wire protocol
//!
//! Newline-delimited UTF-8 JSON objects, one message per line. Every message
//! carries a string `op` naming one of a closed set of opcodes.

mod messages;
mod opcodes;

pub use messages::{decode_line, ControlMessage, DecodeError, Inbound, InboundKind};
pub use opcodes::OpCode;

/// Shard identifier, globally unique per bot deployment
pub type ShardId = u64;
