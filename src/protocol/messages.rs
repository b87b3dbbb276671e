//! Control message format and line framing

use super::{OpCode, ShardId};
use crate::error::ManagerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A control-plane message
///
/// Serialized as a flat JSON object tagged by `op`:
/// ```text
/// {"op":"REQUEST_CONNECT","shard":3,"priority":false}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// "Let me identify"
    RequestConnect {
        shard: ShardId,
        #[serde(default)]
        priority: bool,
    },
    /// "You may identify now"
    ConnectReady { shard: ShardId },
    /// "I finished identifying"
    ConnectComplete { shard: ShardId },
    /// Liveness probe
    Ping { shard_id: ShardId },
}

impl ControlMessage {
    #[must_use]
    pub fn request_connect(shard: ShardId, priority: bool) -> Self {
        Self::RequestConnect { shard, priority }
    }

    #[must_use]
    pub fn connect_ready(shard: ShardId) -> Self {
        Self::ConnectReady { shard }
    }

    #[must_use]
    pub fn connect_complete(shard: ShardId) -> Self {
        Self::ConnectComplete { shard }
    }

    #[must_use]
    pub fn ping(shard_id: ShardId) -> Self {
        Self::Ping { shard_id }
    }

    /// Opcode of this message
    #[must_use]
    pub fn op(&self) -> OpCode {
        match self {
            Self::RequestConnect { .. } => OpCode::RequestConnect,
            Self::ConnectReady { .. } => OpCode::ConnectReady,
            Self::ConnectComplete { .. } => OpCode::ConnectComplete,
            Self::Ping { .. } => OpCode::Ping,
        }
    }

    /// Shard this message is about
    #[must_use]
    pub fn shard(&self) -> ShardId {
        match self {
            Self::RequestConnect { shard, .. }
            | Self::ConnectReady { shard }
            | Self::ConnectComplete { shard } => *shard,
            Self::Ping { shard_id } => *shard_id,
        }
    }

    /// Encode as a single newline-terminated JSON line
    pub fn encode(&self) -> Result<Vec<u8>, ManagerError> {
        let mut line = serde_json::to_vec(self).map_err(ManagerError::Encode)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// A decoded inbound line that carried an `op`
#[derive(Debug)]
pub struct Inbound {
    /// The `shard` field, whenever the line carried one as an integer.
    /// Present even for unknown or invalid messages so the controller can
    /// route replies back to the sending connection.
    pub shard: Option<ShardId>,
    pub kind: InboundKind,
}

#[derive(Debug)]
pub enum InboundKind {
    /// A well-formed message
    Message(ControlMessage),
    /// An opcode outside the protocol
    Unknown(String),
    /// A known opcode whose fields did not match its schema
    Invalid {
        op: OpCode,
        source: serde_json::Error,
    },
}

/// Lines that cannot be interpreted at all
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not valid JSON")]
    Malformed(#[source] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("message is missing its op field")]
    MissingOp,
}

/// Decode one line received from a peer.
///
/// Trailing `\r\n` / `\n` are tolerated.
pub fn decode_line(line: &[u8]) -> Result<Inbound, DecodeError> {
    let value: Value = serde_json::from_slice(line).map_err(DecodeError::Malformed)?;

    let Value::Object(map) = &value else {
        return Err(DecodeError::NotAnObject);
    };

    let op = map
        .get("op")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingOp)?;
    let shard = map.get("shard").and_then(Value::as_u64);

    let kind = match OpCode::from_wire(op) {
        None => InboundKind::Unknown(op.to_string()),
        Some(op) => match serde_json::from_value::<ControlMessage>(value.clone()) {
            Ok(message) => InboundKind::Message(message),
            Err(source) => InboundKind::Invalid { op, source },
        },
    };

    Ok(Inbound { shard, kind })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Result<Inbound, DecodeError> {
        decode_line(line.as_bytes())
    }

    #[test]
    fn request_connect_priority_defaults_to_false() {
        let inbound = decode(r#"{"op":"REQUEST_CONNECT","shard":4}"#).unwrap();
        assert_eq!(inbound.shard, Some(4));
        match inbound.kind {
            InboundKind::Message(msg) => {
                assert_eq!(msg, ControlMessage::request_connect(4, false));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encoded_line_ends_with_newline_and_decodes() {
        let line = ControlMessage::request_connect(9, true).encode().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let inbound = decode_line(&line).unwrap();
        assert!(matches!(
            inbound.kind,
            InboundKind::Message(ControlMessage::RequestConnect {
                shard: 9,
                priority: true
            })
        ));
    }

    #[test]
    fn ping_uses_shard_id_field() {
        let line = ControlMessage::ping(2).encode().unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value, serde_json::json!({"op": "PING", "shard_id": 2}));

        // PING has no `shard` field, so it never rebinds a socket
        assert_eq!(decode_line(&line).unwrap().shard, None);
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(decode("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(""), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn missing_or_non_string_op() {
        assert!(matches!(decode(r#"{"shard":1}"#), Err(DecodeError::MissingOp)));
        assert!(matches!(decode(r#"{"op":3,"shard":1}"#), Err(DecodeError::MissingOp)));
    }

    #[test]
    fn unknown_op_keeps_shard() {
        let inbound = decode(r#"{"op":"RESUME","shard":12}"#).unwrap();
        assert_eq!(inbound.shard, Some(12));
        assert!(matches!(inbound.kind, InboundKind::Unknown(ref op) if op == "RESUME"));
    }

    #[test]
    fn known_op_with_bad_fields_is_invalid() {
        let inbound = decode(r#"{"op":"CONNECT_COMPLETE"}"#).unwrap();
        assert_eq!(inbound.shard, None);
        assert!(matches!(
            inbound.kind,
            InboundKind::Invalid {
                op: OpCode::ConnectComplete,
                ..
            }
        ));

        let inbound = decode(r#"{"op":"REQUEST_CONNECT","shard":1,"priority":"yes"}"#).unwrap();
        assert_eq!(inbound.shard, Some(1));
        assert!(matches!(inbound.kind, InboundKind::Invalid { .. }));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let inbound = decode(r#"{"op":"CONNECT_COMPLETE","shard":3,"pid":4242}"#).unwrap();
        assert!(matches!(
            inbound.kind,
            InboundKind::Message(ControlMessage::ConnectComplete { shard: 3 })
        ));
    }
}
