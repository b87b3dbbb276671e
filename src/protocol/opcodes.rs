//! Control-plane operation codes

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Shard manager operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// A shard asking to identify (client only)
    RequestConnect,
    /// The controller allowing a shard to identify (server only)
    ConnectReady,
    /// A shard reporting that its identify finished (client only)
    ConnectComplete,
    /// Liveness probe, no reply expected (server only)
    Ping,
}

impl OpCode {
    /// All opcodes, in wire-table order
    pub const ALL: [OpCode; 4] = [
        Self::RequestConnect,
        Self::ConnectReady,
        Self::ConnectComplete,
        Self::Ping,
    ];

    /// Parse the wire name of an opcode
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "REQUEST_CONNECT" => Some(Self::RequestConnect),
            "CONNECT_READY" => Some(Self::ConnectReady),
            "CONNECT_COMPLETE" => Some(Self::ConnectComplete),
            "PING" => Some(Self::Ping),
            _ => None,
        }
    }

    /// Wire name of this opcode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RequestConnect => "REQUEST_CONNECT",
            Self::ConnectReady => "CONNECT_READY",
            Self::ConnectComplete => "CONNECT_COMPLETE",
            Self::Ping => "PING",
        }
    }

    /// Check if this opcode is sent by shard clients
    #[must_use]
    pub const fn is_client_op(self) -> bool {
        matches!(self, Self::RequestConnect | Self::ConnectComplete)
    }

    /// Check if this opcode is sent by the controller
    #[must_use]
    pub const fn is_server_op(self) -> bool {
        matches!(self, Self::ConnectReady | Self::Ping)
    }
}

impl Serialize for OpCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_wire(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid op code: {value}")))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
