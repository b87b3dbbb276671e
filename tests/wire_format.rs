//! Wire format conformance tests
//!
//! Validates that control messages serialize to the committed JSON fixtures
//! in tests/fixtures/. Shard processes written against the line protocol
//! depend on these shapes, including the `shard_id` key used by PING.
//!
//! ## Fixture regeneration
//!
//! To regenerate fixtures after an intentional wire format change:
//! ```bash
//! REGENERATE_FIXTURES=1 cargo test --test wire_format
//! ```

use serde_json::Value;
use shard_manager::protocol::{decode_line, ControlMessage, InboundKind, OpCode};
use std::path::PathBuf;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Load a committed fixture by name (without .json extension).
fn load_fixture(name: &str) -> Value {
    let path = fixtures_dir().join(format!("{name}.json"));
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {e}", path.display()));
    serde_json::from_str(&content)
        .unwrap_or_else(|e| panic!("Failed to parse fixture {}: {e}", path.display()))
}

fn write_fixture(name: &str, value: &Value) {
    let path = fixtures_dir().join(format!("{name}.json"));
    let content = format!("{}\n", serde_json::to_string_pretty(value).unwrap());
    std::fs::write(&path, content)
        .unwrap_or_else(|e| panic!("Failed to write fixture {}: {e}", path.display()));
    eprintln!("Regenerated fixture: {}", path.display());
}

fn message_for(fixture_name: &str) -> ControlMessage {
    match fixture_name {
        "request-connect" => ControlMessage::request_connect(3, false),
        "request-connect-priority" => ControlMessage::request_connect(12, true),
        "connect-ready" => ControlMessage::connect_ready(3),
        "connect-complete" => ControlMessage::connect_complete(3),
        "ping" => ControlMessage::ping(3),
        other => panic!("Unknown fixture: {other}"),
    }
}

const FIXTURES: &[&str] = &[
    "request-connect",
    "request-connect-priority",
    "connect-ready",
    "connect-complete",
    "ping",
];

/// Encode a message and parse the line back as plain JSON
fn encoded_value(message: &ControlMessage) -> Value {
    let line = message.encode().unwrap();
    assert_eq!(line.last(), Some(&b'\n'), "encoded line must end with a newline");
    assert_eq!(
        line.iter().filter(|b| **b == b'\n').count(),
        1,
        "encoded message must be a single line"
    );
    serde_json::from_slice(&line).unwrap()
}

#[test]
fn serialization_matches_committed_fixtures() {
    let regenerate = std::env::var("REGENERATE_FIXTURES").is_ok();

    for name in FIXTURES {
        let actual = encoded_value(&message_for(name));

        if regenerate {
            write_fixture(name, &actual);
        } else {
            assert_eq!(
                actual,
                load_fixture(name),
                "Wire format mismatch for fixture '{name}'. \
                 If intentional, run: REGENERATE_FIXTURES=1 cargo test --test wire_format"
            );
        }
    }
}

#[test]
fn fixtures_decode_to_their_messages() {
    for name in FIXTURES {
        let line = serde_json::to_vec(&load_fixture(name)).unwrap();
        let inbound = decode_line(&line).unwrap();

        // Only a `shard` field routes replies; PING's `shard_id` never rebinds
        let expected_shard = match message_for(name) {
            ControlMessage::Ping { .. } => None,
            message => Some(message.shard()),
        };
        assert_eq!(inbound.shard, expected_shard, "fixture '{name}'");
        match inbound.kind {
            InboundKind::Message(message) => assert_eq!(message, message_for(name)),
            other => panic!("Fixture '{name}' decoded to {other:?}"),
        }
    }
}

#[test]
fn every_fixture_uses_a_known_opcode() {
    for name in FIXTURES {
        let fixture = load_fixture(name);
        let op = fixture["op"]
            .as_str()
            .unwrap_or_else(|| panic!("Fixture '{name}' has non-string op"));
        assert!(
            OpCode::from_wire(op).is_some(),
            "Fixture '{name}' has unknown op '{op}'"
        );
    }
}

#[test]
fn request_without_priority_defaults_to_normal() {
    let inbound = decode_line(br#"{"op":"REQUEST_CONNECT","shard":7}"#).unwrap();
    match inbound.kind {
        InboundKind::Message(message) => {
            assert_eq!(message, ControlMessage::request_connect(7, false));
        }
        other => panic!("unexpected decode result {other:?}"),
    }
}

/// PING must keep `shard_id`, unlike every other message
#[test]
fn ping_uses_shard_id_key() {
    let fixture = load_fixture("ping");
    let obj = fixture.as_object().expect("ping fixture should be an object");
    assert!(obj.contains_key("shard_id"));
    assert!(!obj.contains_key("shard"));
}
