//! Messages moving through the relay and the identifiers attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Event name used for every mesh -> hub push.
pub const HUB_EVENT: &str = "message";

/// A Meshtastic node number.
///
/// Parsed from decimal (`42`), `0x` hex (`0x2a`) or the Meshtastic `!` form
/// (`!0000002a`). Displayed in decimal, which is how the message store keys
/// its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// `!xxxxxxxx` form used by Meshtastic clients.
    pub fn to_bang_hex(self) -> String {
        format!("!{:08x}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNodeIdError(pub String);

impl fmt::Display for ParseNodeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node id '{}'", self.0)
    }
}

impl std::error::Error for ParseNodeIdError {}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let parsed = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else if let Some(hex) = t.strip_prefix('!') {
            u32::from_str_radix(hex, 16)
        } else {
            t.parse::<u32>()
        };
        parsed.map(NodeId).map_err(|_| ParseNodeIdError(s.to_string()))
    }
}

/// Optional restriction of the relay to a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeScope(Option<NodeId>);

impl NodeScope {
    pub fn all() -> Self {
        NodeScope(None)
    }

    pub fn only(node: NodeId) -> Self {
        NodeScope(Some(node))
    }

    pub fn node(&self) -> Option<NodeId> {
        self.0
    }

    /// Outbound check: may a message for `node` be sent?
    pub fn allows(&self, node: NodeId) -> bool {
        self.0.map_or(true, |n| n == node)
    }

    /// Inbound check: was the packet sent by, or addressed to, the scoped node?
    pub fn allows_packet(&self, from: u32, to: u32) -> bool {
        self.0.map_or(true, |n| n.0 == from || n.0 == to)
    }
}

/// One record of the remote store's pending-message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(deserialize_with = "node_id_as_string")]
    pub node_id: String,
    pub message: String,
    #[serde(rename = "messageSent", default)]
    pub message_sent: bool,
}

// The store has been seen emitting node ids both as strings and as numbers.
fn node_id_as_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Identifier for a mesh -> hub message: hex SHA-256 over the text followed by
/// the arrival time as `<unix seconds>.<microseconds>`.
///
/// Not persisted anywhere, so a restarted relay cannot recognise messages it
/// already pushed.
pub fn message_id(text: &str, received_at: DateTime<Utc>) -> String {
    let stamp = format!(
        "{}.{:06}",
        received_at.timestamp(),
        received_at.timestamp_subsec_micros()
    );
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(stamp.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Payload pushed to the hub: `{ <id>: { "node_id": <n>, "message": <text> } }`.
pub fn hub_payload(id: &str, node: u32, text: &str) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(
        id.to_string(),
        serde_json::json!({ "node_id": node, "message": text }),
    );
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn node_id_accepts_all_notations() {
        assert_eq!("42".parse::<NodeId>().unwrap(), NodeId(42));
        assert_eq!("0x2a".parse::<NodeId>().unwrap(), NodeId(42));
        assert_eq!("!0000002a".parse::<NodeId>().unwrap(), NodeId(42));
        assert_eq!(" 42 ".parse::<NodeId>().unwrap(), NodeId(42));
        assert!("".parse::<NodeId>().is_err());
        assert!("node-7".parse::<NodeId>().is_err());
        assert!("4294967296".parse::<NodeId>().is_err());
        assert_eq!(NodeId(42).to_bang_hex(), "!0000002a");
    }

    #[test]
    fn scope_checks() {
        let any = NodeScope::all();
        assert!(any.allows(NodeId(1)));
        assert!(any.allows_packet(1, 0xffff_ffff));

        let only = NodeScope::only(NodeId(42));
        assert!(only.allows(NodeId(42)));
        assert!(!only.allows(NodeId(43)));
        assert!(only.allows_packet(42, 0xffff_ffff));
        assert!(only.allows_packet(7, 42));
        assert!(!only.allows_packet(7, 0xffff_ffff));
    }

    #[test]
    fn message_id_is_deterministic_per_text_and_time() {
        let t1 = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        let t2 = Utc.timestamp_opt(1_700_000_000, 123_457_000).unwrap();
        let a = message_id("hi", t1);
        assert_eq!(a, message_id("hi", t1));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, message_id("hi", t2));
        assert_ne!(a, message_id("ho", t1));
    }

    #[test]
    fn message_id_matches_sha256_of_text_and_stamp() {
        let t = Utc.timestamp_opt(10, 5_000).unwrap();
        let expected = format!("{:x}", Sha256::digest(b"pong10.000005"));
        assert_eq!(message_id("pong", t), expected);
    }

    #[test]
    fn pending_message_accepts_numeric_node_id() {
        let json = r#"[
            {"_id":"a1","node_id":"42","message":"hi","messageSent":false},
            {"_id":"a2","node_id":43,"message":"yo"}
        ]"#;
        let msgs: Vec<PendingMessage> = serde_json::from_str(json).unwrap();
        assert_eq!(msgs[0].node_id, "42");
        assert_eq!(msgs[1].node_id, "43");
        assert!(!msgs[1].message_sent);
    }

    #[test]
    fn hub_payload_shape() {
        let v = hub_payload("abc", 42, "pong");
        assert_eq!(v["abc"]["node_id"], 42);
        assert_eq!(v["abc"]["message"], "pong");
        assert_eq!(v.as_object().unwrap().len(), 1);
    }
}
