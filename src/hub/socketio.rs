//! Minimal Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Only what a single-namespace emitter needs: open, ping/pong, close,
//! namespace connect/disconnect and `EVENT` packets. Binary attachments and
//! acknowledgements are not produced; on input their prefixes are skipped.

use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::HubError;

/// Engine.IO pong, sent in answer to every ping.
pub const PONG: &str = "3";
/// Connect to the default namespace.
pub const CONNECT: &str = "40";
/// Leave the default namespace.
pub const DISCONNECT: &str = "41";

/// Engine.IO packet, as carried in one websocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Value),
    Close,
    Ping,
    Pong,
    /// Socket.IO packet body (everything after the leading `4`).
    Message(String),
    Upgrade,
    Noop,
}

/// Engine.IO v4 defaults, used when the open packet omits them.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

/// How long the session may stay silent before the hub counts as gone:
/// `pingInterval + pingTimeout` from the open packet.
pub fn liveness_budget(open: &Value) -> Duration {
    let field = |name: &str, default: u64| open.get(name).and_then(Value::as_u64).unwrap_or(default);
    Duration::from_millis(
        field("pingInterval", DEFAULT_PING_INTERVAL_MS)
            .saturating_add(field("pingTimeout", DEFAULT_PING_TIMEOUT_MS)),
    )
}

pub fn parse_engine(frame: &str) -> Option<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars.next()?;
    let rest = chars.as_str();
    Some(match kind {
        '0' => EnginePacket::Open(serde_json::from_str(rest).ok()?),
        '1' => EnginePacket::Close,
        '2' => EnginePacket::Ping,
        '3' => EnginePacket::Pong,
        '4' => EnginePacket::Message(rest.to_string()),
        '5' => EnginePacket::Upgrade,
        '6' => EnginePacket::Noop,
        _ => return None,
    })
}

/// Socket.IO packet in the default namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { sid: Option<String> },
    Disconnect,
    Event { name: String, args: Vec<Value> },
    Ack,
    ConnectError(Value),
}

pub fn parse_socket(body: &str) -> Option<SocketPacket> {
    let mut chars = body.chars();
    let kind = chars.next()?;
    let mut rest = chars.as_str();

    // Binary attachment count: "<n>-"
    if kind == '5' || kind == '6' {
        let (_, after) = rest.split_once('-')?;
        rest = after;
    }
    // Namespace: "/nsp,"
    if rest.starts_with('/') {
        rest = match rest.split_once(',') {
            Some((_, after)) => after,
            None => "",
        };
    }
    // Ack id
    rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let data: Option<Value> = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str(rest).ok()?)
    };

    Some(match kind {
        '0' => SocketPacket::Connect {
            sid: data
                .as_ref()
                .and_then(|d| d.get("sid"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        '1' => SocketPacket::Disconnect,
        '2' | '5' => {
            let mut args = match data? {
                Value::Array(a) => a,
                _ => return None,
            };
            if args.is_empty() {
                return None;
            }
            let name = match args.remove(0) {
                Value::String(s) => s,
                _ => return None,
            };
            SocketPacket::Event { name, args }
        }
        '3' | '6' => SocketPacket::Ack,
        '4' => SocketPacket::ConnectError(data.unwrap_or(Value::Null)),
        _ => return None,
    })
}

/// `42["<event>",<payload>]`
pub fn encode_event(event: &str, payload: &Value) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(&Value::Array(vec![
        Value::String(event.to_string()),
        payload.clone(),
    ]))?;
    Ok(format!("42{}", body))
}

/// Websocket URL of the Engine.IO endpoint behind a hub address.
///
/// `http(s)` becomes `ws(s)`. An empty path becomes `/socket.io/`; any other
/// path is kept as the server's custom Socket.IO path.
pub fn websocket_url(endpoint: &str) -> Result<Url, HubError> {
    let invalid = || HubError::InvalidEndpoint(endpoint.to_string());
    let mut url = Url::parse(endpoint.trim()).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|_| invalid())?;
    if url.host_str().is_none() {
        return Err(invalid());
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    let has = |key: &str| url.query_pairs().any(|(k, _)| k == key);
    let (has_eio, has_transport) = (has("EIO"), has("transport"));
    {
        let mut q = url.query_pairs_mut();
        if !has_eio {
            q.append_pair("EIO", "4");
        }
        if !has_transport {
            q.append_pair("transport", "websocket");
        }
    }
    Ok(url)
}
