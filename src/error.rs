//! Error types for the relay.
//!
//! Every error knows its [`FailureClass`]. Transient classes are absorbed by the
//! relay loop, which logs them and retries or reconnects. Only `FatalStartup`
//! ever reaches the binary's exit path.

use thiserror::Error;

/// How the relay reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Radio or hub unreachable; retried forever at a fixed interval.
    TransientConnect,
    /// A single send, publish or store call failed; logged, not retried in that call.
    TransientSend,
    /// Failure before the relay loop starts; the process exits with status 1.
    FatalStartup,
}

/// Errors from the Meshtastic device session.
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("failed to connect to radio at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to radio at {0}")]
    ConnectTimeout(String),

    #[error("radio transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("radio session is closed")]
    Closed,

    #[error("invalid destination node '{0}'")]
    InvalidDestination(String),

    #[error("text payload too large ({len} bytes, max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

impl RadioError {
    /// True when the session itself is unusable and must be rebuilt.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RadioError::Io(_)
                | RadioError::Closed
                | RadioError::Connect { .. }
                | RadioError::ConnectTimeout(_)
        )
    }

    pub fn class(&self) -> FailureClass {
        match self {
            RadioError::Connect { .. } | RadioError::ConnectTimeout(_) => {
                FailureClass::TransientConnect
            }
            _ => FailureClass::TransientSend,
        }
    }
}

/// Errors from the Socket.IO hub transport.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid hub endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("hub handshake failed: {0}")]
    Handshake(String),

    #[error("hub handshake timed out after {0}s")]
    HandshakeTimeout(u64),

    #[error("hub is not connected")]
    NotConnected,

    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HubError {
    pub fn class(&self) -> FailureClass {
        match self {
            HubError::NotConnected | HubError::Json(_) => FailureClass::TransientSend,
            _ => FailureClass::TransientConnect,
        }
    }
}

/// Errors from the HTTP message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

impl StoreError {
    pub fn class(&self) -> FailureClass {
        FailureClass::TransientSend
    }
}

/// Configuration problems detected while loading or validating.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid node id '{0}' (expected decimal, 0xHEX or !hex)")]
    InvalidNodeId(String),

    #[error("invalid URL for {name}: '{value}'")]
    InvalidUrl { name: &'static str, value: String },
}

/// Top-level result type of the relay. Steady-state errors never reach it.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("radio unavailable at startup: {0}")]
    Radio(#[from] RadioError),

    #[error("store client setup failed: {0}")]
    Store(#[from] StoreError),
}

impl RelayError {
    pub fn class(&self) -> FailureClass {
        FailureClass::FatalStartup
    }
}
