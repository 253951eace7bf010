//! # Relay core
//!
//! The resilience-and-relay loop: three independently failing channels driven
//! by one [`Orchestrator`].
//!
//! ```text
//!   mesh ──► RadioChannel ──(InboundRelay: scope, id)──► HubChannel ──► hub
//!   store ──► QueuePoller ──► RadioChannel.send ──► store ack
//! ```
//!
//! The channel seams are traits so the loop can be exercised without radios,
//! hubs or HTTP servers:
//!
//! - [`RadioConnector`] / [`RadioLink`]: Meshtastic session (see [`crate::meshtastic`])
//! - [`HubConnector`] / [`HubLink`]: Socket.IO hub (see [`crate::hub`])
//! - [`MessageStore`]: HTTP store of outbound messages (see [`crate::store`])

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::time::Duration;

use crate::config::Config;
use crate::error::{HubError, RadioError, RelayError, StoreError};
use crate::hub::SocketIoConnector;
use crate::meshtastic::TcpRadioConnector;
use crate::store::HttpStore;

pub mod hub;
pub mod inbound;
pub mod message;
pub mod orchestrator;
pub mod poller;
pub mod radio;
pub mod retry;

pub use hub::HubChannel;
pub use inbound::{InboundOutcome, InboundRelay};
pub use message::{hub_payload, message_id, NodeId, NodeScope, PendingMessage, HUB_EVENT};
pub use orchestrator::{CycleReport, LoopTiming, Orchestrator};
pub use poller::{PollReport, QueuePoller};
pub use radio::RadioChannel;
pub use retry::RetryPolicy;

/// Per-channel connection state as seen by the relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    Connected,
    Disconnected,
    Reconnecting,
}

impl fmt::Display for ChannelHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelHealth::Connected => "connected",
            ChannelHealth::Disconnected => "disconnected",
            ChannelHealth::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// An open session with the mesh radio.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Best-effort text send. Never retried internally.
    async fn send_text(&mut self, dest: NodeId, text: &str) -> Result<(), RadioError>;

    /// False once the transport has seen EOF or an error, or after `close`.
    fn is_alive(&self) -> bool;

    /// Release the session. Calling it again is a no-op.
    async fn close(&mut self);
}

/// Opens radio sessions and probes the radio host.
///
/// The inbound text callback is registered when the connector is built and
/// handed to every session it opens.
#[async_trait]
pub trait RadioConnector: Send + Sync {
    /// One connection attempt.
    async fn connect(&self, host: &str) -> Result<Box<dyn RadioLink>, RadioError>;

    /// Network-level reachability of the radio host, independent of any session.
    async fn reachable(&self, host: &str) -> bool;
}

/// An open hub transport.
#[async_trait]
pub trait HubLink: Send + Sync {
    /// Cheap, non-blocking transport state.
    fn connected(&self) -> bool;

    /// Fire-and-forget event push.
    fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), HubError>;

    async fn close(&self);
}

#[async_trait]
pub trait HubConnector: Send + Sync {
    /// One connection attempt; resolves once the transport reports connected.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn HubLink>, HubError>;
}

/// Remote store of messages waiting to go out over the mesh.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch_pending(&self) -> Result<Vec<PendingMessage>, StoreError>;

    /// Tell the store the message with store id `id` was delivered.
    async fn acknowledge(&self, id: &str) -> Result<(), StoreError>;
}

/// Policy for the first radio session: a single attempt when the radio is
/// required at startup, otherwise the steady-state unbounded retry.
pub fn startup_policy(config: &Config) -> RetryPolicy {
    if config.radio.require_at_startup {
        RetryPolicy::once()
    } else {
        RetryPolicy::unbounded(Duration::from_secs(config.relay.reconnect_backoff_secs))
    }
}

/// Wire the production channels together from configuration.
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator, RelayError> {
    config.validate()?;
    let scope = config.node_scope()?;
    let reconnect = RetryPolicy::unbounded(Duration::from_secs(config.relay.reconnect_backoff_secs));

    let hub = HubChannel::new(
        Box::new(SocketIoConnector::new(Duration::from_secs(
            config.hub.handshake_timeout_secs,
        ))),
        config.hub.server.clone(),
        reconnect,
    );

    // The inbound callback reads whichever hub link is current at delivery time.
    let inbound = InboundRelay::new(scope, hub.subscribe());
    let connector = TcpRadioConnector::new(inbound.into_handler(), config.radio.probe)
        .with_connect_timeout(Duration::from_secs(config.radio.connect_timeout_secs))
        .with_heartbeat(Duration::from_secs(config.radio.heartbeat_secs));
    let radio = RadioChannel::new(Box::new(connector), config.radio.hostname.clone(), reconnect);

    let store = HttpStore::new(
        config.store.api_url.clone(),
        config.ack_url().to_string(),
        Duration::from_secs(config.store.request_timeout_secs),
    )?;
    let poller = QueuePoller::new(Box::new(store), scope);

    Ok(Orchestrator::new(
        hub,
        radio,
        poller,
        LoopTiming {
            cycle_interval: Duration::from_millis(config.relay.cycle_interval_ms),
            probe_interval: Duration::from_millis(config.relay.probe_interval_ms),
        },
    ))
}
