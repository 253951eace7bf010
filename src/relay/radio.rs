//! Radio side of the relay: owns the current session and replaces it on reconnect.

use log::{info, warn};

use super::{ChannelHealth, RadioConnector, RadioLink, RetryPolicy};
use crate::error::RadioError;

pub struct RadioChannel {
    connector: Box<dyn RadioConnector>,
    host: String,
    reconnect: RetryPolicy,
    link: Option<Box<dyn RadioLink>>,
    health: ChannelHealth,
}

impl RadioChannel {
    pub fn new(connector: Box<dyn RadioConnector>, host: String, reconnect: RetryPolicy) -> Self {
        Self {
            connector,
            host,
            reconnect,
            link: None,
            health: ChannelHealth::Disconnected,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn health(&self) -> ChannelHealth {
        self.health
    }

    fn set_health(&mut self, next: ChannelHealth) {
        if self.health != next {
            info!("Radio {}: {} -> {}", self.host, self.health, next);
            self.health = next;
        }
    }

    /// Reachability probe against the radio host.
    pub async fn healthy(&self) -> bool {
        self.connector.reachable(&self.host).await
    }

    /// Record that the host stopped answering probes.
    pub fn mark_unreachable(&mut self) {
        self.set_health(ChannelHealth::Disconnected);
    }

    /// True when a session exists but its transport has reported it gone.
    pub fn session_dead(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.is_alive())
    }

    pub fn link_mut(&mut self) -> Option<&mut (dyn RadioLink + 'static)> {
        self.link.as_deref_mut()
    }

    /// Open a session under `policy`, replacing any current one.
    pub async fn connect_with(&mut self, policy: RetryPolicy) -> Result<(), RadioError> {
        self.close().await;
        self.set_health(ChannelHealth::Reconnecting);
        let connector = &*self.connector;
        let host = self.host.as_str();
        info!("Connecting to Meshtastic device at {}", host);
        let result = policy
            .retry("Radio connection", move || async move {
                connector.connect(host).await
            })
            .await;
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.set_health(ChannelHealth::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_health(ChannelHealth::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the current session and open a fresh one, retrying at the
    /// reconnect interval until the device accepts.
    pub async fn reconnect(&mut self) {
        let policy = self.reconnect;
        if let Err(e) = self.connect_with(policy).await {
            // Only reachable with a bounded reconnect policy.
            warn!("Radio reconnect gave up: {}", e);
        }
    }

    /// Release the current session, if any.
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
            self.set_health(ChannelHealth::Disconnected);
        }
    }
}
