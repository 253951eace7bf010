//! Hub side of the relay: owns the current hub link and publishes it to readers.
//!
//! The link lives in a `watch` channel. The relay loop is the only writer; the
//! inbound radio handler holds receivers and publishes through whatever link is
//! current when a packet arrives.

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use super::{ChannelHealth, HubConnector, HubLink, RetryPolicy};
use crate::error::HubError;

pub type CurrentHub = watch::Receiver<Option<Arc<dyn HubLink>>>;

pub struct HubChannel {
    connector: Box<dyn HubConnector>,
    endpoint: String,
    reconnect: RetryPolicy,
    current: watch::Sender<Option<Arc<dyn HubLink>>>,
    health: ChannelHealth,
}

impl HubChannel {
    pub fn new(connector: Box<dyn HubConnector>, endpoint: String, reconnect: RetryPolicy) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            connector,
            endpoint,
            reconnect,
            current,
            health: ChannelHealth::Disconnected,
        }
    }

    /// Receiver that always yields the current link (or `None` while reconnecting).
    pub fn subscribe(&self) -> CurrentHub {
        self.current.subscribe()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn health(&self) -> ChannelHealth {
        self.health
    }

    fn set_health(&mut self, next: ChannelHealth) {
        if self.health != next {
            info!("Hub {}: {} -> {}", self.endpoint, self.health, next);
            self.health = next;
        }
    }

    /// Cheap status check used at the top of every relay cycle.
    pub fn connected(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .map_or(false, |link| link.connected())
    }

    /// Block until a fresh link reports connected.
    ///
    /// Any existing link is torn down before each attempt so a half-open
    /// transport is never carried into the next session.
    pub async fn connect(&mut self) -> Result<(), HubError> {
        self.set_health(ChannelHealth::Reconnecting);
        let connector = &*self.connector;
        let current = &self.current;
        let endpoint = self.endpoint.as_str();
        let result = self
            .reconnect
            .retry("Hub connection", move || async move {
                if let Some(stale) = current.send_replace(None) {
                    stale.close().await;
                }
                connector.connect(endpoint).await
            })
            .await;
        match result {
            Ok(link) => {
                self.current.send_replace(Some(link));
                self.set_health(ChannelHealth::Connected);
                Ok(())
            }
            Err(e) => {
                warn!("Hub connection gave up: {}", e);
                self.set_health(ChannelHealth::Disconnected);
                Err(e)
            }
        }
    }

    /// Push an event through the current link without waiting for delivery.
    pub fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), HubError> {
        let link = self.current.borrow().clone();
        match link {
            Some(link) => link.publish(event, payload),
            None => Err(HubError::NotConnected),
        }
    }

    pub async fn close(&mut self) {
        if let Some(link) = self.current.send_replace(None) {
            link.close().await;
        }
        self.set_health(ChannelHealth::Disconnected);
    }
}
