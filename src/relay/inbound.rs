//! Mesh -> hub path.
//!
//! Runs on the radio session's reader task, concurrently with the relay loop.
//! It only filters, tags and hands the message to the current hub link; it
//! never blocks and never touches loop-owned state.

use log::{debug, info, warn};
use std::sync::Arc;

use super::hub::CurrentHub;
use super::message::{hub_payload, message_id, NodeScope, HUB_EVENT};
use crate::logutil::{preview, TEXT_PREVIEW_BYTES};
use crate::meshtastic::{TextEvent, TextEventHandler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Published { id: String },
    OutOfScope,
    HubUnavailable,
    PublishFailed,
}

pub struct InboundRelay {
    scope: NodeScope,
    hub: CurrentHub,
}

impl InboundRelay {
    pub fn new(scope: NodeScope, hub: CurrentHub) -> Self {
        Self { scope, hub }
    }

    pub fn handle(&self, event: &TextEvent) -> InboundOutcome {
        if !self.scope.allows_packet(event.source, event.dest) {
            debug!(
                "Dropping message from {} to {}: outside node scope",
                event.source, event.dest
            );
            return InboundOutcome::OutOfScope;
        }

        let id = message_id(&event.content, event.received_at);
        info!(
            "Received message from {}: {}",
            event.source,
            preview(&event.content, TEXT_PREVIEW_BYTES)
        );

        // Clone out of the watch guard so the publish never holds the lock.
        let link = self.hub.borrow().clone();
        let Some(link) = link else {
            warn!("No hub link; message {} from {} dropped", id, event.source);
            return InboundOutcome::HubUnavailable;
        };
        match link.publish(HUB_EVENT, hub_payload(&id, event.source, &event.content)) {
            Ok(()) => InboundOutcome::Published { id },
            Err(e) => {
                warn!("Failed to push message {} to hub: {}", id, e);
                InboundOutcome::PublishFailed
            }
        }
    }

    /// Wrap into the callback form the radio connector registers.
    pub fn into_handler(self) -> TextEventHandler {
        Arc::new(move |event: TextEvent| {
            self.handle(&event);
        })
    }
}
