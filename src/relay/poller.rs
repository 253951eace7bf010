//! Store -> mesh path: one pass over the store's pending messages.

use log::{debug, error, info, warn};

use super::message::{NodeId, NodeScope};
use super::{MessageStore, RadioLink};
use crate::logutil::{preview, TEXT_PREVIEW_BYTES};

/// What one poll did. `link_broken` asks the loop to rebuild the radio session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub already_sent: usize,
    pub out_of_scope: usize,
    pub invalid: usize,
    pub delivered: usize,
    pub acknowledged: usize,
    pub send_failures: usize,
    pub ack_failures: usize,
    pub fetch_failed: bool,
    pub link_broken: bool,
}

pub struct QueuePoller {
    store: Box<dyn MessageStore>,
    scope: NodeScope,
}

impl QueuePoller {
    pub fn new(store: Box<dyn MessageStore>, scope: NodeScope) -> Self {
        Self { store, scope }
    }

    /// Deliver every unsent, in-scope message in store order and acknowledge
    /// each successful send.
    ///
    /// Failed fetches and acknowledgments leave the store untouched, so the
    /// message comes round again next cycle. A message whose send succeeded
    /// but whose ack failed is therefore sent again (at-least-once).
    pub async fn poll(&self, link: &mut dyn RadioLink) -> PollReport {
        let mut report = PollReport::default();
        let pending = match self.store.fetch_pending().await {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to fetch messages from store: {}", e);
                report.fetch_failed = true;
                return report;
            }
        };
        report.fetched = pending.len();

        for msg in pending {
            if msg.message_sent {
                report.already_sent += 1;
                continue;
            }
            let node = match msg.node_id.parse::<NodeId>() {
                Ok(n) => n,
                Err(e) => {
                    warn!("Skipping message {}: {}", msg.id, e);
                    report.invalid += 1;
                    continue;
                }
            };
            if !self.scope.allows(node) {
                debug!("Skipping message {} for node {}: outside node scope", msg.id, node);
                report.out_of_scope += 1;
                continue;
            }

            info!(
                "Sending message to node_id {}: {}",
                node,
                preview(&msg.message, TEXT_PREVIEW_BYTES)
            );
            if let Err(e) = link.send_text(node, &msg.message).await {
                error!("Failed to send message to node_id {}: {}", node, e);
                report.send_failures += 1;
                if e.is_transport() {
                    // Remaining messages stay pending for the next cycle.
                    report.link_broken = true;
                    break;
                }
                continue;
            }
            report.delivered += 1;

            match self.store.acknowledge(&msg.id).await {
                Ok(()) => {
                    info!("Successfully updated message status for _id {}", msg.id);
                    report.acknowledged += 1;
                }
                Err(e) => {
                    error!("Failed to update message status for _id {}: {}", msg.id, e);
                    report.ack_failures += 1;
                }
            }
        }
        report
    }
}
