//! The relay loop.
//!
//! Every cycle runs `CheckHub -> CheckRadio -> PollQueue -> sleep` in that
//! order. Reconnects are awaited in place, so at most one reconnect sequence
//! per channel is ever in flight.

use log::{debug, error, info, warn};
use std::future::Future;
use tokio::time::{sleep, Duration};

use super::hub::HubChannel;
use super::poller::{PollReport, QueuePoller};
use super::radio::RadioChannel;
use super::retry::RetryPolicy;
use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    /// Pause after each cycle.
    pub cycle_interval: Duration,
    /// Spacing of reachability re-probes while the radio host is down.
    pub probe_interval: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1),
            probe_interval: Duration::from_millis(100),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub hub_reconnected: bool,
    pub radio_reconnects: u32,
    /// Failed reachability probes before the radio host answered again.
    pub failed_probes: u32,
    /// `None` when no radio session was available to poll with.
    pub poll: Option<PollReport>,
}

pub struct Orchestrator {
    hub: HubChannel,
    radio: RadioChannel,
    poller: QueuePoller,
    timing: LoopTiming,
}

impl Orchestrator {
    pub fn new(hub: HubChannel, radio: RadioChannel, poller: QueuePoller, timing: LoopTiming) -> Self {
        Self {
            hub,
            radio,
            poller,
            timing,
        }
    }

    pub fn hub(&self) -> &HubChannel {
        &self.hub
    }

    pub fn radio(&self) -> &RadioChannel {
        &self.radio
    }

    pub fn timing(&self) -> LoopTiming {
        self.timing
    }

    /// Bring both channels up before the loop starts: the radio first under
    /// `radio_policy`, then the hub with its steady-state retry.
    ///
    /// Any error here is a startup failure.
    pub async fn start(&mut self, radio_policy: RetryPolicy) -> Result<(), RelayError> {
        self.radio
            .connect_with(radio_policy)
            .await
            .map_err(|e| RelayError::Startup(format!("radio {}: {}", self.radio.host(), e)))?;
        info!("Connecting to hub at {}", self.hub.endpoint());
        self.hub
            .connect()
            .await
            .map_err(|e| RelayError::Startup(format!("hub {}: {}", self.hub.endpoint(), e)))?;
        info!("Relay started");
        Ok(())
    }

    /// One pass through the state machine, without the trailing sleep.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        // CheckHub
        if !self.hub.connected() {
            warn!("Hub disconnected; reconnecting to {}", self.hub.endpoint());
            match self.hub.connect().await {
                Ok(()) => report.hub_reconnected = true,
                // Only reachable with a bounded reconnect policy.
                Err(e) => error!("Hub reconnect failed: {}", e),
            }
        }

        // CheckRadio: cheap reachability gate, then one full reconnect.
        if !self.radio.healthy().await {
            warn!("Radio host {} unreachable; waiting for it to return", self.radio.host());
            self.radio.mark_unreachable();
            let radio = &self.radio;
            let failed = RetryPolicy::unbounded(self.timing.probe_interval)
                .wait_until(move || async move { radio.healthy().await })
                .await
                .unwrap_or(0);
            report.failed_probes = failed + 1;
            info!(
                "Radio host {} reachable again after {} failed probe(s); reconnecting",
                self.radio.host(),
                report.failed_probes
            );
            self.radio.reconnect().await;
            report.radio_reconnects += 1;
        } else if self.radio.session_dead() {
            // Host answers probes but the device dropped our API session.
            warn!("Radio session with {} is dead; reconnecting", self.radio.host());
            self.radio.reconnect().await;
            report.radio_reconnects += 1;
        }

        // PollQueue
        let poll = match self.radio.link_mut() {
            Some(link) => Some(self.poller.poll(link).await),
            None => None,
        };
        match &poll {
            Some(p) if p.link_broken => {
                warn!("Radio session broke during poll; reconnecting");
                self.radio.reconnect().await;
                report.radio_reconnects += 1;
            }
            Some(p) => debug!("Poll finished: {:?}", p),
            None => {
                warn!("No radio session to poll with; reconnecting");
                self.radio.reconnect().await;
                report.radio_reconnects += 1;
            }
        }
        report.poll = poll;
        report
    }

    /// Run until `shutdown` resolves, then close both channels.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = self.cycle_and_sleep() => {}
            }
        }
        self.radio.close().await;
        self.hub.close().await;
        info!("Relay stopped");
    }

    /// Loop forever. There is no normal exit.
    pub async fn run(&mut self) {
        self.run_until(std::future::pending()).await
    }

    async fn cycle_and_sleep(&mut self) {
        let report = self.run_cycle().await;
        if report.hub_reconnected || report.radio_reconnects > 0 {
            info!(
                "Cycle recovered channels: hub_reconnected={} radio_reconnects={}",
                report.hub_reconnected, report.radio_reconnects
            );
        }
        sleep(self.timing.cycle_interval).await;
    }
}
