//! Network-level reachability of the radio host, independent of any session.

use log::trace;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::{host_only, radio_addr};

const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// One ICMP echo via the system `ping` (`-c 1 -W 1`).
    #[default]
    Icmp,
    /// A TCP connect to the radio API port with a one second timeout.
    Tcp,
}

impl ProbeKind {
    pub async fn reachable(self, host: &str) -> bool {
        let ok = match self {
            ProbeKind::Icmp => ping_once(host_only(host)).await,
            ProbeKind::Tcp => tcp_connect(&radio_addr(host)).await,
        };
        trace!("probe {:?} {} -> {}", self, host, ok);
        ok
    }
}

async fn ping_once(host: &str) -> bool {
    Command::new("ping")
        .args(["-c", "1", "-W", "1", host])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn tcp_connect(addr: &str) -> bool {
    matches!(
        timeout(TCP_PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
