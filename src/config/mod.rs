//! # Configuration Management Module
//!
//! Settings for the relay, loaded from a TOML file and then overridden by
//! environment variables.
//!
//! ## Configuration Structure
//!
//! - [`RadioConfig`] - Meshtastic device host, node scoping and session tuning
//! - [`HubConfig`] - Socket.IO hub endpoint
//! - [`StoreConfig`] - HTTP message store endpoints
//! - [`RelayConfig`] - Loop timing and reconnect interval
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshrelay::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_or_default("meshrelay.toml").await?;
//!     config.apply_env();
//!     config.validate()?;
//!     println!("Radio: {}", config.radio.hostname);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [radio]
//! hostname = "192.168.1.20"
//! node_id = ""            # empty relays every node
//! require_at_startup = true
//! probe = "icmp"          # or "tcp"
//!
//! [hub]
//! server = "https://hub.example.com"
//!
//! [store]
//! api_url = "https://store.example.com/api/sms"
//!
//! [relay]
//! cycle_interval_ms = 1000
//! probe_interval_ms = 100
//! reconnect_backoff_secs = 5
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## Environment Integration
//!
//! Precedence: environment > config file > defaults. The variables are
//! `MESHTASTIC_HOSTNAME`, `WS_HUB_SERVER`, `API_URL`, `NODE_ID` and `ACK_URL`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::error::ConfigError;
use crate::hub::socketio::websocket_url;
use crate::meshtastic::ProbeKind;
use crate::relay::{NodeId, NodeScope};

pub const ENV_HOSTNAME: &str = "MESHTASTIC_HOSTNAME";
pub const ENV_HUB_SERVER: &str = "WS_HUB_SERVER";
pub const ENV_API_URL: &str = "API_URL";
pub const ENV_NODE_ID: &str = "NODE_ID";
pub const ENV_ACK_URL: &str = "ACK_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Device host, optionally with `:port` (default port 4403).
    #[serde(default)]
    pub hostname: String,
    /// Restrict the relay to one node. Empty relays every node.
    #[serde(default)]
    pub node_id: String,
    /// Exit with an error when the device cannot be reached at startup.
    /// When false, startup keeps retrying like a steady-state reconnect.
    #[serde(default = "default_true")]
    pub require_at_startup: bool,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Heartbeat period keeping the TCP API session open.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub api_url: String,
    /// Acknowledgment endpoint; `api_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_secs() -> u64 {
    300
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_cycle_interval_ms() -> u64 {
    1000
}

fn default_probe_interval_ms() -> u64 {
    100
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            node_id: String::new(),
            require_at_startup: true,
            probe: ProbeKind::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            ack_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Load `path` if it exists, otherwise start from defaults (env-only setups).
    pub async fn load_or_default(path: &str) -> Result<Self, ConfigError> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get(ENV_HOSTNAME) {
            self.radio.hostname = v;
        }
        if let Some(v) = get(ENV_HUB_SERVER) {
            self.hub.server = v;
        }
        if let Some(v) = get(ENV_API_URL) {
            self.store.api_url = v;
        }
        if let Some(v) = get(ENV_NODE_ID) {
            self.radio.node_id = v;
        }
        if let Some(v) = get(ENV_ACK_URL) {
            self.store.ack_url = Some(v);
        }
    }

    /// Where acknowledgments are sent.
    pub fn ack_url(&self) -> &str {
        self.store
            .ack_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(self.store.api_url.as_str())
    }

    pub fn node_scope(&self) -> Result<NodeScope, ConfigError> {
        let raw = self.radio.node_id.trim();
        if raw.is_empty() {
            return Ok(NodeScope::all());
        }
        raw.parse::<NodeId>()
            .map(NodeScope::only)
            .map_err(|_| ConfigError::InvalidNodeId(raw.to_string()))
    }

    /// Check everything the relay needs before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radio.hostname.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_HOSTNAME));
        }
        if self.hub.server.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_HUB_SERVER));
        }
        if self.store.api_url.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_API_URL));
        }
        websocket_url(&self.hub.server).map_err(|_| ConfigError::InvalidUrl {
            name: ENV_HUB_SERVER,
            value: self.hub.server.clone(),
        })?;
        check_http_url(ENV_API_URL, &self.store.api_url)?;
        check_http_url(ENV_ACK_URL, self.ack_url())?;
        self.node_scope()?;
        Ok(())
    }
}

fn check_http_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => Ok(()),
        _ => Err(ConfigError::InvalidUrl {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> Config {
        let mut config = Config::default();
        config.radio.hostname = "192.168.1.20".to_string();
        config.hub.server = "https://hub.example.com".to_string();
        config.store.api_url = "https://store.example.com/api/sms".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.radio.require_at_startup);
        assert_eq!(config.radio.probe, ProbeKind::Icmp);
        assert_eq!(config.radio.heartbeat_secs, 300);
        assert_eq!(config.relay.cycle_interval_ms, 1000);
        assert_eq!(config.relay.probe_interval_ms, 100);
        assert_eq!(config.relay.reconnect_backoff_secs, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [radio]
            hostname = "radio.lan"
            probe = "tcp"

            [relay]
            cycle_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.radio.hostname, "radio.lan");
        assert_eq!(config.radio.probe, ProbeKind::Tcp);
        assert_eq!(config.relay.cycle_interval_ms, 250);
        assert_eq!(config.relay.probe_interval_ms, 100);
        assert_eq!(config.hub.handshake_timeout_secs, 10);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = complete();
        let env: HashMap<&str, &str> = [
            (ENV_HOSTNAME, "10.0.0.9:4403"),
            (ENV_NODE_ID, "!0000002a"),
            (ENV_API_URL, "  "),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.radio.hostname, "10.0.0.9:4403");
        assert_eq!(config.node_scope().unwrap(), NodeScope::only(NodeId(42)));
        // blank values do not clobber the file
        assert_eq!(config.store.api_url, "https://store.example.com/api/sms");
    }

    #[test]
    fn test_ack_url_defaults_to_api_url() {
        let mut config = complete();
        assert_eq!(config.ack_url(), "https://store.example.com/api/sms");
        config.store.ack_url = Some("https://store.example.com/api/ack".to_string());
        assert_eq!(config.ack_url(), "https://store.example.com/api/ack");
    }

    #[test]
    fn test_validate_reports_missing_endpoints() {
        let mut config = complete();
        assert!(config.validate().is_ok());
        config.hub.server.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing(ENV_HUB_SERVER))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_node_and_urls() {
        let mut config = complete();
        config.radio.node_id = "node-seven".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNodeId(_))
        ));

        let mut config = complete();
        config.store.api_url = "store.example.com/api".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { name: ENV_API_URL, .. })
        ));

        let mut config = complete();
        config.hub.server = "ftp://hub".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { name: ENV_HUB_SERVER, .. })
        ));
    }

    #[test]
    fn test_empty_node_id_relays_everything() {
        assert_eq!(complete().node_scope().unwrap(), NodeScope::all());
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshrelay.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.relay.reconnect_backoff_secs, 5);
        assert!(loaded.radio.hostname.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load_or_default(path.to_str().unwrap()).await.unwrap();
        assert!(config.store.api_url.is_empty());
        assert!(Config::load(path.to_str().unwrap()).await.is_err());
    }
}
