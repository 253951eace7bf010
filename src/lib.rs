//! # Meshrelay - Meshtastic mesh to cloud hub relay
//!
//! Meshrelay moves short text messages in both directions between a local
//! Meshtastic mesh and the cloud:
//!
//! - **Mesh -> hub**: text packets heard by the radio are tagged with an id and
//!   pushed to a Socket.IO hub as they arrive.
//! - **Store -> mesh**: messages queued in an HTTP message store are sent over
//!   the radio and acknowledged back to the store.
//!
//! Radio, hub and store fail independently. One relay loop watches the radio
//! and the hub, reconnects whichever one dropped, and polls the store once per
//! cycle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshrelay::config::Config;
//! use meshrelay::relay::{build_orchestrator, startup_policy};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_or_default("meshrelay.toml").await?;
//!     config.apply_env();
//!
//!     let mut relay = build_orchestrator(&config)?;
//!     relay.start(startup_policy(&config)).await?;
//!     relay.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`relay`] - The relay loop, the channel traits and the message model
//! - [`meshtastic`] - Meshtastic TCP client (framing, session, reachability probe)
//! - [`hub`] - Socket.IO client for the cloud hub
//! - [`store`] - HTTP client for the message store
//! - [`config`] - Configuration file and environment overrides
//! - [`error`] - Error types and their failure classes
//! - [`protobuf`] - Generated Meshtastic protobuf types
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐
//!   mesh ◄──►│ RadioChannel │──── inbound text ────┐
//!            └──────────────┘                      ▼
//!                   ▲                       ┌────────────┐
//!                   │ send                  │ HubChannel │──► hub
//!            ┌──────────────┐               └────────────┘
//!  store ◄──►│ QueuePoller  │
//!            └──────────────┘
//!        all driven by one Orchestrator loop
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod logutil;
pub mod meshtastic;
pub mod protobuf;
pub mod relay;
pub mod store;
