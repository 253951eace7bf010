//! # Meshtastic Device Communication Module
//!
//! A TCP client for the Meshtastic device API (port 4403), covering what the
//! relay needs and nothing more:
//!
//! - start a session with `want_config_id` and learn our node number
//! - decode inbound `TEXT_MESSAGE_APP` packets into [`TextEvent`]s
//! - send direct text messages
//! - keep the session alive with periodic heartbeats
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshrelay::meshtastic::{TcpRadio, TextEvent};
//! use meshrelay::relay::NodeId;
//! use tokio::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let handler = Arc::new(|ev: TextEvent| println!("{}: {}", ev.source, ev.content));
//!     let mut radio = TcpRadio::connect(
//!         "192.168.1.20",
//!         handler,
//!         Duration::from_secs(10),
//!         Duration::from_secs(300),
//!     )
//!     .await?;
//!     radio.send_text(NodeId(42), "hello mesh").await?;
//!     radio.close().await;
//!     Ok(())
//! }
//! ```
//!
//! Inbound packets are handled on the session's reader task. The registered
//! handler is called inline there, so it must return quickly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use prost::Message;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, MissedTickBehavior};

use crate::error::RadioError;
use crate::logutil::{hex_snippet, preview, TEXT_PREVIEW_BYTES};
use crate::protobuf::meshtastic_generated as proto;
use crate::relay::{NodeId, RadioConnector, RadioLink};

pub mod framer;
pub mod probe;

pub use framer::{encode_frame, StreamFramer};
pub use probe::ProbeKind;

/// TCP port of the Meshtastic client API.
pub const DEFAULT_TCP_PORT: u16 = 4403;

/// Destination meaning "every node".
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// Largest text payload the firmware accepts in one `Data` message.
pub const MAX_TEXT_BYTES: usize = 233;

const HOP_LIMIT: u32 = 3;

/// A text message received from the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    pub source: u32,
    pub dest: u32,
    pub channel: u32,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl TextEvent {
    pub fn is_broadcast(&self) -> bool {
        self.dest == BROADCAST_ADDR
    }
}

/// Callback invoked on the reader task for each inbound text message.
pub type TextEventHandler = Arc<dyn Fn(TextEvent) + Send + Sync>;

/// Something decoded from a `FromRadio` frame that the session cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    MyInfo { node: u32 },
    ConfigComplete { id: u32 },
    Rebooted,
    Text(TextEvent),
    /// Any other mesh packet, kept only for trace logging.
    Packet { from: u32, portnum: i32 },
}

/// `host:port` to dial for a configured radio host. A bare host gets the
/// default API port.
pub fn radio_addr(host: &str) -> String {
    let host = host.trim();
    if host.parse::<SocketAddr>().is_ok() {
        return host.to_string();
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if !name.contains(':') && port.parse::<u16>().is_ok() {
            return host.to_string();
        }
    }
    if host.contains(':') && !host.starts_with('[') {
        // Bare IPv6 literal.
        return format!("[{}]:{}", host, DEFAULT_TCP_PORT);
    }
    format!("{}:{}", host, DEFAULT_TCP_PORT)
}

/// The host part of a configured radio host, for tools that take no port.
pub fn host_only(host: &str) -> &str {
    let host = host.trim();
    if let Ok(addr) = host.parse::<SocketAddr>() {
        if addr.is_ipv6() {
            return host
                .trim_start_matches('[')
                .split(']')
                .next()
                .unwrap_or(host);
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
        _ => host,
    }
}

/// Decode one `FromRadio` frame payload.
pub fn parse_from_radio(frame: &[u8]) -> Option<RadioEvent> {
    use proto::from_radio::PayloadVariant as FRPayload;
    use proto::mesh_packet::PayloadVariant as MPPayload;

    let msg = match proto::FromRadio::decode(frame) {
        Ok(m) => m,
        Err(e) => {
            debug!("Undecodable FromRadio frame ({}): {}", e, hex_snippet(frame, 32));
            return None;
        }
    };
    match msg.payload_variant? {
        FRPayload::MyInfo(info) => Some(RadioEvent::MyInfo {
            node: info.my_node_num,
        }),
        FRPayload::ConfigCompleteId(id) => Some(RadioEvent::ConfigComplete { id }),
        FRPayload::Rebooted(_) => Some(RadioEvent::Rebooted),
        FRPayload::Packet(pkt) => match pkt.payload_variant {
            Some(MPPayload::Decoded(data))
                if data.portnum == proto::PortNum::TextMessageApp as i32 =>
            {
                match std::str::from_utf8(&data.payload) {
                    Ok(text) => Some(RadioEvent::Text(TextEvent {
                        source: pkt.from,
                        dest: pkt.to,
                        channel: pkt.channel,
                        content: text.to_string(),
                        received_at: Utc::now(),
                    })),
                    Err(_) => {
                        debug!("Dropping non-UTF-8 text packet from 0x{:08x}", pkt.from);
                        None
                    }
                }
            }
            Some(MPPayload::Decoded(data)) => Some(RadioEvent::Packet {
                from: pkt.from,
                portnum: data.portnum,
            }),
            // Encrypted for a channel we do not hold the key for.
            _ => None,
        },
    }
}

fn encode_toradio(msg: &proto::ToRadio) -> Result<Vec<u8>, RadioError> {
    let mut payload = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut payload)?;
    let len = payload.len();
    encode_frame(&payload).ok_or(RadioError::PayloadTooLarge {
        len,
        max: framer::MAX_FRAME_PAYLOAD,
    })
}

async fn write_toradio(
    writer: &Mutex<OwnedWriteHalf>,
    msg: &proto::ToRadio,
) -> Result<(), RadioError> {
    let frame = encode_toradio(msg)?;
    let mut w = writer.lock().await;
    w.write_all(&frame).await?;
    w.flush().await?;
    trace!("Sent ToRadio frame ({} bytes)", frame.len());
    Ok(())
}

fn nonzero_id() -> u32 {
    rand::thread_rng().gen_range(1..=u32::MAX)
}

struct SessionState {
    our_node: AtomicU32,
    alive: AtomicBool,
}

/// An open TCP session with a Meshtastic device.
pub struct TcpRadio {
    addr: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    state: Arc<SessionState>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
    closed: bool,
}

impl TcpRadio {
    /// Dial the device, request its config stream and start the reader and
    /// heartbeat tasks.
    pub async fn connect(
        host: &str,
        handler: TextEventHandler,
        connect_timeout: Duration,
        heartbeat_every: Duration,
    ) -> Result<Self, RadioError> {
        let addr = radio_addr(host);
        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(source)) => return Err(RadioError::Connect { addr, source }),
            Err(_) => return Err(RadioError::ConnectTimeout(addr)),
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed on {}: {}", addr, e);
        }
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let state = Arc::new(SessionState {
            our_node: AtomicU32::new(0),
            alive: AtomicBool::new(true),
        });

        let config_id = nonzero_id();
        write_toradio(
            &writer,
            &proto::ToRadio {
                payload_variant: Some(proto::to_radio::PayloadVariant::WantConfigId(config_id)),
            },
        )
        .await?;
        debug!("Requested config from {} (id=0x{:08x})", addr, config_id);

        let reader = tokio::spawn(read_loop(
            read_half,
            addr.clone(),
            state.clone(),
            handler,
        ));
        let heartbeat = tokio::spawn(heartbeat_loop(
            writer.clone(),
            state.clone(),
            heartbeat_every,
        ));
        info!("Connected to Meshtastic device at {}", addr);

        Ok(Self {
            addr,
            writer,
            state,
            reader,
            heartbeat,
            closed: false,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Our node number, once the device has sent `my_info`.
    pub fn our_node_id(&self) -> Option<u32> {
        match self.state.our_node.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// False once the reader has seen EOF or an error, or after `close`.
    pub fn is_alive(&self) -> bool {
        !self.closed && self.state.alive.load(Ordering::Relaxed)
    }

    /// Send a direct text message. The firmware fills in `from` when it is zero.
    pub async fn send_text(&mut self, dest: NodeId, text: &str) -> Result<(), RadioError> {
        use proto::mesh_packet::PayloadVariant as MPPayload;
        use proto::to_radio::PayloadVariant as TRPayload;

        if !self.is_alive() {
            return Err(RadioError::Closed);
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(RadioError::PayloadTooLarge {
                len: text.len(),
                max: MAX_TEXT_BYTES,
            });
        }
        let packet_id = nonzero_id();
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageApp as i32,
            payload: text.as_bytes().to_vec().into(),
            ..Default::default()
        };
        let pkt = proto::MeshPacket {
            from: self.state.our_node.load(Ordering::Relaxed),
            to: dest.0,
            payload_variant: Some(MPPayload::Decoded(data)),
            id: packet_id,
            hop_limit: HOP_LIMIT,
            want_ack: true,
            priority: proto::mesh_packet::Priority::Reliable as i32,
            ..Default::default()
        };
        let msg = proto::ToRadio {
            payload_variant: Some(TRPayload::Packet(pkt)),
        };
        write_toradio(&self.writer, &msg).await.map_err(|e| {
            if e.is_transport() {
                self.state.alive.store(false, Ordering::Relaxed);
            }
            e
        })?;
        debug!(
            "Sent text to {} ({}) id=0x{:08x}: '{}'",
            dest,
            dest.to_bang_hex(),
            packet_id,
            preview(text, TEXT_PREVIEW_BYTES)
        );
        Ok(())
    }

    /// Tell the device we are leaving, shut the socket and stop the tasks.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.heartbeat.abort();
        if self.state.alive.load(Ordering::Relaxed) {
            let bye = proto::ToRadio {
                payload_variant: Some(proto::to_radio::PayloadVariant::Disconnect(true)),
            };
            if let Err(e) = write_toradio(&self.writer, &bye).await {
                debug!("Disconnect notice to {} failed: {}", self.addr, e);
            }
        }
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Socket shutdown for {} failed: {}", self.addr, e);
        }
        self.reader.abort();
        self.state.alive.store(false, Ordering::Relaxed);
        info!("Closed Meshtastic session with {}", self.addr);
    }
}

impl Drop for TcpRadio {
    fn drop(&mut self) {
        self.reader.abort();
        self.heartbeat.abort();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    addr: String,
    state: Arc<SessionState>,
    handler: TextEventHandler,
) {
    let mut framer = StreamFramer::new();
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                warn!("Meshtastic device at {}: lost connection (EOF)", addr);
                break;
            }
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(frame) = framer.next_frame() {
                    dispatch_frame(&frame, &addr, &state, &handler);
                }
            }
            Err(e) => {
                warn!("Meshtastic device at {}: lost connection ({})", addr, e);
                break;
            }
        }
    }
    state.alive.store(false, Ordering::Relaxed);
}

fn dispatch_frame(frame: &[u8], addr: &str, state: &SessionState, handler: &TextEventHandler) {
    match parse_from_radio(frame) {
        Some(RadioEvent::MyInfo { node }) => {
            state.our_node.store(node, Ordering::Relaxed);
            info!(
                "Meshtastic session with {} established (our node {})",
                addr,
                NodeId(node).to_bang_hex()
            );
        }
        Some(RadioEvent::ConfigComplete { id }) => {
            debug!("Config stream from {} complete (id=0x{:08x})", addr, id);
        }
        Some(RadioEvent::Rebooted) => warn!("Meshtastic device at {} reports reboot", addr),
        Some(RadioEvent::Text(event)) => {
            trace!(
                "Text packet from 0x{:08x} to 0x{:08x} ch={}",
                event.source,
                event.dest,
                event.channel
            );
            handler(event);
        }
        Some(RadioEvent::Packet { from, portnum }) => {
            trace!("Ignoring packet from 0x{:08x} on port {}", from, portnum);
        }
        None => {}
    }
}

async fn heartbeat_loop(writer: Arc<Mutex<OwnedWriteHalf>>, state: Arc<SessionState>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; the want_config request just went out.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if !state.alive.load(Ordering::Relaxed) {
            break;
        }
        let hb = proto::ToRadio {
            payload_variant: Some(proto::to_radio::PayloadVariant::Heartbeat(
                proto::Heartbeat {
                    nonce: rand::thread_rng().gen(),
                },
            )),
        };
        if let Err(e) = write_toradio(&writer, &hb).await {
            warn!("Heartbeat failed: {}", e);
            state.alive.store(false, Ordering::Relaxed);
            break;
        }
        trace!("Sent heartbeat");
    }
}

#[async_trait]
impl RadioLink for TcpRadio {
    async fn send_text(&mut self, dest: NodeId, text: &str) -> Result<(), RadioError> {
        TcpRadio::send_text(self, dest, text).await
    }

    fn is_alive(&self) -> bool {
        TcpRadio::is_alive(self)
    }

    async fn close(&mut self) {
        TcpRadio::close(self).await
    }
}

/// Opens [`TcpRadio`] sessions that all report to one inbound handler.
pub struct TcpRadioConnector {
    handler: TextEventHandler,
    probe: ProbeKind,
    connect_timeout: Duration,
    heartbeat: Duration,
}

impl TcpRadioConnector {
    pub fn new(handler: TextEventHandler, probe: ProbeKind) -> Self {
        Self {
            handler,
            probe,
            connect_timeout: Duration::from_secs(10),
            heartbeat: Duration::from_secs(300),
        }
    }

    pub fn with_connect_timeout(mut self, t: Duration) -> Self {
        self.connect_timeout = t;
        self
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }
}

#[async_trait]
impl RadioConnector for TcpRadioConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn RadioLink>, RadioError> {
        let radio = TcpRadio::connect(
            host,
            self.handler.clone(),
            self.connect_timeout,
            self.heartbeat,
        )
        .await?;
        Ok(Box::new(radio))
    }

    async fn reachable(&self, host: &str) -> bool {
        self.probe.reachable(host).await
    }
}
