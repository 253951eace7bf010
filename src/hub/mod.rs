//! Socket.IO client for the cloud hub.
//!
//! A connection is one websocket carrying Engine.IO v4 text frames. After the
//! handshake a session task owns the socket: it answers pings, forwards queued
//! events, and clears the shared `connected` flag when the hub goes away.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::HubError;
use crate::relay::{HubConnector, HubLink};

pub mod socketio;

use socketio::{EnginePacket, SocketPacket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

enum Outgoing {
    Frame(String),
    Close,
}

/// A connected Socket.IO session.
pub struct SocketIoHub {
    url: String,
    sid: Option<String>,
    connected: Arc<AtomicBool>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketIoHub {
    /// Open the websocket and join the default namespace.
    ///
    /// Resolves only once the hub has acknowledged the namespace connect; the
    /// whole exchange is bounded by `handshake_timeout`.
    pub async fn connect(endpoint: &str, handshake_timeout: Duration) -> Result<Self, HubError> {
        let url = socketio::websocket_url(endpoint)?;
        debug!("Opening hub websocket {}", url);
        let (ws, sid, budget) = match timeout(handshake_timeout, handshake(url.as_str())).await {
            Ok(r) => r?,
            Err(_) => return Err(HubError::HandshakeTimeout(handshake_timeout.as_secs())),
        };
        info!(
            "Connected to hub {} (sid {})",
            endpoint,
            sid.as_deref().unwrap_or("-")
        );

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session(
            ws,
            rx,
            connected.clone(),
            endpoint.to_string(),
            budget,
        ));
        Ok(Self {
            url: url.to_string(),
            sid,
            connected,
            outgoing: tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }
}

/// Returns the socket, the namespace sid and the silence budget advertised in
/// the Engine.IO open packet.
async fn handshake(url: &str) -> Result<(WsStream, Option<String>, Duration), HubError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
    let mut opened = false;
    let mut budget = socketio::liveness_budget(&Value::Null);
    while let Some(msg) = ws.next().await {
        let text = match msg? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        match socketio::parse_engine(text.as_str()) {
            Some(EnginePacket::Open(info)) if !opened => {
                trace!("Engine.IO open: {}", info);
                budget = socketio::liveness_budget(&info);
                opened = true;
                ws.send(Message::Text(socketio::CONNECT.into())).await?;
            }
            Some(EnginePacket::Ping) => {
                ws.send(Message::Text(socketio::PONG.into())).await?;
            }
            Some(EnginePacket::Message(body)) if opened => match socketio::parse_socket(&body) {
                Some(SocketPacket::Connect { sid }) => return Ok((ws, sid, budget)),
                Some(SocketPacket::ConnectError(reason)) => {
                    return Err(HubError::Handshake(format!("connect refused: {}", reason)))
                }
                _ => trace!("Ignoring packet during handshake: {}", body),
            },
            Some(EnginePacket::Close) => break,
            _ => trace!("Ignoring frame during handshake: {}", text.as_str()),
        }
    }
    Err(HubError::Handshake(if opened {
        "closed before namespace connect".to_string()
    } else {
        "closed before Engine.IO open".to_string()
    }))
}

async fn session(
    ws: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    connected: Arc<AtomicBool>,
    endpoint: String,
    budget: Duration,
) {
    let (mut sink, mut stream) = ws.split();
    // The hub pings every pingInterval; any inbound frame proves it is alive.
    let idle = sleep_until(Instant::now() + budget);
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => {
                warn!(
                    "Hub {} silent for {}ms; treating session as lost",
                    endpoint,
                    budget.as_millis()
                );
                break;
            }
            out = outgoing.recv() => match out {
                Some(Outgoing::Frame(frame)) => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        warn!("Hub {}: send failed: {}", endpoint, e);
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Text(socketio::DISCONNECT.into())).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            msg = stream.next() => {
                if let Some(Ok(_)) = &msg {
                    idle.as_mut().reset(Instant::now() + budget);
                }
                match msg {
                    Some(Ok(Message::Text(text))) => match socketio::parse_engine(text.as_str()) {
                        Some(EnginePacket::Ping) => {
                            if let Err(e) = sink.send(Message::Text(socketio::PONG.into())).await {
                                warn!("Hub {}: pong failed: {}", endpoint, e);
                                break;
                            }
                        }
                        Some(EnginePacket::Close) => {
                            info!("Hub {} closed the session", endpoint);
                            break;
                        }
                        Some(EnginePacket::Message(body)) => match socketio::parse_socket(&body) {
                            Some(SocketPacket::Disconnect) => {
                                info!("Hub {} disconnected the namespace", endpoint);
                                break;
                            }
                            Some(SocketPacket::Event { name, args }) => {
                                debug!("Hub event '{}' ignored ({} args)", name, args.len());
                            }
                            _ => trace!("Hub packet ignored: {}", body),
                        },
                        _ => trace!("Hub frame ignored: {}", text.as_str()),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Hub {} websocket closed", endpoint);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Hub {} websocket error: {}", endpoint, e);
                        break;
                    }
                }
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[async_trait]
impl HubLink for SocketIoHub {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, event: &str, payload: Value) -> Result<(), HubError> {
        if !self.connected() {
            return Err(HubError::NotConnected);
        }
        let frame = socketio::encode_event(event, &payload)?;
        trace!("Queueing hub frame {}", frame);
        self.outgoing
            .send(Outgoing::Frame(frame))
            .map_err(|_| HubError::NotConnected)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.outgoing.send(Outgoing::Close);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(mut task) = task {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                debug!("Hub session task did not stop in time; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for SocketIoHub {
    fn drop(&mut self) {
        if let Ok(mut t) = self.task.lock() {
            if let Some(task) = t.take() {
                task.abort();
            }
        }
    }
}

/// Opens [`SocketIoHub`] sessions.
pub struct SocketIoConnector {
    handshake_timeout: Duration,
}

impl SocketIoConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl HubConnector for SocketIoConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn HubLink>, HubError> {
        let hub = SocketIoHub::connect(endpoint, self.handshake_timeout).await?;
        Ok(Arc::new(hub))
    }
}
