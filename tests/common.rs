//! Test utilities & fixtures.
//!
//! In-process fakes for the three relay channels. Every fake writes what it was
//! asked to do into a shared [`Journal`] so tests can assert on ordering across
//! channels.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use meshrelay::error::{HubError, RadioError, StoreError};
use meshrelay::relay::{
    HubConnector, HubLink, MessageStore, NodeId, PendingMessage, RadioConnector, RadioLink,
};

/// Ordered record of calls made against the fakes.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e.starts_with(prefix))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub fn pending(id: &str, node: &str, text: &str) -> PendingMessage {
    PendingMessage {
        id: id.to_string(),
        node_id: node.to_string(),
        message: text.to_string(),
        message_sent: false,
    }
}

// ---------------------------------------------------------------- radio

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    /// Rejected before reaching the wire; the session stays usable.
    Reject,
    /// Broken pipe; the session is gone.
    Broken,
}

#[derive(Clone, Default)]
pub struct FakeRadio {
    pub journal: Journal,
    probes: Arc<Mutex<VecDeque<bool>>>,
    send_script: Arc<Mutex<VecDeque<SendOutcome>>>,
    pub connect_failures: Arc<AtomicU32>,
    pub sessions: Arc<AtomicU32>,
    /// Tag of the session the device dropped; 0 when none.
    dead_session: Arc<AtomicU32>,
    sent: Arc<Mutex<Vec<(u32, String)>>>,
}

impl FakeRadio {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Default::default()
        }
    }

    pub fn connector(&self) -> Box<dyn RadioConnector> {
        Box::new(self.clone())
    }

    /// Outcomes of upcoming probes; once exhausted every probe succeeds.
    pub fn script_probes(&self, seq: &[bool]) {
        self.probes.lock().unwrap().extend(seq.iter().copied());
    }

    /// Outcomes of upcoming sends; once exhausted every send succeeds.
    pub fn script_sends(&self, seq: &[SendOutcome]) {
        self.send_script.lock().unwrap().extend(seq.iter().copied());
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(u32, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// The device drops the newest session; the host keeps answering probes.
    pub fn drop_session(&self) {
        self.dead_session
            .store(self.sessions.load(Ordering::SeqCst) + 1, Ordering::SeqCst);
    }

    /// A session that bypasses the connector, for poller tests.
    pub fn link(&self) -> FakeLink {
        FakeLink {
            radio: self.clone(),
            tag: self.sessions.load(Ordering::SeqCst) + 1,
            closed: false,
        }
    }
}

#[async_trait]
impl RadioConnector for FakeRadio {
    async fn connect(&self, host: &str) -> Result<Box<dyn RadioLink>, RadioError> {
        self.journal.push("radio.connect");
        let failures = self.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.connect_failures.store(failures - 1, Ordering::SeqCst);
            return Err(RadioError::ConnectTimeout(host.to_string()));
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.link()))
    }

    async fn reachable(&self, _host: &str) -> bool {
        self.journal.push("radio.probe");
        self.probes.lock().unwrap().pop_front().unwrap_or(true)
    }
}

pub struct FakeLink {
    radio: FakeRadio,
    tag: u32,
    closed: bool,
}

#[async_trait]
impl RadioLink for FakeLink {
    async fn send_text(&mut self, dest: NodeId, text: &str) -> Result<(), RadioError> {
        if !self.is_alive() {
            return Err(RadioError::Closed);
        }
        self.radio.journal.push(format!("radio.send {} {}", dest, text));
        let outcome = self
            .radio
            .send_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SendOutcome::Ok);
        match outcome {
            SendOutcome::Ok => {
                self.radio.sent.lock().unwrap().push((dest.0, text.to_string()));
                Ok(())
            }
            SendOutcome::Reject => Err(RadioError::PayloadTooLarge { len: 999, max: 233 }),
            SendOutcome::Broken => Err(RadioError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            ))),
        }
    }

    fn is_alive(&self) -> bool {
        !self.closed && self.radio.dead_session.load(Ordering::SeqCst) != self.tag
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.radio.journal.push("radio.close");
        }
    }
}

// ---------------------------------------------------------------- hub

pub struct FakeHubLink {
    journal: Journal,
    connected: AtomicBool,
    closed: AtomicBool,
    published: Mutex<Vec<(String, Value)>>,
}

impl FakeHubLink {
    pub fn new(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
        })
    }

    /// Simulate the transport noticing the hub went away.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubLink for FakeHubLink {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, event: &str, payload: Value) -> Result<(), HubError> {
        if !self.connected() {
            return Err(HubError::NotConnected);
        }
        self.journal.push("hub.publish");
        self.published
            .lock()
            .unwrap()
            .push((event.to_string(), payload));
        Ok(())
    }

    async fn close(&self) {
        self.journal.push("hub.close");
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeHub {
    pub journal: Journal,
    connect_failures: Arc<AtomicU32>,
    links: Arc<Mutex<Vec<Arc<FakeHubLink>>>>,
}

impl FakeHub {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Default::default()
        }
    }

    pub fn connector(&self) -> Box<dyn HubConnector> {
        Box::new(self.clone())
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Every link handed out so far, oldest first.
    pub fn links(&self) -> Vec<Arc<FakeHubLink>> {
        self.links.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<Arc<FakeHubLink>> {
        self.links.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HubConnector for FakeHub {
    async fn connect(&self, _endpoint: &str) -> Result<Arc<dyn HubLink>, HubError> {
        self.journal.push("hub.connect");
        let failures = self.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.connect_failures.store(failures - 1, Ordering::SeqCst);
            return Err(HubError::Handshake("refused".to_string()));
        }
        let link = FakeHubLink::new(&self.journal);
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

// ---------------------------------------------------------------- store

/// Behaves like the real store: an acknowledged message reports
/// `messageSent: true` on later fetches.
#[derive(Clone, Default)]
pub struct FakeStore {
    pub journal: Journal,
    messages: Arc<Mutex<Vec<PendingMessage>>>,
    fail_fetch: Arc<AtomicBool>,
    ack_failures: Arc<AtomicU32>,
    acks: Arc<Mutex<Vec<String>>>,
}

impl FakeStore {
    pub fn new(journal: &Journal, messages: Vec<PendingMessage>) -> Self {
        Self {
            journal: journal.clone(),
            messages: Arc::new(Mutex::new(messages)),
            ..Default::default()
        }
    }

    pub fn boxed(&self) -> Box<dyn MessageStore> {
        Box::new(self.clone())
    }

    pub fn set_fetch_failing(&self, failing: bool) {
        self.fail_fetch.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next_acks(&self, n: u32) {
        self.ack_failures.store(n, Ordering::SeqCst);
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn fetch_pending(&self) -> Result<Vec<PendingMessage>, StoreError> {
        self.journal.push("store.fetch");
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                url: "fake://store".to_string(),
                status: 500,
            });
        }
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn acknowledge(&self, id: &str) -> Result<(), StoreError> {
        self.journal.push(format!("store.ack {}", id));
        let failures = self.ack_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.ack_failures.store(failures - 1, Ordering::SeqCst);
            return Err(StoreError::Status {
                url: "fake://store/ack".to_string(),
                status: 502,
            });
        }
        self.acks.lock().unwrap().push(id.to_string());
        for m in self.messages.lock().unwrap().iter_mut() {
            if m.id == id {
                m.message_sent = true;
            }
        }
        Ok(())
    }
}
