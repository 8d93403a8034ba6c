//! In-memory doubles for unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::anyhow;
use arena_shared::{
    net::{Dialer, Transport},
    protocol::Envelope,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::session::{SessionStore, StoredSession};

/// Test-side handle on a mock connection. Clones share state with every
/// transport created from it.
#[derive(Clone, Default)]
pub struct MockLink {
    inbound: Arc<Mutex<VecDeque<Envelope>>>,
    sent: Arc<Mutex<Vec<Envelope>>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    /// Queues a server message for the client to read.
    pub fn push(&self, kind: &str, payload: Value) {
        self.inbound
            .lock()
            .unwrap()
            .push_back(Envelope::new(kind, payload));
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.kind).collect()
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport { link: self.clone() }
    }
}

pub struct MockTransport {
    link: MockLink,
}

impl Transport for MockTransport {
    fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        self.link.inbound.lock().unwrap().pop_front()
    }

    fn send(&mut self, envelope: Envelope) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("mock transport closed");
        }
        self.link.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// One scripted dial.
pub struct DialStep {
    delay: Duration,
    outcome: Result<MockLink, String>,
}

impl DialStep {
    pub fn ok(link: &MockLink) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(link.clone()),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(reason.into()),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Dialer that replays a script and tracks concurrency.
pub struct MockDialer {
    script: Mutex<VecDeque<DialStep>>,
    dials: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDialer {
    pub fn new(script: Vec<DialStep>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            dials: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _addr: &str) -> anyhow::Result<Box<dyn Transport>> {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| DialStep::fail("no scripted dial"));
        self.dials.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step.outcome {
            Ok(link) => Ok(Box::new(link.transport())),
            Err(reason) => Err(anyhow!(reason)),
        }
    }
}

/// Session store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    pub session: Option<StoredSession>,
    pub clears: usize,
}

impl SessionStore for MemoryStore {
    fn load(&self) -> anyhow::Result<Option<StoredSession>> {
        Ok(self.session.clone())
    }

    fn save(&mut self, session: &StoredSession) -> anyhow::Result<()> {
        self.session = Some(session.clone());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        self.session = None;
        self.clears += 1;
        Ok(())
    }
}
