//! Connection management.
//!
//! Owns the session's connection state machine:
//!
//! ```text
//! Idle ──begin──▶ Connecting ──ok──▶ Connected
//!                  ▲      │                │
//!     backoff over │      │ dial error     │ transport closed
//!                  │      ▼                │
//!                  └── Failed ◀────────────┘
//! ```
//!
//! Dials run as tasks on the tokio runtime and report back over an unbounded
//! channel that the tick thread drains with `try_recv`; the tick never waits.
//! Each dial is tagged with an attempt id. Only the result of the currently
//! active attempt is honoured; anything else is drained and dropped.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use arena_shared::{
    net::{Dialer, Transport},
    protocol::ClientRequest,
};
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, info, warn};

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No credential yet, or logged out.
    Idle,
    /// A dial is in flight.
    Connecting,
    /// Transport is live.
    Connected,
    /// Last dial failed or the link dropped; waiting out the backoff.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State transitions the tick loop needs to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectEvent {
    Connected,
    Failed(String),
    Lost(String),
}

struct DialOutcome {
    attempt: u64,
    result: anyhow::Result<Box<dyn Transport>>,
}

pub struct ConnectionManager {
    addr: String,
    dialer: Arc<dyn Dialer>,
    runtime: Handle,
    backoff: Duration,

    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    /// Transport that closed with messages possibly still queued. Held until
    /// the owner drains it.
    closed_transport: Option<Box<dyn Transport>>,

    active_attempt: Option<u64>,
    next_attempt: u64,
    results_tx: mpsc::UnboundedSender<DialOutcome>,
    results_rx: mpsc::UnboundedReceiver<DialOutcome>,

    last_error: Option<String>,
    retry_at: Option<Instant>,
    attempts_started: u64,
}

impl ConnectionManager {
    pub fn new(
        addr: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        runtime: Handle,
        backoff: Duration,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            addr: addr.into(),
            dialer,
            runtime,
            backoff,
            state: ConnectionState::Idle,
            transport: None,
            closed_transport: None,
            active_attempt: None,
            next_attempt: 1,
            results_tx,
            results_rx,
            last_error: None,
            retry_at: None,
            attempts_started: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn in_flight(&self) -> bool {
        self.active_attempt.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn attempts_started(&self) -> u64 {
        self.attempts_started
    }

    /// Startup path: leaves Idle when a stored session validated.
    pub fn begin(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Idle {
            debug!(state = %self.state, "begin ignored outside Idle");
            return false;
        }
        self.start_connect(now)
    }

    /// Login path: the external login flow handed over a credential. Only
    /// leaves Idle; a session already retrying keeps its backoff.
    pub fn authenticate(&mut self, now: Instant) -> bool {
        info!(server = %self.addr, "Credential supplied");
        self.begin(now)
    }

    /// Spawns one dial task unless one is already in flight. Never blocks.
    pub fn start_connect(&mut self, now: Instant) -> bool {
        if self.active_attempt.is_some() {
            debug!("Dial already in flight");
            return false;
        }
        if self.state == ConnectionState::Connected {
            return false;
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.active_attempt = Some(attempt);
        self.state = ConnectionState::Connecting;
        self.retry_at = None;
        self.attempts_started += 1;

        info!(server = %self.addr, attempt, "Dialing");
        let dialer = Arc::clone(&self.dialer);
        let addr = self.addr.clone();
        let tx = self.results_tx.clone();
        self.runtime.spawn(async move {
            let result = dialer.dial(&addr).await;
            // The manager may be gone by now; nothing to report to then.
            let _ = tx.send(DialOutcome { attempt, result });
        });
        true
    }

    /// Drives time-based transitions: retry after backoff and detection of a
    /// dropped transport.
    pub fn tick(&mut self, now: Instant) -> Option<ConnectEvent> {
        match self.state {
            ConnectionState::Failed => {
                let due = self.retry_at.map_or(true, |at| now >= at);
                if due && self.active_attempt.is_none() {
                    self.start_connect(now);
                }
                None
            }
            ConnectionState::Connected => {
                let closed = self.transport.as_ref().map_or(true, |t| t.is_closed());
                if closed {
                    self.closed_transport = self.transport.take();
                    let reason = "connection lost".to_string();
                    self.fail(now, reason.clone());
                    Some(ConnectEvent::Lost(reason))
                } else {
                    None
                }
            }
            ConnectionState::Idle | ConnectionState::Connecting => None,
        }
    }

    /// Consumes completed dial results without blocking. Results from
    /// superseded attempts are discarded.
    pub fn poll_result(&mut self, now: Instant) -> Option<ConnectEvent> {
        while let Ok(outcome) = self.results_rx.try_recv() {
            if Some(outcome.attempt) != self.active_attempt {
                debug!(
                    attempt = outcome.attempt,
                    active = ?self.active_attempt,
                    ok = outcome.result.is_ok(),
                    "Discarding stale dial result"
                );
                continue;
            }
            self.active_attempt = None;

            return Some(match outcome.result {
                Ok(transport) => {
                    info!(server = %self.addr, attempt = outcome.attempt, "Connected");
                    self.transport = Some(transport);
                    self.state = ConnectionState::Connected;
                    self.last_error = None;
                    self.retry_at = None;
                    ConnectEvent::Connected
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    self.fail(now, reason.clone());
                    ConnectEvent::Failed(reason)
                }
            });
        }
        None
    }

    fn fail(&mut self, now: Instant, reason: String) {
        warn!(
            server = %self.addr,
            error = %reason,
            retry_in_ms = self.backoff.as_millis() as u64,
            "Connection failed"
        );
        self.transport = None;
        self.state = ConnectionState::Failed;
        self.last_error = Some(reason);
        self.retry_at = Some(now + self.backoff);
    }

    /// Drops the session and returns to Idle. A dial still in flight is
    /// abandoned; its result will be discarded when it lands.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Idle {
            info!(state = %self.state, "Disconnecting");
        }
        self.transport = None;
        self.closed_transport = None;
        self.active_attempt = None;
        self.state = ConnectionState::Idle;
        self.retry_at = None;
        self.last_error = None;
    }

    pub fn transport_mut(&mut self) -> Option<&mut (dyn Transport + 'static)> {
        self.transport.as_deref_mut()
    }

    /// Hands over the transport whose close was reported by the last `Lost`
    /// event. Messages that arrived before the close can still be read from it.
    pub fn take_closed_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.closed_transport.take()
    }

    /// Sends a request. Only permitted while Connected.
    pub fn send(&mut self, request: &ClientRequest) -> anyhow::Result<()> {
        match (&self.state, self.transport.as_mut()) {
            (ConnectionState::Connected, Some(transport)) => {
                debug!(kind = request.kind(), "Sending request");
                transport.send(request.to_envelope())
            }
            _ => anyhow::bail!("cannot send {} while {}", request.kind(), self.state),
        }
    }

    /// User-facing description of the connection.
    pub fn status_text(&self, now: Instant) -> String {
        match self.state {
            ConnectionState::Idle => "Not signed in".to_string(),
            ConnectionState::Connecting => format!("Connecting to {}...", self.addr),
            ConnectionState::Connected => format!("Connected to {}", self.addr),
            ConnectionState::Failed => {
                let err = self.last_error.as_deref().unwrap_or("unknown error");
                let wait = self
                    .retry_at
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or_default();
                format!(
                    "Connection failed: {err}. Retrying in {:.1}s",
                    wait.as_secs_f32()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DialStep, MockDialer, MockLink};

    const BACKOFF: Duration = Duration::from_secs(2);

    fn manager(dialer: &Arc<MockDialer>) -> ConnectionManager {
        ConnectionManager::new("test:1", dialer.clone(), Handle::current(), BACKOFF)
    }

    /// Polls until the active dial lands.
    async fn settle(mgr: &mut ConnectionManager, now: Instant) -> Option<ConnectEvent> {
        for _ in 0..500 {
            if let Some(ev) = mgr.poll_result(now) {
                return Some(ev);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        None
    }

    #[tokio::test]
    async fn stays_idle_without_credential() {
        let dialer = Arc::new(MockDialer::new(vec![]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(mgr.tick(t0 + BACKOFF * i).is_none());
        }
        assert_eq!(mgr.state(), ConnectionState::Idle);
        assert_eq!(dialer.dials(), 0);
        assert!(mgr.send(&ClientRequest::GetProfile).is_err());
    }

    #[tokio::test]
    async fn successful_dial_connects_and_allows_sends() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();

        assert!(mgr.begin(t0));
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert!(mgr.send(&ClientRequest::GetProfile).is_err());

        assert_eq!(settle(&mut mgr, t0).await, Some(ConnectEvent::Connected));
        assert!(mgr.is_connected());
        mgr.send(&ClientRequest::ListMaps).unwrap();
        assert_eq!(link.sent_kinds(), ["ListMaps"]);
        assert_eq!(mgr.status_text(t0), "Connected to test:1");
    }

    #[tokio::test]
    async fn authenticate_connects_from_idle_only_once() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();

        assert!(mgr.authenticate(t0));
        assert!(!mgr.authenticate(t0));
        assert_eq!(settle(&mut mgr, t0).await, Some(ConnectEvent::Connected));
        assert!(!mgr.authenticate(t0));
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn second_start_is_a_noop_while_in_flight() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![
            DialStep::ok(&link).after(Duration::from_millis(20))
        ]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();

        assert!(mgr.start_connect(t0));
        assert!(!mgr.start_connect(t0));
        assert!(!mgr.begin(t0));
        assert_eq!(mgr.attempts_started(), 1);

        settle(&mut mgr, t0).await;
        assert_eq!(dialer.dials(), 1);
        assert_eq!(dialer.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn failures_retry_on_fixed_backoff_one_at_a_time() {
        let dialer = Arc::new(MockDialer::new(
            (0..5).map(|i| DialStep::fail(format!("refused #{i}"))).collect(),
        ));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();
        mgr.begin(t0);

        let mut attempts = vec![t0];
        let mut now = t0;
        while attempts.len() < 5 {
            now += Duration::from_millis(100);
            let before = mgr.attempts_started();
            mgr.tick(now);
            if mgr.attempts_started() > before {
                attempts.push(now);
            }
            assert!(dialer.max_in_flight() <= 1);
            if mgr.in_flight() {
                if let Some(ConnectEvent::Failed(reason)) = settle(&mut mgr, now).await {
                    assert!(reason.starts_with("refused"));
                    assert_eq!(mgr.state(), ConnectionState::Failed);
                    assert_eq!(mgr.retry_at(), Some(now + BACKOFF));
                }
            }
        }

        for pair in attempts.windows(2) {
            assert!(pair[1] - pair[0] >= BACKOFF, "retried too early");
        }
        assert_eq!(dialer.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn no_retry_before_backoff_elapses() {
        let dialer = Arc::new(MockDialer::new(vec![DialStep::fail("nope")]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();
        mgr.begin(t0);
        settle(&mut mgr, t0).await;

        mgr.tick(t0 + Duration::from_millis(1999));
        assert_eq!(mgr.state(), ConnectionState::Failed);
        assert_eq!(mgr.attempts_started(), 1);
        assert!(mgr
            .status_text(t0 + Duration::from_millis(1000))
            .starts_with("Connection failed: nope. Retrying in 1.0s"));

        mgr.tick(t0 + BACKOFF);
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(mgr.attempts_started(), 2);
    }

    #[tokio::test]
    async fn closed_transport_is_detected_and_retried() {
        let first = MockLink::default();
        let second = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![
            DialStep::ok(&first),
            DialStep::ok(&second),
        ]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();
        mgr.begin(t0);
        settle(&mut mgr, t0).await;
        assert!(mgr.tick(t0).is_none());

        first.close();
        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(
            mgr.tick(t1),
            Some(ConnectEvent::Lost("connection lost".into()))
        );
        assert_eq!(mgr.state(), ConnectionState::Failed);
        assert!(mgr.transport_mut().is_none());
        assert!(mgr.take_closed_transport().is_some());
        assert!(mgr.take_closed_transport().is_none());

        mgr.tick(t1 + Duration::from_millis(500));
        assert_eq!(mgr.attempts_started(), 1);
        mgr.tick(t1 + BACKOFF);
        assert_eq!(
            settle(&mut mgr, t1 + BACKOFF).await,
            Some(ConnectEvent::Connected)
        );
    }

    #[tokio::test]
    async fn messages_queued_before_close_remain_readable() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();
        mgr.begin(t0);
        settle(&mut mgr, t0).await;

        link.push("Error", serde_json::json!({ "message": "kicked" }));
        link.close();
        assert!(matches!(mgr.tick(t0), Some(ConnectEvent::Lost(_))));

        let mut closed = mgr.take_closed_transport().unwrap();
        assert!(closed.is_closed());
        assert_eq!(closed.try_recv().map(|e| e.kind).as_deref(), Some("Error"));
        assert!(closed.try_recv().is_none());
    }

    #[tokio::test]
    async fn disconnect_discards_closed_transport() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();
        mgr.begin(t0);
        settle(&mut mgr, t0).await;

        link.close();
        mgr.tick(t0);
        mgr.disconnect();
        assert!(mgr.take_closed_transport().is_none());
    }

    #[tokio::test]
    async fn stale_result_is_discarded() {
        let slow = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![
            DialStep::ok(&slow).after(Duration::from_millis(40)),
            DialStep::fail("refused"),
        ]));
        let mut mgr = manager(&dialer);
        let t0 = Instant::now();

        mgr.begin(t0);
        tokio::task::yield_now().await;
        // Logout while the slow dial is still out, then log back in.
        mgr.disconnect();
        assert!(!mgr.in_flight());
        mgr.begin(t0);

        assert_eq!(
            settle(&mut mgr, t0).await,
            Some(ConnectEvent::Failed("refused".into()))
        );

        // Let the abandoned success land; it must not resurrect the session.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(mgr.poll_result(t0), None);
        assert_eq!(mgr.state(), ConnectionState::Failed);
        assert!(mgr.transport_mut().is_none());
    }
}
