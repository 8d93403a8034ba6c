//! Client orchestration.
//!
//! [`GameClient`] ties the pieces together and runs the per-frame order:
//! 1. connection housekeeping (retry after backoff, dropped-link detection)
//! 2. completed dial results, sending the initial requests on connect
//! 3. inbound dispatch, in arrival order
//! 4. fixed simulation steps: world smoothing, then ghost-bar decay
//!
//! Nothing here blocks; the frame loop can call [`GameClient::tick`] at any
//! rate.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arena_shared::{
    config::ClientConfig,
    net::{Dialer, Transport},
    protocol::ClientRequest,
};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::{
    clock::SimulationClock,
    connection::{ConnectEvent, ConnectionManager, ConnectionState},
    dispatch::{DispatchContext, Dispatcher},
    effects::EffectTracker,
    lobby::LobbyState,
    render::{Presenter, RenderFrame},
    session::{SessionStore, StoredSession, TokenValidator},
    world::WorldModel,
};

/// What startup did with the stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// Valid session found; connecting.
    Resumed,
    /// Session was rejected or unreadable and has been cleared.
    Invalidated,
    /// Nothing stored; waiting for login.
    NoSession,
}

/// What one frame did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub events: Vec<ConnectEvent>,
    pub dispatched: usize,
    pub steps: u32,
}

pub struct GameClient {
    cfg: ClientConfig,
    username: Option<String>,

    conn: ConnectionManager,
    dispatcher: Dispatcher,

    world: WorldModel,
    effects: EffectTracker,
    clock: SimulationClock,
    lobby: LobbyState,

    status: String,
    /// Times the initial request sequence went out.
    initial_sequences_sent: u64,
}

impl GameClient {
    pub fn new(cfg: ClientConfig, dialer: Arc<dyn Dialer>, runtime: Handle) -> Self {
        let conn = ConnectionManager::new(
            cfg.server_addr.clone(),
            dialer,
            runtime,
            cfg.retry_backoff(),
        );
        Self {
            username: None,
            conn,
            dispatcher: Dispatcher::with_default_handlers(),
            world: WorldModel::new(cfg.world.clone()),
            effects: EffectTracker::new(cfg.effects.clone()),
            clock: SimulationClock::from_tick_hz(cfg.tick_hz),
            lobby: LobbyState::default(),
            status: "Not signed in".to_string(),
            initial_sequences_sent: 0,
            cfg,
        }
    }

    /// Startup: resumes a stored session if the validator accepts it. A
    /// rejected session is cleared and the client stays Idle.
    pub fn boot(
        &mut self,
        store: &mut dyn SessionStore,
        validator: &dyn TokenValidator,
        now: Instant,
    ) -> BootOutcome {
        let stored = match store.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Unreadable session, discarding");
                Self::discard_session(store);
                return BootOutcome::Invalidated;
            }
        };

        match stored {
            None => {
                info!("No stored session, waiting for login");
                BootOutcome::NoSession
            }
            Some(session) if validator.validate(&session) => {
                info!(user = %session.username, "Resuming stored session");
                self.username = Some(session.username);
                self.conn.begin(now);
                BootOutcome::Resumed
            }
            Some(session) => {
                warn!(user = %session.username, "Stored session rejected");
                Self::discard_session(store);
                BootOutcome::Invalidated
            }
        }
    }

    fn discard_session(store: &mut dyn SessionStore) {
        if let Err(e) = store.clear() {
            warn!(error = %format!("{e:#}"), "Failed to clear session");
        }
    }

    /// Login finished: persist the credential and start connecting.
    pub fn login_complete(
        &mut self,
        username: &str,
        token: &str,
        store: &mut dyn SessionStore,
        now: Instant,
    ) -> anyhow::Result<()> {
        store.save(&StoredSession::new(token, username))?;
        info!(user = %username, "Logged in");
        self.username = Some(username.to_string());
        self.conn.authenticate(now);
        Ok(())
    }

    /// Drops the connection and the match, and forgets the credential.
    pub fn logout(&mut self, store: &mut dyn SessionStore) -> anyhow::Result<()> {
        self.conn.disconnect();
        self.reset_match();
        self.lobby = LobbyState::default();
        self.username = None;
        self.status = self.conn.status_text(Instant::now());
        store.clear()
    }

    /// Runs one frame. `frame_dt` is the wall time since the previous frame.
    pub fn tick(&mut self, now: Instant, frame_dt: Duration) -> TickReport {
        let mut report = TickReport::default();

        if let Some(event) = self.conn.tick(now) {
            if matches!(event, ConnectEvent::Lost(_)) {
                // Whatever the server sent before closing still applies.
                if let Some(mut closed) = self.conn.take_closed_transport() {
                    report.dispatched += self.dispatch_from(closed.as_mut());
                }
                self.reset_match();
            }
            report.events.push(event);
        }

        if let Some(event) = self.conn.poll_result(now) {
            if event == ConnectEvent::Connected {
                self.send_initial_requests();
            }
            report.events.push(event);
        }

        if let Some(transport) = self.conn.transport_mut() {
            let mut ctx = DispatchContext {
                world: &mut self.world,
                effects: &mut self.effects,
                clock: &mut self.clock,
                lobby: &mut self.lobby,
            };
            report.dispatched += self.dispatcher.drain_and_dispatch(transport, &mut ctx);
        }

        report.steps = self.clock.advance(frame_dt);
        let first = self.clock.steps() - u64::from(report.steps);
        let dt = self.clock.step_secs();
        for i in 1..=u64::from(report.steps) {
            self.world.step(dt);
            self.effects
                .sync_world(&self.world, self.clock.ms_at(first + i));
        }

        self.status = self.conn.status_text(now);
        report
    }

    fn dispatch_from(&mut self, source: &mut dyn Transport) -> usize {
        let mut ctx = DispatchContext {
            world: &mut self.world,
            effects: &mut self.effects,
            clock: &mut self.clock,
            lobby: &mut self.lobby,
        };
        self.dispatcher.drain_and_dispatch(source, &mut ctx)
    }

    fn send_initial_requests(&mut self) {
        let name = self
            .username
            .clone()
            .unwrap_or_else(|| self.cfg.player_name.clone());
        for request in ClientRequest::initial_sequence(&name) {
            if let Err(e) = self.conn.send(&request) {
                warn!(kind = request.kind(), error = %format!("{e:#}"), "Initial request failed");
                return;
            }
        }
        self.initial_sequences_sent += 1;
        info!(name = %name, "Initial requests sent");
    }

    /// Drops all match state locally.
    pub fn reset_match(&mut self) {
        self.world.reset();
        self.effects.clear();
        self.clock.resume();
    }

    pub fn request(&mut self, request: ClientRequest) -> anyhow::Result<()> {
        self.conn.send(&request)
    }

    /// Asks the server to pause. The clock only stops once the server
    /// confirms with `GamePaused`.
    pub fn pause_game(&mut self) -> anyhow::Result<()> {
        self.request(ClientRequest::PauseGame)
    }

    pub fn resume_game(&mut self) -> anyhow::Result<()> {
        self.request(ClientRequest::ResumeGame)
    }

    pub fn restart_match(&mut self) -> anyhow::Result<()> {
        self.request(ClientRequest::RestartMatch)
    }

    pub fn surrender_match(&mut self) -> anyhow::Result<()> {
        self.request(ClientRequest::SurrenderMatch)
    }

    pub fn present(&self, presenter: &mut dyn Presenter) {
        presenter.present(&RenderFrame {
            world: &self.world,
            effects: &self.effects,
            connection: self.conn.state(),
            status: &self.status,
            paused: self.clock.is_paused(),
        });
    }

    /// Executes a console command and returns lines to print.
    pub fn exec_console(
        &mut self,
        line: &str,
        store: &mut dyn SessionStore,
        now: Instant,
    ) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return Ok(Vec::new());
        };

        match command {
            "login" => {
                if tokens.len() < 3 {
                    return Ok(vec!["Usage: login <name> <token>".to_string()]);
                }
                self.login_complete(tokens[1], tokens[2], store, now)?;
                Ok(vec![format!("Logged in as {}", tokens[1])])
            }
            "logout" => {
                self.logout(store)?;
                Ok(vec!["Logged out".to_string()])
            }
            "pause" => self.pause_game().map(|()| Vec::new()),
            "resume" => self.resume_game().map(|()| Vec::new()),
            "restart" => self.restart_match().map(|()| Vec::new()),
            "surrender" => self.surrender_match().map(|()| Vec::new()),
            "status" => {
                let mut out = vec![
                    format!("State: {}", self.conn.state()),
                    format!("Status: {}", self.status),
                    format!("User: {}", self.username.as_deref().unwrap_or("-")),
                ];
                if let Some(room) = self.world.room_id() {
                    out.push(format!(
                        "Room: {room} ({} units, {} bases, {} projectiles)",
                        self.world.units().len(),
                        self.world.bases().len(),
                        self.world.projectiles().len()
                    ));
                }
                if self.clock.is_paused() {
                    out.push("Paused".to_string());
                }
                Ok(out)
            }
            "lobby" => {
                let mut out = Vec::new();
                if let Some(p) = &self.lobby.profile {
                    out.push(format!(
                        "{} lvl {} ({} gold, {} trophies)",
                        p.name, p.level, p.gold, p.trophies
                    ));
                }
                out.push(format!("Minis: {}", self.lobby.minis.len()));
                out.push(format!("Maps: {}", self.lobby.maps.join(", ")));
                out.push(format!(
                    "Friends online: {}/{}",
                    self.lobby.online_friends().count(),
                    self.lobby.friends.len()
                ));
                if let Some(err) = &self.lobby.last_error {
                    out.push(format!("Last server error: {err}"));
                }
                Ok(out)
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    pub fn status_text(&self) -> &str {
        &self.status
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub fn effects(&self) -> &EffectTracker {
        &self.effects
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn lobby(&self) -> &LobbyState {
        &self.lobby
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn initial_sequences_sent(&self) -> u64 {
        self.initial_sequences_sent
    }
}

#[cfg(test)]
mod tests {
    use arena_shared::{
        entity::{BaseId, UnitId},
        protocol::inbound,
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        effects::FxKey,
        render::NullPresenter,
        session::MaxAgeValidator,
        testing::{DialStep, MemoryStore, MockDialer, MockLink},
    };

    const FRAME: Duration = Duration::from_millis(16);
    const INITIAL: [&str; 6] = [
        "SetName",
        "GetProfile",
        "ListMinis",
        "ListMaps",
        "GetGuild",
        "GetFriends",
    ];

    fn client(dialer: &Arc<MockDialer>) -> GameClient {
        let cfg = ClientConfig {
            retry_backoff_ms: 2000,
            ..ClientConfig::default()
        };
        GameClient::new(cfg, dialer.clone(), Handle::current())
    }

    fn stored(name: &str) -> MemoryStore {
        MemoryStore {
            session: Some(StoredSession::new("tok", name)),
            clears: 0,
        }
    }

    /// Ticks frames, yielding to the runtime between them, until `done`.
    async fn run_until(
        c: &mut GameClient,
        now: &mut Instant,
        mut done: impl FnMut(&GameClient) -> bool,
    ) {
        for _ in 0..500 {
            if done(c) {
                return;
            }
            *now += FRAME;
            c.tick(*now, FRAME);
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    fn frames(c: &mut GameClient, now: &mut Instant, n: usize) {
        for _ in 0..n {
            *now += FRAME;
            c.tick(*now, FRAME);
        }
    }

    fn unit(id: u32, owner: &str, x: f32, y: f32, hp: i32) -> Value {
        json!({
            "id": id, "name": format!("u{id}"), "class": "Knight", "owner": owner,
            "x": x, "y": y, "hp": hp, "max_hp": 100
        })
    }

    fn base(id: u32, owner: &str, y: f32, hp: i32) -> Value {
        json!({
            "id": id, "owner": owner, "x": 380.0, "y": y, "w": 40.0, "h": 40.0,
            "hp": hp, "max_hp": 1000
        })
    }

    #[tokio::test]
    async fn initial_sequence_sent_once_per_connection() {
        let first = MockLink::default();
        let second = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![
            DialStep::ok(&first),
            DialStep::ok(&second),
        ]));
        let mut c = client(&dialer);
        let mut store = stored("alice");
        let mut now = Instant::now();

        assert_eq!(
            c.boot(&mut store, &MaxAgeValidator::hours(1), now),
            BootOutcome::Resumed
        );
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;
        frames(&mut c, &mut now, 30);
        assert_eq!(first.sent_kinds(), INITIAL);
        assert_eq!(first.sent()[0].payload, json!({ "name": "alice" }));

        first.close();
        frames(&mut c, &mut now, 1);
        assert_eq!(c.state(), ConnectionState::Failed);
        now += Duration::from_secs(2);
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;
        frames(&mut c, &mut now, 30);

        assert_eq!(second.sent_kinds(), INITIAL);
        assert_eq!(first.sent_kinds().len(), INITIAL.len());
        assert_eq!(c.initial_sequences_sent(), 2);
    }

    #[tokio::test]
    async fn invalid_token_stays_idle_and_sends_nothing() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut store = MemoryStore {
            session: Some(StoredSession::new("", "alice")),
            clears: 0,
        };
        let mut now = Instant::now();

        assert_eq!(
            c.boot(&mut store, &MaxAgeValidator::hours(1), now),
            BootOutcome::Invalidated
        );
        assert!(store.session.is_none());
        assert_eq!(store.clears, 1);

        for _ in 0..20 {
            now += Duration::from_secs(1);
            c.tick(now, FRAME);
            tokio::task::yield_now().await;
        }
        assert_eq!(c.state(), ConnectionState::Idle);
        assert_eq!(dialer.dials(), 0);
        assert!(link.sent().is_empty());
        assert!(c.pause_game().is_err());
    }

    #[tokio::test]
    async fn no_session_waits_for_login() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut store = MemoryStore::default();
        let mut now = Instant::now();

        assert_eq!(
            c.boot(&mut store, &MaxAgeValidator::hours(1), now),
            BootOutcome::NoSession
        );
        frames(&mut c, &mut now, 10);
        assert_eq!(c.state(), ConnectionState::Idle);

        let out = c.exec_console("login bob tok-9", &mut store, now).unwrap();
        assert_eq!(out, ["Logged in as bob"]);
        assert_eq!(store.session.as_ref().map(|s| s.username.as_str()), Some("bob"));
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;
        frames(&mut c, &mut now, 1);
        assert_eq!(link.sent()[0].payload, json!({ "name": "bob" }));
    }

    #[tokio::test]
    async fn room_left_resets_world_and_effects() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut now = Instant::now();
        c.boot(&mut stored("alice"), &MaxAgeValidator::hours(1), now);
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;

        link.push(inbound::ROOM_JOINED, json!({ "room_id": "pvp-7", "player_id": "alice" }));
        link.push(
            inbound::STATE_UPDATE,
            json!({
                "units": [unit(1, "alice", 100.0, 400.0, 100), unit(2, "bob", 300.0, 120.0, 100)],
                "bases": [base(1, "alice", 520.0, 1000), base(2, "bob", 40.0, 1000)]
            }),
        );
        frames(&mut c, &mut now, 2);
        link.push(
            inbound::STATE_UPDATE,
            json!({ "units": [unit(2, "bob", 300.0, 120.0, 40)], "bases": [base(1, "alice", 520.0, 700)] }),
        );
        frames(&mut c, &mut now, 2);

        let ghost = c.effects().get(FxKey::Unit(UnitId(2))).copied().unwrap();
        assert!(ghost.ghost_hp > 40.0);
        assert!(c.effects().get(FxKey::Base(BaseId(1))).is_some());
        assert!(c.world().match_view().is_pvp);

        link.push(inbound::LEFT_ROOM, json!({}));
        frames(&mut c, &mut now, 1);

        assert!(c.world().room_id().is_none());
        assert!(c.world().units().is_empty());
        assert!(c.world().bases().is_empty());
        assert!(c.world().projectiles().is_empty());
        assert!(c.world().spawn_animations().is_empty());
        assert!(c.effects().is_empty());
        c.present(&mut NullPresenter);
    }

    #[tokio::test]
    async fn pause_freezes_every_time_driven_subsystem() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut now = Instant::now();
        c.boot(&mut stored("alice"), &MaxAgeValidator::hours(1), now);
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;

        link.push(inbound::ROOM_JOINED, json!({ "room_id": "r1", "player_id": "alice" }));
        link.push(
            inbound::STATE_UPDATE,
            json!({ "units": [unit(1, "alice", 0.0, 0.0, 100), unit(3, "bob", 700.0, 500.0, 100)] }),
        );
        // Two frames always cover at least one fixed step.
        frames(&mut c, &mut now, 2);
        link.push(
            inbound::STATE_UPDATE,
            json!({ "units": [unit(1, "alice", 400.0, 300.0, 30)] }),
        );
        link.push(
            inbound::UNIT_SPAWNED,
            json!({ "unit": unit(2, "alice", 200.0, 200.0, 100), "from_x": 0.0, "from_y": 600.0 }),
        );
        frames(&mut c, &mut now, 2);

        c.pause_game().unwrap();
        assert_eq!(link.sent_kinds().last().map(String::as_str), Some("PauseGame"));
        link.push(inbound::GAME_PAUSED, json!({}));
        frames(&mut c, &mut now, 1);
        assert!(c.clock().is_paused());

        let pos = c.world().units()[&UnitId(1)].rendered();
        let anim = c.world().spawn_animations()[&UnitId(2)].progress;
        let ghost = c.effects().get(FxKey::Unit(UnitId(1))).copied().unwrap();
        let sim_ms = c.clock().now_ms();

        frames(&mut c, &mut now, 120);
        assert_eq!(c.world().units()[&UnitId(1)].rendered(), pos);
        assert_eq!(c.world().spawn_animations()[&UnitId(2)].progress, anim);
        assert_eq!(c.effects().get(FxKey::Unit(UnitId(1))).copied().unwrap(), ghost);
        assert_eq!(c.clock().now_ms(), sim_ms);

        link.push(inbound::GAME_RESUMED, json!({}));
        frames(&mut c, &mut now, 3);
        assert!(!c.clock().is_paused());
        assert_ne!(c.world().units()[&UnitId(1)].rendered(), pos);
        let resumed = c.effects().get(FxKey::Unit(UnitId(1))).copied().unwrap();
        assert!(resumed.ghost_hp < ghost.ghost_hp);
        assert!(c.clock().now_ms() > sim_ms);
    }

    #[tokio::test]
    async fn lost_connection_drops_match_state() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut now = Instant::now();
        c.boot(&mut stored("alice"), &MaxAgeValidator::hours(1), now);
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;

        link.push(inbound::ROOM_JOINED, json!({ "room_id": "r1", "player_id": "alice" }));
        link.push(inbound::STATE_UPDATE, json!({ "units": [unit(1, "alice", 0.0, 0.0, 100)] }));
        frames(&mut c, &mut now, 1);
        assert_eq!(c.world().units().len(), 1);

        link.close();
        let report = c.tick(now + FRAME, FRAME);
        assert_eq!(
            report.events,
            [ConnectEvent::Lost("connection lost".to_string())]
        );
        assert!(c.world().units().is_empty());
        assert!(c.status_text().starts_with("Connection failed: connection lost"));
    }

    #[tokio::test]
    async fn message_sent_just_before_close_is_still_handled() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut now = Instant::now();
        c.boot(&mut stored("alice"), &MaxAgeValidator::hours(1), now);
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;

        link.push(inbound::ERROR, json!({ "message": "kicked" }));
        link.close();
        let report = c.tick(now + FRAME, FRAME);

        assert_eq!(
            report.events,
            [ConnectEvent::Lost("connection lost".to_string())]
        );
        assert_eq!(report.dispatched, 1);
        assert_eq!(c.lobby().last_error.as_deref(), Some("kicked"));
        assert_eq!(c.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn logout_returns_to_idle_and_clears_session() {
        let link = MockLink::default();
        let dialer = Arc::new(MockDialer::new(vec![DialStep::ok(&link)]));
        let mut c = client(&dialer);
        let mut store = stored("alice");
        let mut now = Instant::now();
        c.boot(&mut store, &MaxAgeValidator::hours(1), now);
        run_until(&mut c, &mut now, |c| c.state() == ConnectionState::Connected).await;

        let out = c.exec_console("logout", &mut store, now).unwrap();
        assert_eq!(out, ["Logged out"]);
        assert_eq!(c.state(), ConnectionState::Idle);
        assert!(store.session.is_none());
        assert!(c.username().is_none());
        frames(&mut c, &mut now, 200);
        assert_eq!(dialer.dials(), 1);
    }
}
