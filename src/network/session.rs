//! Round Scheduling
//!
//! Drives the server through its lifecycle:
//!
//! ```text
//! WaitingForConnections -> RoundSetup -> RoundRunning -> RoundEnd -> RoundSetup
//!                                                                 \-> Terminated
//! ```
//!
//! The scheduler is the only owner of the [`RoundState`]. Connection tasks
//! reach it through the [`NetworkPort`], which never blocks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::GameConfig;
use crate::core::rng::{derive_round_seed, GameRng};
use crate::game::input::PlayerEvent;
use crate::game::map::MapError;
use crate::game::player::PlayerId;
use crate::game::state::RoundState;
use crate::game::tick::{round_outcome, tick, RoundOutcome};
use crate::maps::MapLoader;
use crate::network::port::{NetworkPort, PendingConnection};

/// Sent to everyone still connected when the server stops.
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down.";
/// Sent to connections beyond capacity.
pub const SERVER_FULL_NOTICE: &str = "Server is full.";
/// Sent to connections arriving while a round runs.
pub const ROUND_IN_PROGRESS_NOTICE: &str = "A round is in progress. You will join the next round.";
/// Broadcast when a round starts.
pub const ROUND_START_NOTICE: &str = "Go!";

/// Fatal scheduler errors. Both are operator mistakes, not runtime faults.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The map could not be loaded.
    #[error("map error: {0}")]
    Map(#[from] MapError),

    /// The map has fewer spawn points than connected players.
    #[error("map has {spawn_points} spawn points for {players} players")]
    NotEnoughSpawnPoints {
        /// Spawn points on the map.
        spawn_points: usize,
        /// Players to place.
        players: usize,
    },
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Collecting players until everyone is ready.
    WaitingForConnections,
    /// Loading the next map and spawning players.
    RoundSetup,
    /// Ticking.
    RoundRunning,
    /// Showing the result before the next round.
    RoundEnd,
    /// Done; every connection has been closed.
    Terminated,
}

/// The tick-owning task.
pub struct RoundScheduler<P: NetworkPort, L: MapLoader> {
    state: RoundState,
    port: P,
    loader: L,
    /// Per-process nonce feeding the round seeds.
    server_nonce: [u8; 16],
    round: u32,
    phase: SchedulerState,
    /// Connections waiting for the next round.
    late_joiners: Vec<PendingConnection>,
}

impl<P: NetworkPort, L: MapLoader> RoundScheduler<P, L> {
    /// Create a scheduler waiting for its first players.
    pub fn new(config: GameConfig, port: P, loader: L, server_nonce: [u8; 16]) -> Self {
        let rng = GameRng::for_round(&server_nonce, 0);
        Self {
            state: RoundState::new(config, rng),
            port,
            loader,
            server_nonce,
            round: 0,
            phase: SchedulerState::WaitingForConnections,
            late_joiners: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn phase(&self) -> SchedulerState {
        self.phase
    }

    /// Rounds started so far.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// The simulation state.
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// The transport.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutable transport.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Take every client that finished its handshake. While waiting they
    /// join the registry; during a round they wait for the next one.
    pub fn accept_connections(&mut self) {
        while let Some(pending) = self.port.poll_connection() {
            if self.phase == SchedulerState::WaitingForConnections {
                self.admit(pending, false);
                continue;
            }

            let occupied = self.state.players.connected_count() + self.late_joiners.len();
            if occupied < self.state.players.capacity() {
                info!(connection = %pending.connection, "Connection queued for the next round");
                if self
                    .port
                    .send_draw_text(pending.connection, ROUND_IN_PROGRESS_NOTICE)
                    .is_ok()
                {
                    self.late_joiners.push(pending);
                } else {
                    self.port.disconnect(pending.connection);
                }
            } else {
                warn!(connection = %pending.connection, "Rejecting connection: server full");
                self.port.reject(pending.connection, SERVER_FULL_NOTICE);
            }
        }
        self.flush();
    }

    fn admit(&mut self, pending: PendingConnection, ready: bool) -> Option<PlayerId> {
        let Some(id) = self.state.players.add(pending.name, pending.connection) else {
            warn!(connection = %pending.connection, "Rejecting connection: server full");
            self.port.reject(pending.connection, SERVER_FULL_NOTICE);
            return None;
        };

        let player = self.state.players.get_mut(id)?;
        if player.name.is_empty() {
            player.name = format!("Player {}", id.index() + 1);
        }
        player.ready = ready;
        let name = player.name.clone();

        info!(player = %id, connection = %pending.connection, name = %name, "Player joined");
        if !ready {
            self.state.send_text(
                id,
                &format!("Connected as {name}. Press the bomb key when ready."),
            );
        }
        Some(id)
    }

    /// Move queued late joiners into the registry, dropping any that left
    /// in the meantime. Input sent while waiting is discarded.
    fn admit_late_joiners(&mut self) {
        for pending in std::mem::take(&mut self.late_joiners) {
            let mut gone = false;
            while let Some(event) = self.port.poll_event(pending.connection) {
                if event == PlayerEvent::Disconnect {
                    gone = true;
                    break;
                }
            }
            if gone {
                debug!(connection = %pending.connection, "Late joiner left before the round");
                self.port.disconnect(pending.connection);
            } else {
                self.admit(pending, true);
            }
        }
    }

    // =========================================================================
    // Waiting room
    // =========================================================================

    /// Drain one event per waiting player. The bomb key toggles readiness,
    /// Disconnect frees the slot; moves are ignored.
    pub fn poll_waiting(&mut self) {
        let mut roster_changed = false;

        for id in self.state.players.connected_ids() {
            let Some(connection) = self.state.players.get(id).and_then(|p| p.connection) else {
                continue;
            };
            match self.port.poll_event(connection) {
                Some(PlayerEvent::DropBomb) => {
                    let Some(player) = self.state.players.get_mut(id) else {
                        continue;
                    };
                    player.ready = !player.ready;
                    let ready = player.ready;
                    info!(player = %id, ready, "Ready toggled");
                    let text = if ready {
                        "You are ready. Waiting for other players..."
                    } else {
                        "You are no longer ready."
                    };
                    self.state.send_text(id, text);
                    roster_changed = true;
                }
                Some(PlayerEvent::Disconnect) => {
                    self.state.remove_disconnected(id);
                    roster_changed = true;
                }
                Some(PlayerEvent::Move(_)) | None => {}
            }
        }

        if roster_changed {
            self.flush();
            self.state.players.release_disconnected();
            let ready = self.state.players.iter().filter(|p| p.is_connected() && p.ready).count();
            let connected = self.state.players.connected_count();
            self.state.broadcast_text(&format!("{ready}/{connected} players ready"));
        }
        self.flush();
    }

    /// At least two players are connected and all of them are ready.
    pub fn ready_to_start(&self) -> bool {
        self.state.players.connected_count() >= 2
            && self
                .state
                .players
                .iter()
                .filter(|p| p.is_connected())
                .all(|p| p.ready)
    }

    // =========================================================================
    // Rounds
    // =========================================================================

    /// Load a map, send it, spawn every connected player and start ticking.
    #[instrument(skip(self), fields(round = self.round + 1))]
    pub fn setup_round(&mut self) -> Result<(), SessionError> {
        self.drain_idle_input();
        self.state.players.release_disconnected();
        self.admit_late_joiners();

        self.round += 1;
        let seed = derive_round_seed(&self.server_nonce, self.round);
        self.state.rng = GameRng::for_round(&self.server_nonce, self.round);
        info!(seed = %hex::encode(seed.to_le_bytes()), "Round seed");

        let grid = self.loader.load_random_map(&mut self.state.rng)?;
        let players = self.state.players.connected_count();
        if grid.spawn_point_count() < players {
            error!(
                spawn_points = grid.spawn_point_count(),
                players, "Map cannot hold every player"
            );
            return Err(SessionError::NotEnoughSpawnPoints {
                spawn_points: grid.spawn_point_count(),
                players,
            });
        }

        self.state.set_grid(grid);
        self.state.send_full_grid();
        let spawned = self.state.spawn_players();
        self.state.broadcast_text(ROUND_START_NOTICE);
        self.flush();

        info!(players = spawned, "Round started");
        self.phase = SchedulerState::RoundRunning;
        Ok(())
    }

    /// Run one tick: queue late connections, drain at most one event per
    /// connected player, simulate, deliver. Returns the outcome once the
    /// round is over.
    pub fn run_tick(&mut self) -> Option<RoundOutcome> {
        self.accept_connections();

        let mut inputs = BTreeMap::new();
        for id in self.state.players.connected_ids() {
            let connection = self.state.players.get(id).and_then(|p| p.connection);
            if let Some(event) = connection.and_then(|c| self.port.poll_event(c)) {
                inputs.insert(id, event);
            }
        }

        let result = tick(&mut self.state, &inputs);
        if result.deaths > 0 {
            debug!(tick = result.tick, deaths = result.deaths, "Players died");
        }
        self.flush();

        let outcome = round_outcome(&self.state);
        if outcome.is_some() {
            self.phase = SchedulerState::RoundEnd;
        }
        outcome
    }

    /// Announce how the round ended.
    pub fn end_round(&mut self, outcome: RoundOutcome) {
        let text = match outcome {
            RoundOutcome::NotEnoughPlayers => "Not enough players, game over.".to_string(),
            RoundOutcome::Winner(id) => {
                let name = self
                    .state
                    .players
                    .get(id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                format!("{name} wins the round!")
            }
            RoundOutcome::Draw => "Everyone died, no winner this round.".to_string(),
        };

        info!(round = self.round, tick = self.state.tick, ?outcome, "Round ended");
        self.state.broadcast_text(&text);
        self.flush();
        self.phase = SchedulerState::RoundEnd;
    }

    /// Whether another round can start after the pause. Leaves announced
    /// during the pause are applied first.
    pub fn can_continue(&mut self) -> bool {
        self.drain_idle_input();
        self.state.players.connected_count() + self.late_joiners.len() >= 2
    }

    /// Empty every connected player's event queue outside a running round.
    /// Disconnects are applied; keys pressed meanwhile are dropped so they
    /// do not replay on the next map.
    pub fn drain_idle_input(&mut self) {
        for id in self.state.players.connected_ids() {
            let Some(connection) = self.state.players.get(id).and_then(|p| p.connection) else {
                continue;
            };
            let mut discarded = 0usize;
            while let Some(event) = self.port.poll_event(connection) {
                if event == PlayerEvent::Disconnect {
                    self.state.remove_disconnected(id);
                    break;
                }
                discarded += 1;
            }
            if discarded > 0 {
                debug!(player = %id, discarded, "Dropped input sent between rounds");
            }
        }

        let port = &mut self.port;
        self.late_joiners.retain(|pending| {
            while let Some(event) = port.poll_event(pending.connection) {
                if event == PlayerEvent::Disconnect {
                    debug!(connection = %pending.connection, "Late joiner left before the round");
                    port.disconnect(pending.connection);
                    return false;
                }
            }
            true
        });

        self.flush();
    }

    /// Close every connection, optionally telling players why first.
    pub fn terminate(&mut self, notice: Option<&str>) {
        if let Some(notice) = notice {
            self.state.broadcast_text(notice);
        }
        for id in self.state.players.connected_ids() {
            self.state.remove_disconnected(id);
        }
        self.flush();

        for pending in std::mem::take(&mut self.late_joiners) {
            match notice {
                Some(notice) => self.port.reject(pending.connection, notice),
                None => self.port.disconnect(pending.connection),
            }
        }

        info!(rounds = self.round, "Scheduler terminated");
        self.phase = SchedulerState::Terminated;
    }

    /// Deliver every queued command. A failed send means the peer is gone:
    /// the player is removed, which queues more commands for the others.
    pub fn flush(&mut self) {
        loop {
            let outbox = self.state.take_outbox();
            if outbox.is_empty() {
                break;
            }

            let mut failed = BTreeSet::new();
            for outbound in &outbox {
                if failed.contains(&outbound.player) {
                    continue;
                }
                if let Err(e) = self.port.send(outbound) {
                    debug!(player = %outbound.player, "Send failed: {}", e);
                    failed.insert(outbound.player);
                }
            }

            for id in failed {
                self.state.remove_disconnected(id);
            }
        }
    }

    // =========================================================================
    // Main loop
    // =========================================================================

    /// Run until terminated. The shutdown flag is checked between waiting
    /// polls, between ticks and before every round.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SessionError> {
        info!(
            max_players = self.state.players.capacity(),
            tick_ms = self.state.config.tick_period_ms,
            "Waiting for players"
        );

        loop {
            if shutdown_requested(&shutdown) && self.phase != SchedulerState::Terminated {
                info!("Shutdown requested");
                self.terminate(Some(SHUTDOWN_NOTICE));
            }

            match self.phase {
                SchedulerState::WaitingForConnections => {
                    self.accept_connections();
                    self.poll_waiting();
                    if self.ready_to_start() {
                        self.phase = SchedulerState::RoundSetup;
                        continue;
                    }
                    tokio::select! {
                        _ = sleep(self.state.config.wait_poll()) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                SchedulerState::RoundSetup => {
                    if let Err(e) = self.setup_round() {
                        error!("Round setup failed: {}", e);
                        self.terminate(Some(SHUTDOWN_NOTICE));
                        return Err(e);
                    }
                }
                SchedulerState::RoundRunning => {
                    let mut clock = TickClock::start(self.state.config.tick_period());
                    loop {
                        tokio::select! {
                            _ = sleep_until(clock.deadline()) => {}
                            _ = shutdown.changed() => break,
                        }
                        clock.advance();

                        if let Some(outcome) = self.run_tick() {
                            self.end_round(outcome);
                            break;
                        }
                        if shutdown_requested(&shutdown) {
                            break;
                        }
                    }
                }
                SchedulerState::RoundEnd => {
                    tokio::select! {
                        _ = sleep(self.state.config.round_pause()) => {}
                        _ = shutdown.changed() => {}
                    }
                    self.accept_connections();
                    if self.can_continue() {
                        self.phase = SchedulerState::RoundSetup;
                    } else {
                        self.terminate(None);
                    }
                }
                SchedulerState::Terminated => return Ok(()),
            }
        }
    }
}

/// Absolute tick deadlines: each one is the previous plus the period, so
/// time spent inside a tick never shifts the schedule.
#[derive(Clone, Copy, Debug)]
struct TickClock {
    period: Duration,
    deadline: Instant,
}

impl TickClock {
    fn start(period: Duration) -> Self {
        Self {
            period,
            deadline: Instant::now() + period,
        }
    }

    fn deadline(&self) -> Instant {
        self.deadline
    }

    fn advance(&mut self) {
        self.deadline += self.period;
    }
}

/// Set, or the sender is gone so it can never be set.
fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{CellContent, TileId};
    use crate::game::state::test_support::{test_config, OPEN_MAP};
    use crate::maps::{MapShape, MemoryMapLoader};
    use crate::network::port::test_support::RecordingPort;
    use crate::network::port::{ConnectionId, NetworkError};

    const THREE_SPAWN_MAP: &str = "\
WWWWWWWWWW
WS  S   SW
W        W
W        W
W        W
W        W
W        W
WWWWWWWWWW
";

    fn fast_config() -> GameConfig {
        GameConfig {
            tick_period_ms: 1,
            round_pause_ms: 1,
            wait_poll_ms: 1,
            ..test_config()
        }
    }

    type TestScheduler = RoundScheduler<RecordingPort, MemoryMapLoader>;

    fn scheduler_on<P: NetworkPort>(
        config: GameConfig,
        map: &str,
        port: P,
    ) -> RoundScheduler<P, MemoryMapLoader> {
        let shape = MapShape {
            rows: config.rows,
            columns: config.columns,
            obstacle_probability: config.obstacle_probability,
        };
        RoundScheduler::new(config, port, MemoryMapLoader::single(map, shape), [3u8; 16])
    }

    fn scheduler_with(config: GameConfig, map: &str) -> TestScheduler {
        scheduler_on(config, map, RecordingPort::default())
    }

    /// Recording port whose scripted events only show up once their time
    /// has come.
    #[derive(Debug, Default)]
    struct TimedPort {
        inner: RecordingPort,
        timed: Vec<(Instant, ConnectionId, PlayerEvent)>,
    }

    impl TimedPort {
        fn at(&mut self, after: Duration, connection: ConnectionId, event: PlayerEvent) {
            self.timed.push((Instant::now() + after, connection, event));
        }
    }

    impl NetworkPort for TimedPort {
        fn poll_connection(&mut self) -> Option<PendingConnection> {
            self.inner.poll_connection()
        }

        fn poll_event(&mut self, connection: ConnectionId) -> Option<PlayerEvent> {
            let now = Instant::now();
            let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timed)
                .into_iter()
                .partition(|(at, c, _)| *c == connection && *at <= now);
            self.timed = later;
            for (_, _, event) in due {
                self.inner.script(connection, &[event]);
            }
            self.inner.poll_event(connection)
        }

        fn send_draw_tile(
            &mut self,
            connection: ConnectionId,
            tile: TileId,
            row: u8,
            column: u8,
        ) -> Result<(), NetworkError> {
            self.inner.send_draw_tile(connection, tile, row, column)
        }

        fn send_draw_text(
            &mut self,
            connection: ConnectionId,
            text: &str,
        ) -> Result<(), NetworkError> {
            self.inner.send_draw_text(connection, text)
        }

        fn disconnect(&mut self, connection: ConnectionId) {
            self.inner.disconnect(connection);
        }
    }

    /// Two players connected and ready.
    fn ready_pair(scheduler: &mut TestScheduler) -> (ConnectionId, ConnectionId) {
        let a = scheduler.port_mut().connect(1, "alice");
        let b = scheduler.port_mut().connect(2, "bob");
        scheduler.accept_connections();
        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.port_mut().script(b, &[PlayerEvent::DropBomb]);
        scheduler.poll_waiting();
        (a, b)
    }

    #[test]
    fn test_waiting_room_texts() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "alice");
        let b = scheduler.port_mut().connect(2, "");
        scheduler.accept_connections();

        assert_eq!(
            scheduler.port().texts(a),
            vec!["Connected as alice. Press the bomb key when ready.".to_string()]
        );
        assert_eq!(
            scheduler.port().texts(b),
            vec!["Connected as Player 2. Press the bomb key when ready.".to_string()]
        );

        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.port_mut().script(b, &[PlayerEvent::Move(crate::game::input::Direction::Up)]);
        scheduler.poll_waiting();

        let texts = scheduler.port().texts(a);
        assert!(texts.contains(&"You are ready. Waiting for other players...".to_string()));
        assert_eq!(texts.last().unwrap(), "1/2 players ready");
        assert_eq!(scheduler.port().texts(b).last().unwrap(), "1/2 players ready");
        assert!(!scheduler.ready_to_start());

        scheduler.port_mut().script(b, &[PlayerEvent::DropBomb]);
        scheduler.poll_waiting();
        assert!(scheduler.ready_to_start());

        // Toggling again withdraws readiness
        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.poll_waiting();
        assert!(scheduler.port().texts(a).contains(&"You are no longer ready.".to_string()));
        assert!(!scheduler.ready_to_start());
    }

    #[test]
    fn test_single_ready_player_does_not_start() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "solo");
        scheduler.accept_connections();
        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.poll_waiting();
        assert!(!scheduler.ready_to_start());
    }

    #[test]
    fn test_waiting_disconnect_frees_slot() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "a");
        let b = scheduler.port_mut().connect(2, "b");
        scheduler.accept_connections();

        scheduler.port_mut().script(b, &[PlayerEvent::Disconnect]);
        scheduler.poll_waiting();

        assert!(scheduler.port().closed.contains(&b));
        assert_eq!(scheduler.state().players.connected_count(), 1);
        assert!(scheduler.state().players.has_free_slot());
        assert_eq!(scheduler.port().texts(a).last().unwrap(), "0/1 players ready");
    }

    #[test]
    fn test_server_full() {
        let config = GameConfig {
            max_players: 2,
            ..fast_config()
        };
        let mut scheduler = scheduler_with(config, OPEN_MAP);
        scheduler.port_mut().connect(1, "a");
        scheduler.port_mut().connect(2, "b");
        let c = scheduler.port_mut().connect(3, "c");
        scheduler.accept_connections();

        assert_eq!(scheduler.port().texts(c), vec![SERVER_FULL_NOTICE.to_string()]);
        assert!(scheduler.port().closed.contains(&c));
        assert_eq!(scheduler.state().players.connected_count(), 2);
    }

    #[test]
    fn test_round_start_spawn_tiles() {
        let config = GameConfig {
            rows: 15,
            columns: 20,
            ..fast_config()
        };
        let mut map = String::new();
        map.push_str(&format!("{}\n", "W".repeat(20)));
        map.push_str(&format!("WS{}SW\n", " ".repeat(16)));
        for _ in 0..12 {
            map.push_str(&format!("W{}W\n", " ".repeat(18)));
        }
        map.push_str(&format!("{}\n", "W".repeat(20)));

        let mut scheduler = scheduler_with(config, &map);
        let (a, b) = ready_pair(&mut scheduler);
        assert!(scheduler.ready_to_start());

        scheduler.setup_round().unwrap();
        assert_eq!(scheduler.phase(), SchedulerState::RoundRunning);
        assert_eq!(scheduler.round(), 1);

        let tiles_a = scheduler.port().tiles(a);
        assert!(tiles_a.contains(&(TileId::CurrentPlayer, 1, 1)));
        assert!(tiles_a.contains(&(TileId::OtherPlayer, 1, 18)));
        let tiles_b = scheduler.port().tiles(b);
        assert!(tiles_b.contains(&(TileId::OtherPlayer, 1, 1)));
        assert!(tiles_b.contains(&(TileId::CurrentPlayer, 1, 18)));

        // Full grid first, then the players
        assert_eq!(tiles_a.len(), 15 * 20 + 2);
        assert_eq!(scheduler.port().texts(a).last().unwrap(), ROUND_START_NOTICE);
    }

    #[test]
    fn test_too_few_spawn_points_is_fatal() {
        let one_spawn = OPEN_MAP.replacen('S', " ", 1);
        let mut scheduler = scheduler_with(fast_config(), &one_spawn);
        ready_pair(&mut scheduler);

        match scheduler.setup_round() {
            Err(SessionError::NotEnoughSpawnPoints { spawn_points, players }) => {
                assert_eq!((spawn_points, players), (1, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failed_send_removes_player() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let (a, b) = ready_pair(&mut scheduler);
        scheduler.port_mut().broken.insert(b);

        scheduler.setup_round().unwrap();
        let bob = scheduler.state().players.find_by_connection(b);
        assert_eq!(bob, None);
        assert_eq!(scheduler.state().players.connected_count(), 1);

        // Alice saw bob's spawn cleared
        assert_eq!(scheduler.port().tiles(a).last(), Some(&(TileId::Empty, 1, 8)));

        assert_eq!(scheduler.run_tick(), Some(RoundOutcome::NotEnoughPlayers));
        assert_eq!(scheduler.phase(), SchedulerState::RoundEnd);
    }

    #[test]
    fn test_disconnect_ends_round_at_tick_boundary() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let (a, b) = ready_pair(&mut scheduler);
        scheduler.setup_round().unwrap();

        assert_eq!(scheduler.run_tick(), None);
        scheduler.port_mut().script(b, &[PlayerEvent::Disconnect]);
        assert_eq!(scheduler.run_tick(), Some(RoundOutcome::NotEnoughPlayers));

        scheduler.end_round(RoundOutcome::NotEnoughPlayers);
        assert_eq!(
            scheduler.port().texts(a).last().unwrap(),
            "Not enough players, game over."
        );
        assert!(!scheduler.can_continue());
    }

    #[test]
    fn test_disconnect_during_pause_ends_game() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let (a, b) = ready_pair(&mut scheduler);
        scheduler.setup_round().unwrap();
        scheduler.end_round(RoundOutcome::Winner(PlayerId(0)));

        scheduler.port_mut().script(b, &[PlayerEvent::Disconnect]);
        scheduler.accept_connections();

        assert!(!scheduler.can_continue());
        assert!(scheduler.port().closed.contains(&b));
        assert!(!scheduler.port().closed.contains(&a));
        assert_eq!(scheduler.state().players.connected_count(), 1);
    }

    #[test]
    fn test_late_joiner_leaving_during_pause_is_not_counted() {
        let mut scheduler = scheduler_with(fast_config(), THREE_SPAWN_MAP);
        let (_, b) = ready_pair(&mut scheduler);
        scheduler.setup_round().unwrap();

        let c = scheduler.port_mut().connect(3, "carol");
        scheduler.run_tick();
        scheduler.end_round(RoundOutcome::Draw);

        scheduler.port_mut().script(b, &[PlayerEvent::Disconnect]);
        scheduler.port_mut().script(c, &[PlayerEvent::Move(crate::game::input::Direction::Up)]);
        assert!(scheduler.can_continue());

        scheduler.port_mut().script(c, &[PlayerEvent::Disconnect]);
        assert!(!scheduler.can_continue());
        assert!(scheduler.port().closed.contains(&b));
        assert!(scheduler.port().closed.contains(&c));
    }

    #[test]
    fn test_pause_input_not_replayed() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let (a, _) = ready_pair(&mut scheduler);
        scheduler.setup_round().unwrap();
        scheduler.end_round(RoundOutcome::Draw);

        scheduler.port_mut().script(
            a,
            &[PlayerEvent::Move(crate::game::input::Direction::Down), PlayerEvent::DropBomb],
        );
        scheduler.setup_round().unwrap();
        assert_eq!(scheduler.run_tick(), None);

        let alice = scheduler.state().players.get(PlayerId(0)).unwrap();
        assert_eq!((alice.row, alice.column), (1, 1));
        assert_eq!(alice.bombs_available, 1);
        assert_ne!(scheduler.state().grid.cell(1, 1).content, CellContent::Bomb);
        assert_eq!(scheduler.port().events.get(&a).map(|q| q.len()), Some(0));
    }

    #[test]
    fn test_winner_announcement() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let (a, _) = ready_pair(&mut scheduler);
        scheduler.setup_round().unwrap();

        scheduler.end_round(RoundOutcome::Winner(PlayerId(1)));
        assert_eq!(scheduler.port().texts(a).last().unwrap(), "bob wins the round!");
        scheduler.end_round(RoundOutcome::Draw);
        assert_eq!(
            scheduler.port().texts(a).last().unwrap(),
            "Everyone died, no winner this round."
        );
    }

    #[test]
    fn test_late_joiner_admitted_next_round() {
        let mut scheduler = scheduler_with(fast_config(), THREE_SPAWN_MAP);
        ready_pair(&mut scheduler);
        scheduler.setup_round().unwrap();

        let c = scheduler.port_mut().connect(3, "carol");
        scheduler.port_mut().script(c, &[PlayerEvent::DropBomb]);
        scheduler.run_tick();
        assert_eq!(scheduler.port().texts(c), vec![ROUND_IN_PROGRESS_NOTICE.to_string()]);
        assert_eq!(scheduler.state().players.find_by_connection(c), None);

        scheduler.setup_round().unwrap();
        let carol = scheduler.state().players.find_by_connection(c).unwrap();
        let player = scheduler.state().players.get(carol).unwrap();
        assert!(player.alive && player.ready);
        assert!(scheduler.port().tiles(c).contains(&(TileId::CurrentPlayer, 1, 8)));
        assert_eq!(scheduler.round(), 2);
    }

    #[test]
    fn test_terminate_closes_everyone() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let (a, b) = ready_pair(&mut scheduler);

        scheduler.terminate(Some(SHUTDOWN_NOTICE));
        assert_eq!(scheduler.phase(), SchedulerState::Terminated);
        for connection in [a, b] {
            assert!(scheduler.port().closed.contains(&connection));
            assert_eq!(scheduler.port().texts(connection).last().unwrap(), SHUTDOWN_NOTICE);
        }
    }

    #[tokio::test]
    async fn test_run_until_not_enough_players() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "alice");
        let b = scheduler.port_mut().connect(2, "bob");
        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.port_mut().script(b, &[PlayerEvent::DropBomb, PlayerEvent::Disconnect]);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        scheduler.run(shutdown_rx).await.unwrap();

        assert_eq!(scheduler.phase(), SchedulerState::Terminated);
        let texts = scheduler.port().texts(a);
        assert!(texts.contains(&ROUND_START_NOTICE.to_string()));
        assert!(texts.contains(&"Not enough players, game over.".to_string()));
        assert!(scheduler.port().closed.contains(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_clock_ignores_time_spent_in_tick() {
        let period = Duration::from_millis(10);
        let start = Instant::now();
        let mut clock = TickClock::start(period);
        assert_eq!(clock.deadline(), start + period);

        tokio::time::advance(period * 3 / 2).await;
        clock.advance();
        assert_eq!(clock.deadline(), start + period * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_tick_schedule_after_stall() {
        let config = GameConfig {
            tick_period_ms: 10,
            ..fast_config()
        };
        let mut scheduler = scheduler_with(config, OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "alice");
        let b = scheduler.port_mut().connect(2, "bob");
        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.port_mut().script(b, &[PlayerEvent::DropBomb]);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stall = async {
            sleep(Duration::from_millis(32)).await;
            // Clock jumps past the fourth deadline in one go
            tokio::time::advance(Duration::from_millis(15)).await;
        };
        let (elapsed, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(105), scheduler.run(shutdown_rx)),
            stall,
        );

        assert!(elapsed.is_err());
        assert_eq!(scheduler.phase(), SchedulerState::RoundRunning);
        // Deadlines at 10, 20, ..., 100 ms; the late one fires at 47 ms
        assert_eq!(scheduler.state().tick, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_shutdown_mid_round() {
        let config = GameConfig {
            tick_period_ms: 10,
            ..fast_config()
        };
        let mut scheduler = scheduler_with(config, OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "alice");
        let b = scheduler.port_mut().connect(2, "bob");
        scheduler.port_mut().script(a, &[PlayerEvent::DropBomb]);
        scheduler.port_mut().script(b, &[PlayerEvent::DropBomb]);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interrupt = async move {
            sleep(Duration::from_millis(55)).await;
            shutdown_tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(scheduler.run(shutdown_rx), interrupt);

        result.unwrap();
        assert_eq!(scheduler.phase(), SchedulerState::Terminated);
        assert_eq!(scheduler.state().tick, 5);
        for connection in [a, b] {
            assert_eq!(scheduler.port().texts(connection).last().unwrap(), SHUTDOWN_NOTICE);
            assert!(scheduler.port().closed.contains(&connection));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_plays_rounds_until_terminated() {
        let config = GameConfig {
            tick_period_ms: 10,
            round_pause_ms: 50,
            wait_poll_ms: 10,
            ..test_config()
        };
        let mut port = TimedPort::default();
        let a = port.inner.connect(1, "alice");
        let b = port.inner.connect(2, "bob");
        port.inner.script(a, &[PlayerEvent::DropBomb]);
        port.inner.script(b, &[PlayerEvent::DropBomb]);
        // Alice bombs her own spawn in round one; bob leaves during round two
        port.at(Duration::from_millis(5), a, PlayerEvent::DropBomb);
        port.at(Duration::from_millis(300), b, PlayerEvent::Disconnect);

        let mut scheduler = scheduler_on(config, OPEN_MAP, port);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        scheduler.run(shutdown_rx).await.unwrap();

        assert_eq!(scheduler.phase(), SchedulerState::Terminated);
        assert_eq!(scheduler.round(), 2);

        let texts = scheduler.port().inner.texts(a);
        let starts = texts.iter().filter(|t| t.as_str() == ROUND_START_NOTICE).count();
        assert_eq!(starts, 2);
        assert!(texts.contains(&"bob wins the round!".to_string()));
        assert_eq!(texts.last().unwrap(), "Not enough players, game over.");
        assert!(scheduler.port().inner.closed.contains(&a));
        assert!(scheduler.port().inner.closed.contains(&b));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut scheduler = scheduler_with(fast_config(), OPEN_MAP);
        let a = scheduler.port_mut().connect(1, "alice");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        scheduler.run(shutdown_rx).await.unwrap();

        assert_eq!(scheduler.phase(), SchedulerState::Terminated);
        // Shutdown is seen before the first accept
        assert!(scheduler.port().texts(a).is_empty());
    }
}
