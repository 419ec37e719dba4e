//! Round State
//!
//! The single owner of everything a round mutates: grid, player registry,
//! random source and the queue of display commands. Only the tick-owning
//! task touches it, so none of it is shared or locked.

use tracing::{debug, info};

use crate::config::GameConfig;
use crate::core::rng::GameRng;
use crate::game::events::Outbound;
use crate::game::map::{Grid, TileId};
use crate::game::player::{PlayerId, PlayerRegistry};
use crate::network::port::ConnectionId;

/// Text sent to a player killed by a flame.
pub const DEATH_NOTICE: &str = "You are dead!";

/// Complete state of the arena.
#[derive(Clone, Debug)]
pub struct RoundState {
    /// Gameplay constants.
    pub config: GameConfig,

    /// Current arena; replaced at every round setup.
    pub grid: Grid,

    /// Every known player.
    pub players: PlayerRegistry,

    /// Random source for seeding, items and environmental bombs.
    pub rng: GameRng,

    /// Ticks run in the current round.
    pub tick: u32,

    /// Commands generated since the last flush.
    outbox: Vec<Outbound>,
}

impl RoundState {
    /// Create the state with an empty arena and no players.
    pub fn new(config: GameConfig, rng: GameRng) -> Self {
        let grid = Grid::empty(config.rows, config.columns);
        let players = PlayerRegistry::new(config.max_players);
        Self {
            config,
            grid,
            players,
            rng,
            tick: 0,
            outbox: Vec::new(),
        }
    }

    /// Install the arena of a new round.
    pub fn set_grid(&mut self, grid: Grid) {
        self.grid = grid;
        self.tick = 0;
    }

    // =========================================================================
    // Outbox
    // =========================================================================

    /// Queue a command.
    pub fn push(&mut self, outbound: Outbound) {
        self.outbox.push(outbound);
    }

    /// Take every queued command, in generation order.
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Commands queued so far.
    pub fn outbox(&self) -> &[Outbound] {
        &self.outbox
    }

    fn recipients(&self) -> Vec<(PlayerId, ConnectionId)> {
        self.players
            .iter()
            .filter_map(|p| p.connection.map(|c| (p.id, c)))
            .collect()
    }

    /// Send `tile` at `(row, column)` to every connected player.
    pub fn broadcast_tile(&mut self, tile: TileId, row: usize, column: usize) {
        for (player, connection) in self.recipients() {
            self.outbox.push(Outbound::tile(player, connection, tile, row, column));
        }
    }

    /// Redraw the stored tile of a cell for everyone.
    pub fn broadcast_cell(&mut self, row: usize, column: usize) {
        let tile = self.grid.cell(row, column).tile;
        self.broadcast_tile(tile, row, column);
    }

    /// Send a text line to one player, if still connected.
    pub fn send_text(&mut self, player: PlayerId, text: &str) {
        if let Some(connection) = self.players.get(player).and_then(|p| p.connection) {
            self.outbox.push(Outbound::text(player, connection, text));
        }
    }

    /// Send a text line to every connected player.
    pub fn broadcast_text(&mut self, text: &str) {
        for (player, connection) in self.recipients() {
            self.outbox.push(Outbound::text(player, connection, text));
        }
    }

    /// Draw a player for every client: `CurrentPlayer` for its own client,
    /// `OtherPlayer` for the others, followed by the shield overlay if active.
    pub fn draw_player(&mut self, id: PlayerId) {
        let (row, column, shielded) = match self.players.get(id) {
            Some(p) => (p.row, p.column, p.has_shield()),
            None => return,
        };

        for (recipient, connection) in self.recipients() {
            let tile = if recipient == id {
                TileId::CurrentPlayer
            } else {
                TileId::OtherPlayer
            };
            self.outbox.push(Outbound::tile(recipient, connection, tile, row, column));
        }

        if shielded {
            self.broadcast_tile(TileId::ShieldOverlay, row, column);
        }
    }

    /// Redraw every alive player standing on `(row, column)`.
    pub fn redraw_players_at(&mut self, row: usize, column: usize) {
        let standing: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|p| p.alive && p.is_at(row, column))
            .map(|p| p.id)
            .collect();
        for id in standing {
            self.draw_player(id);
        }
    }

    /// First alive player on `(row, column)` other than `except`.
    pub fn other_player_at(&self, row: usize, column: usize, except: PlayerId) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|p| p.id != except && p.alive && p.is_at(row, column))
            .map(|p| p.id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Kill a player. Idempotent: only the first call counts and notifies.
    pub fn set_dead(&mut self, id: PlayerId) {
        if !self.players.mark_dead(id) {
            return;
        }
        if let Some(player) = self.players.get(id) {
            info!(player = %id, name = %player.name, tick = self.tick, "Player died");
        }
        self.send_text(id, DEATH_NOTICE);
    }

    /// Forget a player's transport: close it, kill the player and erase its
    /// sprite. Idempotent.
    pub fn remove_disconnected(&mut self, id: PlayerId) {
        let was_alive = self.players.get(id).map(|p| p.alive).unwrap_or(false);
        let Some(connection) = self.players.mark_disconnected(id) else {
            return;
        };
        self.outbox.push(Outbound::close(id, connection));
        self.set_dead(id);

        if let Some(player) = self.players.get(id) {
            info!(player = %id, name = %player.name, "Player disconnected");
            if was_alive {
                let (row, column) = (player.row, player.column);
                self.broadcast_cell(row, column);
                self.redraw_players_at(row, column);
            }
        }
    }

    /// Place every connected player on its spawn point, in slot order, and
    /// reset its per-round stats. Returns the number of spawned players.
    pub fn spawn_players(&mut self) -> usize {
        let ids = self.players.connected_ids();
        let base_range = self.config.base_explosion_range;

        for (index, id) in ids.iter().enumerate() {
            let (row, column) = self.grid.spawn_point(index);
            if let Some(player) = self.players.get_mut(*id) {
                player.reset_for_round(row, column, base_range);
            }
            self.players.mark_alive(*id);
            debug!(player = %id, row, column, "Player spawned");
        }

        for id in &ids {
            self.draw_player(*id);
        }
        ids.len()
    }

    /// Send every cell of the arena to every connected player.
    pub fn send_full_grid(&mut self) {
        for (player, connection) in self.recipients() {
            let cells: Vec<Outbound> = self
                .grid
                .iter()
                .map(|(row, column, cell)| {
                    Outbound::tile(player, connection, cell.tile, row, column)
                })
                .collect();
            self.outbox.extend(cells);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::game::events::DisplayCommand;

    /// Small open arena with walls around and two spawn points.
    pub const OPEN_MAP: &str = "\
WWWWWWWWWW
WS      SW
W        W
W        W
W        W
W        W
W        W
WWWWWWWWWW
";

    pub fn test_config() -> GameConfig {
        GameConfig {
            rows: 8,
            columns: 10,
            obstacle_probability: 0,
            item_probability: 0,
            bomb_fuse_ticks: 3,
            propagation_delay_ticks: 1,
            explosion_display_ticks: 2,
            shield_duration_ticks: 5,
            ..GameConfig::default()
        }
    }

    /// Round with `players` connected players spawned on `map`.
    pub fn round_with(config: GameConfig, map: &str, players: usize) -> RoundState {
        let mut rng = GameRng::new(7);
        let grid = Grid::parse(
            map,
            config.rows,
            config.columns,
            config.obstacle_probability,
            &mut rng,
        )
        .unwrap();
        let mut state = RoundState::new(config, rng);
        state.set_grid(grid);
        for i in 0..players {
            state.players.add(format!("p{i}"), ConnectionId(100 + i as u64)).unwrap();
        }
        state.spawn_players();
        state.take_outbox();
        state
    }

    /// Tiles sent to `player`, in order.
    pub fn tiles_for(out: &[Outbound], player: PlayerId) -> Vec<(TileId, u8, u8)> {
        out.iter()
            .filter(|o| o.player == player)
            .filter_map(|o| match o.command {
                DisplayCommand::DrawTile { tile, row, column } => Some((tile, row, column)),
                _ => None,
            })
            .collect()
    }

    /// Texts sent to `player`, in order.
    pub fn texts_for(out: &[Outbound], player: PlayerId) -> Vec<String> {
        out.iter()
            .filter(|o| o.player == player)
            .filter_map(|o| match &o.command {
                DisplayCommand::DrawText(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::game::events::DisplayCommand;

    #[test]
    fn test_spawn_per_recipient_tiles() {
        let mut rng = GameRng::new(7);
        let config = test_config();
        let grid = Grid::parse(OPEN_MAP, 8, 10, 0, &mut rng).unwrap();
        let mut state = RoundState::new(config, rng);
        state.set_grid(grid);
        let a = state.players.add("a".to_string(), ConnectionId(1)).unwrap();
        let b = state.players.add("b".to_string(), ConnectionId(2)).unwrap();

        assert_eq!(state.spawn_players(), 2);
        let out = state.take_outbox();

        let for_a = tiles_for(&out, a);
        assert!(for_a.contains(&(TileId::CurrentPlayer, 1, 1)));
        assert!(for_a.contains(&(TileId::OtherPlayer, 1, 8)));

        let for_b = tiles_for(&out, b);
        assert!(for_b.contains(&(TileId::OtherPlayer, 1, 1)));
        assert!(for_b.contains(&(TileId::CurrentPlayer, 1, 8)));

        assert_eq!(state.players.alive_count(), 2);
        let pa = state.players.get(a).unwrap();
        assert_eq!((pa.bombs_available, pa.explosion_range, pa.shield_timer), (1, 2, 0));
    }

    #[test]
    fn test_set_dead_notifies_once() {
        let mut state = round_with(test_config(), OPEN_MAP, 2);

        state.set_dead(PlayerId(0));
        state.set_dead(PlayerId(0));

        assert_eq!(state.players.alive_count(), 1);
        let out = state.take_outbox();
        assert_eq!(texts_for(&out, PlayerId(0)), vec![DEATH_NOTICE.to_string()]);
        assert!(texts_for(&out, PlayerId(1)).is_empty());
    }

    #[test]
    fn test_remove_disconnected_idempotent() {
        let mut state = round_with(test_config(), OPEN_MAP, 3);

        state.remove_disconnected(PlayerId(1));
        let first = state.take_outbox();
        state.remove_disconnected(PlayerId(1));
        let second = state.take_outbox();

        assert_eq!(state.players.connected_count(), 2);
        assert_eq!(state.players.alive_count(), 2);
        assert!(second.is_empty());

        // Close goes to the leaving player, nothing else does
        let to_leaver: Vec<_> = first.iter().filter(|o| o.player == PlayerId(1)).collect();
        assert_eq!(to_leaver.len(), 1);
        assert_eq!(to_leaver[0].command, DisplayCommand::Close);

        // Others see its cell cleared
        let spawn = state.grid.spawn_point(1);
        assert!(tiles_for(&first, PlayerId(0))
            .contains(&(TileId::Empty, spawn.0 as u8, spawn.1 as u8)));
    }

    #[test]
    fn test_disconnected_players_receive_nothing() {
        let mut state = round_with(test_config(), OPEN_MAP, 2);
        state.remove_disconnected(PlayerId(0));
        state.take_outbox();

        state.broadcast_text("hello");
        state.send_full_grid();
        let out = state.take_outbox();
        assert!(out.iter().all(|o| o.player == PlayerId(1)));
    }

    #[test]
    fn test_full_grid_covers_every_cell() {
        let mut state = round_with(test_config(), OPEN_MAP, 2);
        state.send_full_grid();
        let out = state.take_outbox();
        assert_eq!(tiles_for(&out, PlayerId(0)).len(), 80);
        assert_eq!(tiles_for(&out, PlayerId(0))[0], (TileId::Wall, 0, 0));
    }

    #[test]
    fn test_shield_overlay_follows_player_tile() {
        let mut state = round_with(test_config(), OPEN_MAP, 2);
        state.players.get_mut(PlayerId(0)).unwrap().shield_timer = 3;

        state.draw_player(PlayerId(0));
        let tiles = tiles_for(&state.take_outbox(), PlayerId(1));
        assert_eq!(
            tiles,
            vec![(TileId::OtherPlayer, 1, 1), (TileId::ShieldOverlay, 1, 1)]
        );
    }
}
