//! Bomb and Explosion Resolver
//!
//! Dropping a bomb schedules a flame on its cell and on up to `range - 1`
//! cells in each axis direction. Every scheduled cell then runs a small
//! state machine once per tick:
//!
//! ```text
//! DisplayExplosion --timer 0--> RemoveExplosion --timer 0--> NoBomb
//!   (flame appears, kills)        (flame cleared, bomb refunded,
//!                                   obstacle destroyed)
//! ```

use tracing::debug;

use crate::config::ExplosionTiming;
use crate::core::rng::GameRng;
use crate::game::input::Direction;
use crate::game::map::{CellContent, ExplosionState, Grid, TileId};
use crate::game::player::PlayerId;
use crate::game::state::RoundState;

/// Bomb placement errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BombError {
    /// The cell already holds a bomb.
    #[error("cell (row {row}, column {column}) already holds a bomb")]
    CellOccupiedByBomb {
        /// Target row.
        row: usize,
        /// Target column.
        column: usize,
    },
}

/// Place a bomb and schedule its flames.
///
/// Each arm advances independently for steps `1..range`; it stops at the
/// border or at a wall (which is left untouched), and stops right after
/// scheduling a destructible obstacle. A cell `step` cells away fires
/// `step * propagation_delay` ticks after the centre.
///
/// An arm crossing a cell whose flame is still visible (`RemoveExplosion`)
/// re-arms it to `DisplayExplosion`. The flame tile stays on screen until the
/// new timer fires, but walking into it is harmless in the meantime: only
/// `RemoveExplosion` kills on entry.
pub fn drop_bomb(
    grid: &mut Grid,
    row: usize,
    column: usize,
    range: u32,
    owner: Option<PlayerId>,
    timing: &ExplosionTiming,
) -> Result<(), BombError> {
    let center = grid.cell_mut(row, column);
    if center.content == CellContent::Bomb {
        return Err(BombError::CellOccupiedByBomb { row, column });
    }

    center.content = CellContent::Bomb;
    center.tile = TileId::Bomb;
    center.owner = owner;
    center.explosion_state = ExplosionState::DisplayExplosion;
    center.explosion_timer = timing.fuse_ticks;

    let (rows, columns) = (grid.rows(), grid.columns());
    for direction in Direction::ALL {
        for step in 1..range as usize {
            let Some((r, c)) = direction.offset(row, column, step, rows, columns) else {
                break;
            };
            let cell = grid.cell_mut(r, c);
            if cell.content == CellContent::Wall {
                break;
            }

            cell.explosion_state = ExplosionState::DisplayExplosion;
            cell.explosion_timer = timing.fuse_ticks + step as u32 * timing.propagation_delay_ticks;

            if cell.content == CellContent::DestructibleObstacle {
                break;
            }
        }
    }

    Ok(())
}

/// Outcome of destroying an obstacle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnedItem {
    /// Nothing dropped.
    Nothing,
    /// A pickup was left on the cell.
    Item(CellContent),
    /// An ownerless bomb was armed on the cell.
    Bomb {
        /// Range of the new bomb.
        range: u32,
    },
}

/// Fill a just-destroyed obstacle cell.
///
/// With `item_probability` percent odds something appears, chosen uniformly
/// among a shield, a range bonus, a bomb bonus and an armed environmental
/// bomb; otherwise the cell is left empty.
pub fn spawn_item(
    grid: &mut Grid,
    rng: &mut GameRng,
    row: usize,
    column: usize,
    item_probability: u8,
    bomb_range: (u32, u32),
    timing: &ExplosionTiming,
) -> SpawnedItem {
    grid.cell_mut(row, column).set_content(CellContent::Empty);

    if !rng.percent_chance(item_probability) {
        return SpawnedItem::Nothing;
    }

    let item = match rng.next_int(4) {
        0 => CellContent::ItemShield,
        1 => CellContent::ItemBombRange,
        2 => CellContent::ItemBombsCount,
        _ => {
            let range = rng.next_int_range(bomb_range.0, bomb_range.1);
            return match drop_bomb(grid, row, column, range, None, timing) {
                Ok(()) => SpawnedItem::Bomb { range },
                Err(err) => {
                    debug!(%err, "Environmental bomb not armed");
                    SpawnedItem::Nothing
                }
            };
        }
    };

    grid.cell_mut(row, column).set_content(item);
    SpawnedItem::Item(item)
}

/// Advance every scheduled or visible flame by one tick.
///
/// Kills unshielded players on cells whose flame appears, refunds bombs to
/// their owners, destroys obstacles and queues the resulting tiles.
pub fn advance_explosions(state: &mut RoundState) {
    let timing = state.config.explosion_timing();
    let (rows, columns) = (state.grid.rows(), state.grid.columns());

    for row in 0..rows {
        for column in 0..columns {
            let cell = state.grid.cell_mut(row, column);
            match cell.explosion_state {
                ExplosionState::NoBomb => {}
                _ if cell.explosion_timer > 0 => {
                    cell.explosion_timer -= 1;
                }
                ExplosionState::DisplayExplosion => {
                    cell.explosion_state = ExplosionState::RemoveExplosion;
                    cell.explosion_timer = timing.display_ticks;
                    cell.tile = TileId::Explosion;
                    show_flame(state, row, column);
                }
                ExplosionState::RemoveExplosion => {
                    clear_flame(state, row, column, &timing);
                }
            }
        }
    }
}

fn show_flame(state: &mut RoundState, row: usize, column: usize) {
    state.broadcast_tile(TileId::Explosion, row, column);

    let victims: Vec<PlayerId> = state
        .players
        .iter()
        .filter(|p| p.alive && p.is_at(row, column) && !p.has_shield())
        .map(|p| p.id)
        .collect();
    for id in victims {
        state.set_dead(id);
    }

    state.redraw_players_at(row, column);
}

fn clear_flame(state: &mut RoundState, row: usize, column: usize, timing: &ExplosionTiming) {
    let cell = state.grid.cell_mut(row, column);
    cell.explosion_state = ExplosionState::NoBomb;
    cell.explosion_timer = 0;

    let content = cell.content;
    match content {
        CellContent::Bomb => {
            cell.set_content(CellContent::Empty);
            if let Some(owner) = cell.owner.take() {
                if let Some(player) = state.players.get_mut(owner) {
                    player.bombs_available += 1;
                }
            }
        }
        CellContent::DestructibleObstacle => {
            let item_probability = state.config.item_probability;
            let bomb_range = (
                state.config.environmental_bomb_range_min,
                state.config.environmental_bomb_range_max,
            );
            let spawned = spawn_item(
                &mut state.grid,
                &mut state.rng,
                row,
                column,
                item_probability,
                bomb_range,
                timing,
            );
            debug!(row, column, ?spawned, "Obstacle destroyed");
        }
        content => {
            cell.tile = content.tile();
        }
    }

    state.broadcast_cell(row, column);
    state.redraw_players_at(row, column);
}
