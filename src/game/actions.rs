//! Event Processor
//!
//! Applies one player event to the round: movement with item pickup,
//! bomb drops and disconnects.

use tracing::debug;

use crate::game::bomb::drop_bomb;
use crate::game::input::{Direction, PlayerEvent};
use crate::game::map::{CellContent, ExplosionState, TileId};
use crate::game::player::PlayerId;
use crate::game::state::RoundState;

/// Apply `event` from player `id`.
///
/// Dead players only have their disconnects honoured.
pub fn apply_event(state: &mut RoundState, id: PlayerId, event: PlayerEvent) {
    let alive = match state.players.get(id) {
        Some(player) => player.alive,
        None => return,
    };

    match event {
        PlayerEvent::Disconnect => state.remove_disconnected(id),
        _ if !alive => {
            debug!(player = %id, ?event, "Ignoring event from dead player");
        }
        PlayerEvent::Move(direction) => move_player(state, id, direction),
        PlayerEvent::DropBomb => drop_player_bomb(state, id),
    }
}

fn move_player(state: &mut RoundState, id: PlayerId, direction: Direction) {
    let Some(player) = state.players.get(id) else {
        return;
    };
    let (previous_row, previous_column) = (player.row, player.column);
    let shielded = player.has_shield();

    let Some((row, column)) = direction.offset(
        previous_row,
        previous_column,
        1,
        state.grid.rows(),
        state.grid.columns(),
    ) else {
        return;
    };

    let destination = state.grid.cell(row, column);
    if !destination.content.can_enter() {
        return;
    }
    let content = destination.content;
    let burning = destination.explosion_state == ExplosionState::RemoveExplosion;

    if let Some(player) = state.players.get_mut(id) {
        player.row = row;
        player.column = column;
    }

    if burning && !shielded {
        state.set_dead(id);
        redraw_vacated_cell(state, id, previous_row, previous_column);
        return;
    }

    pick_up(state, id, content, row, column);

    redraw_vacated_cell(state, id, previous_row, previous_column);
    state.draw_player(id);
}

/// Apply the pickup lying on `(row, column)`, if any, and clear it.
fn pick_up(state: &mut RoundState, id: PlayerId, content: CellContent, row: usize, column: usize) {
    if !content.is_item() {
        return;
    }
    let shield_duration = state.config.shield_duration_ticks;

    if let Some(player) = state.players.get_mut(id) {
        match content {
            CellContent::ItemShield => player.shield_timer = shield_duration,
            CellContent::ItemBombRange => player.explosion_range += 1,
            CellContent::ItemBombsCount => player.bombs_available += 1,
            _ => {}
        }
        debug!(player = %id, ?content, "Item picked up");
    }

    state.grid.cell_mut(row, column).set_content(CellContent::Empty);
}

/// Clear a cell a player just left, then restore what still sits there:
/// a bomb first, then one other alive player.
fn redraw_vacated_cell(state: &mut RoundState, mover: PlayerId, row: usize, column: usize) {
    state.broadcast_tile(TileId::Empty, row, column);

    if state.grid.cell(row, column).content == CellContent::Bomb {
        state.broadcast_tile(TileId::Bomb, row, column);
    }

    if let Some(other) = state.other_player_at(row, column, mover) {
        state.draw_player(other);
    }
}

fn drop_player_bomb(state: &mut RoundState, id: PlayerId) {
    let Some(player) = state.players.get(id) else {
        return;
    };
    if player.bombs_available == 0 {
        return;
    }
    let (row, column, range) = (player.row, player.column, player.explosion_range);
    let timing = state.config.explosion_timing();

    match drop_bomb(&mut state.grid, row, column, range, Some(id), &timing) {
        Ok(()) => {
            state.broadcast_tile(TileId::Bomb, row, column);
            state.draw_player(id);
            if let Some(player) = state.players.get_mut(id) {
                player.bombs_available -= 1;
            }
        }
        Err(err) => {
            debug!(player = %id, %err, "Bomb not dropped");
        }
    }
}
