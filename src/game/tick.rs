//! Simulation Tick
//!
//! One fixed-period step of a running round: player events, explosions,
//! shield timers. The round outcome is computed separately so the scheduler
//! can evaluate it after the tick's commands have been flushed.

use std::collections::BTreeMap;

use crate::game::actions::apply_event;
use crate::game::bomb::advance_explosions;
use crate::game::input::PlayerEvent;
use crate::game::player::PlayerId;
use crate::game::state::RoundState;

/// Result of a tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickResult {
    /// Tick number within the round.
    pub tick: u32,
    /// Events applied this tick.
    pub events_applied: usize,
    /// Players killed this tick.
    pub deaths: usize,
}

/// How a round finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Fewer than two players are still connected.
    NotEnoughPlayers,
    /// Exactly one player survived.
    Winner(PlayerId),
    /// Nobody survived.
    Draw,
}

/// Run one simulation tick.
///
/// # Order
///
/// 1. at most one event per player, in player id order
/// 2. explosion timers over the whole grid
/// 3. shield countdown
///
/// Commands are queued on `state`; nothing is sent from here.
pub fn tick(state: &mut RoundState, inputs: &BTreeMap<PlayerId, PlayerEvent>) -> TickResult {
    state.tick += 1;
    let alive_before = state.players.alive_count();

    // BTreeMap iterates in player id order
    for (id, event) in inputs {
        apply_event(state, *id, *event);
    }

    advance_explosions(state);
    update_shields(state);

    #[cfg(feature = "debug-tracing")]
    tracing::trace!(
        tick = state.tick,
        alive = state.players.alive_count(),
        explosions = state.grid.active_explosions(),
        queued = state.outbox().len(),
        "Tick complete"
    );

    TickResult {
        tick: state.tick,
        events_applied: inputs.len(),
        deaths: alive_before.saturating_sub(state.players.alive_count()),
    }
}

/// Count down shields; a player whose shield just ran out is redrawn
/// without the overlay.
fn update_shields(state: &mut RoundState) {
    let mut expired = Vec::new();
    for id in state.players.alive_ids() {
        if let Some(player) = state.players.get_mut(id) {
            if player.shield_timer > 0 {
                player.shield_timer -= 1;
                if player.shield_timer == 0 {
                    expired.push((id, player.row, player.column));
                }
            }
        }
    }

    for (id, row, column) in expired {
        state.broadcast_cell(row, column);
        state.draw_player(id);
    }
}

/// Whether the round is over, and how.
pub fn round_outcome(state: &RoundState) -> Option<RoundOutcome> {
    if state.players.connected_count() < 2 {
        return Some(RoundOutcome::NotEnoughPlayers);
    }
    match state.players.alive_count() {
        0 => Some(RoundOutcome::Draw),
        1 => state
            .players
            .alive_ids()
            .first()
            .map(|id| RoundOutcome::Winner(*id)),
        _ => None,
    }
}
