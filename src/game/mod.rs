//! Game Logic Module
//!
//! The arena simulation. Owned by a single task; no I/O happens here,
//! display commands are queued on the round state instead.
//!
//! ## Module Structure
//!
//! - `map`: grid, cells, tiles, map text format
//! - `player`: player records and the slot registry
//! - `input`: player events and their wire codes
//! - `bomb`: bomb placement and explosion lifecycle
//! - `actions`: applying one event to the round
//! - `state`: the round state and its redraw helpers
//! - `tick`: one simulation step and the round outcome
//! - `events`: display commands queued for clients

pub mod actions;
pub mod bomb;
pub mod events;
pub mod input;
pub mod map;
pub mod player;
pub mod state;
pub mod tick;

// Re-export key types
pub use bomb::{advance_explosions, drop_bomb, spawn_item, BombError};
pub use events::{DisplayCommand, Outbound};
pub use input::{Direction, PlayerEvent};
pub use map::{Cell, CellContent, ExplosionState, Grid, MapError, TileId};
pub use player::{PlayerId, PlayerRegistry, PlayerState};
pub use state::RoundState;
pub use tick::{round_outcome, tick, RoundOutcome, TickResult};
