//! Player Registry
//!
//! Slot arena of every player known to the server. A slot keeps its record
//! after a disconnect so bomb ownership stays valid until the grid is
//! reloaded; the alive and connected counters are maintained on every
//! transition instead of being recounted.

use crate::network::port::ConnectionId;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Stable player identifier: the registry slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub usize);

impl PlayerId {
    /// Slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Per-player state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerState {
    /// Slot of this player.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Transport handle; `None` once disconnected.
    pub connection: Option<ConnectionId>,
    /// Current row.
    pub row: usize,
    /// Current column.
    pub column: usize,
    /// Bombs the player may still drop.
    pub bombs_available: u32,
    /// Reach of the player's bombs, counting the centre cell.
    pub explosion_range: u32,
    /// Still in the round.
    pub alive: bool,
    /// Remaining shield ticks, 0 when unshielded.
    pub shield_timer: u32,
    /// Ready flag used by the waiting room.
    pub ready: bool,
}

impl PlayerState {
    /// A freshly connected player, not yet spawned.
    pub fn new(id: PlayerId, name: String, connection: ConnectionId) -> Self {
        Self {
            id,
            name,
            connection: Some(connection),
            row: 0,
            column: 0,
            bombs_available: 0,
            explosion_range: 1,
            alive: false,
            shield_timer: 0,
            ready: false,
        }
    }

    /// Whether the player still has a transport.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Whether flames cannot kill the player right now.
    #[inline]
    pub fn has_shield(&self) -> bool {
        self.shield_timer > 0
    }

    /// Whether the player stands on `(row, column)`.
    #[inline]
    pub fn is_at(&self, row: usize, column: usize) -> bool {
        self.row == row && self.column == column
    }

    /// Place the player and reset the per-round stats.
    pub fn reset_for_round(&mut self, row: usize, column: usize, base_range: u32) {
        self.row = row;
        self.column = column;
        self.bombs_available = 1;
        self.explosion_range = base_range;
        self.shield_timer = 0;
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Fixed-capacity arena of players with a free list.
#[derive(Clone, Debug)]
pub struct PlayerRegistry {
    slots: Vec<Option<PlayerState>>,
    /// Free slot indices, lowest on top.
    free: Vec<usize>,
    alive_count: usize,
    connected_count: usize,
}

impl PlayerRegistry {
    /// Create a registry with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            free: (0..capacity).rev().collect(),
            alive_count: 0,
            connected_count: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether a slot is free.
    pub fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    /// Players currently alive.
    #[inline]
    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Players currently connected.
    #[inline]
    pub fn connected_count(&self) -> usize {
        self.connected_count
    }

    /// Register a new connected player in the lowest free slot.
    pub fn add(&mut self, name: String, connection: ConnectionId) -> Option<PlayerId> {
        let index = self.free.pop()?;
        let id = PlayerId(index);
        self.slots[index] = Some(PlayerState::new(id, name, connection));
        self.connected_count += 1;
        Some(id)
    }

    /// Player in slot `id`.
    pub fn get(&self, id: PlayerId) -> Option<&PlayerState> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Mutable player in slot `id`.
    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut PlayerState> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// All registered players in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerState> + '_ {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// Ids of connected players in slot order.
    pub fn connected_ids(&self) -> Vec<PlayerId> {
        self.iter()
            .filter(|p| p.is_connected())
            .map(|p| p.id)
            .collect()
    }

    /// Ids of alive players in slot order.
    pub fn alive_ids(&self) -> Vec<PlayerId> {
        self.iter().filter(|p| p.alive).map(|p| p.id).collect()
    }

    /// Player owning a transport handle.
    pub fn find_by_connection(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.iter()
            .find(|p| p.connection == Some(connection))
            .map(|p| p.id)
    }

    /// Mark a connected player alive. Returns false if nothing changed.
    pub fn mark_alive(&mut self, id: PlayerId) -> bool {
        match self.get_mut(id) {
            Some(player) if !player.alive && player.is_connected() => {
                player.alive = true;
                self.alive_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Mark a player dead. Returns false if it already was.
    pub fn mark_dead(&mut self, id: PlayerId) -> bool {
        match self.get_mut(id) {
            Some(player) if player.alive => {
                player.alive = false;
                self.alive_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop the transport of a player and return it, once.
    pub fn mark_disconnected(&mut self, id: PlayerId) -> Option<ConnectionId> {
        let connection = self.get_mut(id)?.connection.take()?;
        self.connected_count -= 1;
        Some(connection)
    }

    /// Free the slots of disconnected players.
    pub fn release_disconnected(&mut self) -> Vec<PlayerId> {
        let mut released = Vec::new();
        for index in 0..self.slots.len() {
            let gone = matches!(&self.slots[index], Some(p) if !p.is_connected());
            if gone {
                let id = PlayerId(index);
                self.mark_dead(id);
                self.slots[index] = None;
                self.free.push(index);
                released.push(id);
            }
        }
        // Keep the lowest index on top of the free list
        self.free.sort_unstable_by(|a, b| b.cmp(a));
        released
    }
}
