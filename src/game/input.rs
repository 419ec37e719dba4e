//! Player Input
//!
//! The events a client can send and their one-byte wire codes.

// =============================================================================
// EVENT CODES
// =============================================================================

/// Wire code of the Up key.
pub const EVENT_CODE_UP: u8 = 1;
/// Wire code of the Down key.
pub const EVENT_CODE_DOWN: u8 = 2;
/// Wire code of the Left key.
pub const EVENT_CODE_LEFT: u8 = 3;
/// Wire code of the Right key.
pub const EVENT_CODE_RIGHT: u8 = 4;
/// Wire code of the bomb key (also toggles ready in the waiting room).
pub const EVENT_CODE_DROP_BOMB: u8 = 5;
/// Wire code of the Escape key.
pub const EVENT_CODE_DISCONNECT: u8 = 6;

// =============================================================================
// EVENTS
// =============================================================================

/// Movement direction on the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards row 0.
    Up,
    /// Towards the last row.
    Down,
    /// Towards column 0.
    Left,
    /// Towards the last column.
    Right,
}

impl Direction {
    /// All directions, in explosion propagation order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Cell `steps` away from `(row, column)`, or `None` past the border.
    #[inline]
    pub fn offset(
        self,
        row: usize,
        column: usize,
        steps: usize,
        rows: usize,
        columns: usize,
    ) -> Option<(usize, usize)> {
        let (row, column) = match self {
            Direction::Up => (row.checked_sub(steps)?, column),
            Direction::Down => (row.checked_add(steps)?, column),
            Direction::Left => (row, column.checked_sub(steps)?),
            Direction::Right => (row, column.checked_add(steps)?),
        };
        (row < rows && column < columns).then_some((row, column))
    }
}

/// One input event from a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayerEvent {
    /// Walk one cell.
    Move(Direction),
    /// Drop a bomb (ready toggle while waiting).
    DropBomb,
    /// Leave the game.
    Disconnect,
}

impl PlayerEvent {
    /// Decode a wire event code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            EVENT_CODE_UP => Some(PlayerEvent::Move(Direction::Up)),
            EVENT_CODE_DOWN => Some(PlayerEvent::Move(Direction::Down)),
            EVENT_CODE_LEFT => Some(PlayerEvent::Move(Direction::Left)),
            EVENT_CODE_RIGHT => Some(PlayerEvent::Move(Direction::Right)),
            EVENT_CODE_DROP_BOMB => Some(PlayerEvent::DropBomb),
            EVENT_CODE_DISCONNECT => Some(PlayerEvent::Disconnect),
            _ => None,
        }
    }

    /// Wire event code.
    pub fn code(self) -> u8 {
        match self {
            PlayerEvent::Move(Direction::Up) => EVENT_CODE_UP,
            PlayerEvent::Move(Direction::Down) => EVENT_CODE_DOWN,
            PlayerEvent::Move(Direction::Left) => EVENT_CODE_LEFT,
            PlayerEvent::Move(Direction::Right) => EVENT_CODE_RIGHT,
            PlayerEvent::DropBomb => EVENT_CODE_DROP_BOMB,
            PlayerEvent::Disconnect => EVENT_CODE_DISCONNECT,
        }
    }
}
