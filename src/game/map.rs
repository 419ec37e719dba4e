//! Arena Grid
//!
//! The cell array of a round, its spawn points, and the text format maps
//! are written in.

use std::path::PathBuf;

use crate::core::rng::GameRng;
use crate::game::player::PlayerId;

// =============================================================================
// ERRORS
// =============================================================================

/// Map loading errors.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The map file could not be read.
    #[error("cannot read map {path}: {source}")]
    Io {
        /// Map file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The text ended before the grid was complete.
    #[error("map ends before cell (row {row}, column {column})")]
    UnexpectedEnd {
        /// First missing row.
        row: usize,
        /// First missing column.
        column: usize,
    },

    /// A character outside the map alphabet.
    #[error("map cell (row {row}, column {column}) has invalid character {character:?}")]
    InvalidCharacter {
        /// Offending character.
        character: char,
        /// Row of the character.
        row: usize,
        /// Column of the character.
        column: usize,
    },

    /// No map file is available to load.
    #[error("no map files found in {0}")]
    NoMapsConfigured(PathBuf),
}

// =============================================================================
// TILES
// =============================================================================

/// Visual symbol sent to clients in DrawTile commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TileId {
    /// Floor.
    Empty = 0,
    /// Indestructible wall.
    Wall = 1,
    /// Obstacle a bomb can destroy.
    DestructibleObstacle = 2,
    /// The recipient's own player.
    CurrentPlayer = 3,
    /// Any other player.
    OtherPlayer = 4,
    /// Armed bomb.
    Bomb = 5,
    /// Visible flame.
    Explosion = 6,
    /// Drawn over a shielded player.
    ShieldOverlay = 7,
    /// Shield pickup.
    ItemShield = 8,
    /// Explosion range pickup.
    ItemBombRange = 9,
    /// Extra bomb pickup.
    ItemBombsCount = 10,
}

impl TileId {
    /// Wire byte of this tile.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// CELLS
// =============================================================================

/// What a cell holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CellContent {
    /// Walkable floor.
    Empty,
    /// Blocks movement and flames.
    Wall,
    /// Blocks movement, absorbs one flame arm, may drop an item.
    DestructibleObstacle,
    /// Walkable floor where a player starts a round.
    SpawnPoint,
    /// Walkable floor that is never seeded with obstacles.
    NoObstacleZone,
    /// Armed bomb.
    Bomb,
    /// Shield pickup.
    ItemShield,
    /// Explosion range pickup.
    ItemBombRange,
    /// Extra bomb pickup.
    ItemBombsCount,
}

impl CellContent {
    /// Tile shown for this content when no flame covers it.
    pub fn tile(self) -> TileId {
        match self {
            CellContent::Empty | CellContent::SpawnPoint | CellContent::NoObstacleZone => {
                TileId::Empty
            }
            CellContent::Wall => TileId::Wall,
            CellContent::DestructibleObstacle => TileId::DestructibleObstacle,
            CellContent::Bomb => TileId::Bomb,
            CellContent::ItemShield => TileId::ItemShield,
            CellContent::ItemBombRange => TileId::ItemBombRange,
            CellContent::ItemBombsCount => TileId::ItemBombsCount,
        }
    }

    /// Whether a player may walk onto a cell with this content.
    #[inline]
    pub fn can_enter(self) -> bool {
        !matches!(
            self,
            CellContent::Wall | CellContent::Bomb | CellContent::DestructibleObstacle
        )
    }

    /// Whether this content is a pickup.
    #[inline]
    pub fn is_item(self) -> bool {
        matches!(
            self,
            CellContent::ItemShield | CellContent::ItemBombRange | CellContent::ItemBombsCount
        )
    }
}

/// Explosion lifecycle of one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ExplosionState {
    /// No flame scheduled.
    #[default]
    NoBomb,
    /// Flame scheduled; becomes visible when the timer runs out.
    DisplayExplosion,
    /// Flame visible; cleared when the timer runs out.
    RemoveExplosion,
}

/// One grid position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    /// What the cell holds.
    pub content: CellContent,
    /// What clients currently see.
    pub tile: TileId,
    /// Flame lifecycle.
    pub explosion_state: ExplosionState,
    /// Ticks until the next explosion transition.
    pub explosion_timer: u32,
    /// Player whose bomb sits here, if any.
    pub owner: Option<PlayerId>,
}

impl Cell {
    /// A quiet cell holding `content`.
    pub fn new(content: CellContent) -> Self {
        Self {
            content,
            tile: content.tile(),
            explosion_state: ExplosionState::NoBomb,
            explosion_timer: 0,
            owner: None,
        }
    }

    /// Replace the content, keeping a visible flame on screen.
    pub fn set_content(&mut self, content: CellContent) {
        self.content = content;
        if self.explosion_state != ExplosionState::RemoveExplosion {
            self.tile = content.tile();
        }
    }

    /// Whether a flame is scheduled or visible here.
    #[inline]
    pub fn is_exploding(&self) -> bool {
        self.explosion_state != ExplosionState::NoBomb
    }
}

// =============================================================================
// GRID
// =============================================================================

/// The arena of one round.
#[derive(Clone, Debug)]
pub struct Grid {
    rows: usize,
    columns: usize,
    cells: Vec<Cell>,
    spawn_points: Vec<(usize, usize)>,
}

impl Grid {
    /// A grid of empty cells without spawn points.
    pub fn empty(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            cells: vec![Cell::new(CellContent::Empty); rows * columns],
            spawn_points: Vec::new(),
        }
    }

    /// Parse a map from its text form.
    ///
    /// Newlines (and carriage returns) are skipped; the first `rows * columns`
    /// remaining characters fill the grid in row-major order. Each `' '` cell
    /// independently becomes a destructible obstacle with
    /// `obstacle_probability` percent odds.
    pub fn parse(
        text: &str,
        rows: usize,
        columns: usize,
        obstacle_probability: u8,
        rng: &mut GameRng,
    ) -> Result<Self, MapError> {
        let mut grid = Self::empty(rows, columns);
        let mut chars = text.chars().filter(|c| *c != '\n' && *c != '\r');

        for row in 0..rows {
            for column in 0..columns {
                let character = chars
                    .next()
                    .ok_or(MapError::UnexpectedEnd { row, column })?;

                let content = match character {
                    ' ' => {
                        if rng.percent_chance(obstacle_probability) {
                            CellContent::DestructibleObstacle
                        } else {
                            CellContent::Empty
                        }
                    }
                    'W' => CellContent::Wall,
                    'D' => CellContent::DestructibleObstacle,
                    'S' => {
                        grid.spawn_points.push((row, column));
                        CellContent::SpawnPoint
                    }
                    'N' => CellContent::NoObstacleZone,
                    _ => {
                        return Err(MapError::InvalidCharacter { character, row, column });
                    }
                };

                grid.cells[row * columns + column] = Cell::new(content);
            }
        }

        Ok(grid)
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Whether `(row, column)` lies on the grid.
    #[inline]
    pub fn contains(&self, row: usize, column: usize) -> bool {
        row < self.rows && column < self.columns
    }

    /// Cell at `(row, column)`. Panics off the grid.
    #[inline]
    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        &self.cells[row * self.columns + column]
    }

    /// Mutable cell at `(row, column)`. Panics off the grid.
    #[inline]
    pub fn cell_mut(&mut self, row: usize, column: usize) -> &mut Cell {
        &mut self.cells[row * self.columns + column]
    }

    /// Iterate over `(row, column, cell)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Cell)> + '_ {
        let columns = self.columns;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, cell)| (i / columns, i % columns, cell))
    }

    /// Number of spawn points.
    #[inline]
    pub fn spawn_point_count(&self) -> usize {
        self.spawn_points.len()
    }

    /// Coordinates of the `index`-th spawn point in scan order.
    ///
    /// Returns the origin when `index` is out of range; callers check
    /// `spawn_point_count` first.
    pub fn spawn_point(&self, index: usize) -> (usize, usize) {
        self.spawn_points.get(index).copied().unwrap_or((0, 0))
    }

    /// All spawn points in scan order.
    pub fn spawn_points(&self) -> &[(usize, usize)] {
        &self.spawn_points
    }

    /// Number of cells with a scheduled or visible flame.
    pub fn active_explosions(&self) -> usize {
        self.cells.iter().filter(|c| c.is_exploding()).count()
    }
}
