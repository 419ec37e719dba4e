//! Display Deltas
//!
//! Commands produced by the simulation for individual clients. They are
//! queued in order on the round state and flushed through the network port
//! once per tick, so every client sees the same ordering.

use crate::game::map::TileId;
use crate::game::player::PlayerId;
use crate::network::port::ConnectionId;

/// A command for one client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayCommand {
    /// Draw `tile` at `(row, column)`.
    DrawTile {
        /// Tile to draw.
        tile: TileId,
        /// Target row.
        row: u8,
        /// Target column.
        column: u8,
    },
    /// Show a status line.
    DrawText(String),
    /// Close the connection.
    Close,
}

/// A command addressed to a player's connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    /// Recipient player.
    pub player: PlayerId,
    /// Recipient transport.
    pub connection: ConnectionId,
    /// What to send.
    pub command: DisplayCommand,
}

impl Outbound {
    /// DrawTile for one recipient. Grid coordinates are bounded by the
    /// configuration to fit a byte.
    pub fn tile(
        player: PlayerId,
        connection: ConnectionId,
        tile: TileId,
        row: usize,
        column: usize,
    ) -> Self {
        Self {
            player,
            connection,
            command: DisplayCommand::DrawTile {
                tile,
                row: row as u8,
                column: column as u8,
            },
        }
    }

    /// DrawText for one recipient.
    pub fn text(player: PlayerId, connection: ConnectionId, text: impl Into<String>) -> Self {
        Self {
            player,
            connection,
            command: DisplayCommand::DrawText(text.into()),
        }
    }

    /// Close request for one recipient.
    pub fn close(player: PlayerId, connection: ConnectionId) -> Self {
        Self {
            player,
            connection,
            command: DisplayCommand::Close,
        }
    }
}
