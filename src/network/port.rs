//! Network Port
//!
//! The scheduler's view of the transport. Every call returns immediately:
//! polling with nothing pending yields `None`, and sends only enqueue.

use crate::game::events::{DisplayCommand, Outbound};
use crate::game::input::PlayerEvent;
use crate::game::map::TileId;

/// Opaque transport handle, unique for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport failures reported to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// The peer is gone; its writer has shut down.
    #[error("connection {0} is gone")]
    PeerGone(ConnectionId),
}

/// A client that completed the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConnection {
    /// Its transport handle.
    pub connection: ConnectionId,
    /// Name sent in the Connect command, possibly empty.
    pub name: String,
}

/// Non-blocking transport used by the round scheduler.
pub trait NetworkPort: Send {
    /// Next client that finished its handshake, if any.
    fn poll_connection(&mut self) -> Option<PendingConnection>;

    /// Next input event of a connection, if any.
    fn poll_event(&mut self, connection: ConnectionId) -> Option<PlayerEvent>;

    /// Queue a DrawTile command.
    fn send_draw_tile(
        &mut self,
        connection: ConnectionId,
        tile: TileId,
        row: u8,
        column: u8,
    ) -> Result<(), NetworkError>;

    /// Queue a DrawText command.
    fn send_draw_text(&mut self, connection: ConnectionId, text: &str) -> Result<(), NetworkError>;

    /// Close a connection once its queued commands are written.
    fn disconnect(&mut self, connection: ConnectionId);

    /// Deliver one queued display command.
    fn send(&mut self, outbound: &Outbound) -> Result<(), NetworkError> {
        match &outbound.command {
            DisplayCommand::DrawTile { tile, row, column } => {
                self.send_draw_tile(outbound.connection, *tile, *row, *column)
            }
            DisplayCommand::DrawText(text) => self.send_draw_text(outbound.connection, text),
            DisplayCommand::Close => {
                self.disconnect(outbound.connection);
                Ok(())
            }
        }
    }

    /// Tell a connection why it is refused, then close it.
    fn reject(&mut self, connection: ConnectionId, reason: &str) {
        // The peer may already be gone; closing is all that is left to do
        let _ = self.send_draw_text(connection, reason);
        self.disconnect(connection);
    }
}
