//! Protocol Messages
//!
//! The BomBerBox binary wire format. Every command starts with a one-byte
//! code:
//!
//! ```text
//! server -> client   0 DrawTile  [0, tile, row, column]
//!                    1 DrawText  [1, length, bytes...]
//! client -> server   2 Connect   [2, name bytes..., optional NUL]
//!                    3 Input     [3, event]
//! ```

use crate::game::input::PlayerEvent;
use crate::game::map::TileId;

/// Server command: draw a tile.
pub const COMMAND_DRAW_TILE: u8 = 0;
/// Server command: show a text line.
pub const COMMAND_DRAW_TEXT: u8 = 1;
/// Client command: handshake carrying the player name.
pub const COMMAND_CONNECT: u8 = 2;
/// Client command: one input event.
pub const COMMAND_INPUT: u8 = 3;

/// Longest text a DrawText command carries.
pub const MAX_TEXT_LEN: usize = 255;

/// Protocol violations. Logged and skipped, never fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A command code the server does not accept.
    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// An Input command with an unknown event code.
    #[error("unknown event code {0}")]
    UnknownEvent(u8),
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Encode a DrawTile command.
#[inline]
pub fn encode_draw_tile(tile: TileId, row: u8, column: u8) -> [u8; 4] {
    [COMMAND_DRAW_TILE, tile.code(), row, column]
}

/// Encode a DrawText command, cutting the text to 255 bytes on a character
/// boundary.
pub fn encode_draw_text(text: &str) -> Vec<u8> {
    let mut end = text.len().min(MAX_TEXT_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let bytes = &text.as_bytes()[..end];

    let mut frame = Vec::with_capacity(2 + bytes.len());
    frame.push(COMMAND_DRAW_TEXT);
    frame.push(bytes.len() as u8);
    frame.extend_from_slice(bytes);
    frame
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Handshake; the name is already cleaned up and may be empty.
    Connect {
        /// Player name.
        name: String,
    },
    /// One input event.
    Input(PlayerEvent),
}

/// Turn raw handshake bytes into a player name: cut at the first NUL,
/// limit to `max_len` bytes, decode lossily and trim.
pub fn sanitize_name(raw: &[u8], max_len: usize) -> String {
    let raw = raw.split(|b| *b == 0).next().unwrap_or_default();
    let raw = &raw[..raw.len().min(max_len)];
    let name = String::from_utf8_lossy(raw);
    name.trim().to_string()
}

/// Incremental decoder of the client byte stream.
///
/// Bytes before the first Connect code are skipped. The name runs to the
/// first NUL or to the end of the chunk that carried the Connect code, as
/// clients send it in a single write. Afterwards Input commands may be split
/// across chunks arbitrarily.
#[derive(Debug, Clone)]
pub struct ClientDecoder {
    name_max_len: usize,
    connected: bool,
    /// Input command waiting for its event byte.
    partial_input: bool,
}

impl ClientDecoder {
    /// Decoder accepting names of up to `name_max_len` bytes.
    pub fn new(name_max_len: usize) -> Self {
        Self {
            name_max_len,
            connected: false,
            partial_input: false,
        }
    }

    /// Whether the Connect command has been seen.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Decode one received chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ClientMessage, ProtocolError>> {
        let mut messages = Vec::new();
        let mut i = 0;

        if !self.connected {
            let Some(start) = chunk.iter().position(|b| *b == COMMAND_CONNECT) else {
                return messages;
            };
            let rest = &chunk[start + 1..];
            let name_len = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
            messages.push(Ok(ClientMessage::Connect {
                name: sanitize_name(&rest[..name_len], self.name_max_len),
            }));
            self.connected = true;
            // Skip the NUL terminator when present
            i = start + 1 + name_len + 1;
        }

        while i < chunk.len() {
            if self.partial_input {
                self.partial_input = false;
                messages.push(decode_event(chunk[i]));
                i += 1;
                continue;
            }

            match chunk[i] {
                COMMAND_INPUT => {
                    match chunk.get(i + 1) {
                        Some(code) => {
                            messages.push(decode_event(*code));
                            i += 2;
                        }
                        None => {
                            self.partial_input = true;
                            i += 1;
                        }
                    }
                }
                code => {
                    messages.push(Err(ProtocolError::UnknownCommand(code)));
                    i += 1;
                }
            }
        }

        messages
    }
}

fn decode_event(code: u8) -> Result<ClientMessage, ProtocolError> {
    PlayerEvent::from_code(code)
        .map(ClientMessage::Input)
        .ok_or(ProtocolError::UnknownEvent(code))
}
