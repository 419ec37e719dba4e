//! # BomBerBox Arena Server
//!
//! Authoritative server for BomBerBox, a grid-based multiplayer bomber game.
//! Clients only render what they are told and send key presses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BOMBERBOX SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  └── rng.rs      - Seeded Xorshift128+ and round seeds       │
//! │                                                              │
//! │  game/           - Simulation (single owner, no I/O)         │
//! │  ├── map.rs      - Grid, cells, map text format              │
//! │  ├── player.rs   - Player slots and counters                 │
//! │  ├── input.rs    - Player events                             │
//! │  ├── bomb.rs     - Bombs, flames, items                      │
//! │  ├── actions.rs  - Applying one event                        │
//! │  ├── state.rs    - Round state and redraw helpers            │
//! │  ├── events.rs   - Queued display commands                   │
//! │  └── tick.rs     - One simulation step                       │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── port.rs     - Non-blocking transport interface          │
//! │  ├── protocol.rs - Binary command codec                      │
//! │  ├── server.rs   - TCP / WebSocket listeners                 │
//! │  └── session.rs  - Round scheduler                           │
//! │                                                              │
//! │  maps.rs         - Map sources                               │
//! │  config.rs       - Configuration                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Threading
//!
//! Only the scheduler task mutates the round. Connection tasks talk to it
//! through channels, so a slow or silent client never stalls a tick.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod maps;
pub mod network;

// Re-export commonly used types
pub use config::{Config, ConfigError, GameConfig, ServerConfig};
pub use core::rng::GameRng;
pub use game::map::{Grid, TileId};
pub use game::player::{PlayerId, PlayerState};
pub use game::state::RoundState;
pub use maps::{FileMapLoader, MapLoader, MapShape};
pub use network::{GameServer, RoundScheduler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
