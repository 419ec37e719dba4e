//! Network Layer
//!
//! Transport plumbing between clients and the tick loop. Connection tasks
//! decode bytes into events; the scheduler polls them through
//! [`NetworkPort`] and never waits on a socket.

pub mod port;
pub mod protocol;
pub mod server;
pub mod session;

pub use port::{ConnectionId, NetworkError, NetworkPort, PendingConnection};
pub use protocol::{ClientDecoder, ClientMessage, ProtocolError};
pub use server::{ChannelPort, GameServer, GameServerError};
pub use session::{RoundScheduler, SchedulerState, SessionError};
