//! Game Server
//!
//! Async TCP (and optional WebSocket) listeners. Each connection gets a
//! reader task that performs the handshake and decodes input events, and a
//! writer task that drains the connection's outbound queue. The tick loop
//! only talks to them through [`ChannelPort`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::game::input::PlayerEvent;
use crate::game::map::TileId;
use crate::maps::{FileMapLoader, MapShape};
use crate::network::port::{ConnectionId, NetworkError, NetworkPort, PendingConnection};
use crate::network::protocol::{
    encode_draw_text, encode_draw_tile, ClientDecoder, ClientMessage, ProtocolError,
};
use crate::network::session::{RoundScheduler, SessionError};

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind a listener.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The round scheduler stopped on a fatal error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

// =============================================================================
// CONNECTION PLUMBING
// =============================================================================

/// Handshake result sent from a reader task to the port.
struct NewConnection {
    connection: ConnectionId,
    name: String,
    events: mpsc::Receiver<PlayerEvent>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// The tick loop's side of a connection.
struct ConnectionHandle {
    events: mpsc::Receiver<PlayerEvent>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Shared state handed to every connection task.
#[derive(Clone)]
struct ConnectionContext {
    next_id: Arc<AtomicU64>,
    registrations: mpsc::UnboundedSender<NewConnection>,
    inbound_capacity: usize,
    name_max_len: usize,
}

impl ConnectionContext {
    fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// [`NetworkPort`] over the per-connection channels.
pub struct ChannelPort {
    registrations: mpsc::UnboundedReceiver<NewConnection>,
    connections: BTreeMap<ConnectionId, ConnectionHandle>,
}

impl ChannelPort {
    fn new(registrations: mpsc::UnboundedReceiver<NewConnection>) -> Self {
        Self {
            registrations,
            connections: BTreeMap::new(),
        }
    }

    fn queue(&mut self, connection: ConnectionId, frame: Vec<u8>) -> Result<(), NetworkError> {
        let handle = self
            .connections
            .get(&connection)
            .ok_or(NetworkError::PeerGone(connection))?;
        handle
            .outbound
            .send(frame)
            .map_err(|_| NetworkError::PeerGone(connection))
    }
}

impl NetworkPort for ChannelPort {
    fn poll_connection(&mut self) -> Option<PendingConnection> {
        let registration = self.registrations.try_recv().ok()?;
        self.connections.insert(
            registration.connection,
            ConnectionHandle {
                events: registration.events,
                outbound: registration.outbound,
            },
        );
        Some(PendingConnection {
            connection: registration.connection,
            name: registration.name,
        })
    }

    fn poll_event(&mut self, connection: ConnectionId) -> Option<PlayerEvent> {
        let handle = self.connections.get_mut(&connection)?;
        match handle.events.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => Some(PlayerEvent::Disconnect),
        }
    }

    fn send_draw_tile(
        &mut self,
        connection: ConnectionId,
        tile: TileId,
        row: u8,
        column: u8,
    ) -> Result<(), NetworkError> {
        self.queue(connection, encode_draw_tile(tile, row, column).to_vec())
    }

    fn send_draw_text(&mut self, connection: ConnectionId, text: &str) -> Result<(), NetworkError> {
        self.queue(connection, encode_draw_text(text))
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        // Dropping the sender lets the writer flush and close
        if self.connections.remove(&connection).is_some() {
            debug!(%connection, "Connection released");
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: Config,
    /// Shutdown flag, flipped once.
    shutdown: watch::Receiver<bool>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: Config, shutdown: watch::Receiver<bool>) -> Self {
        Self { config, shutdown }
    }

    /// Bind the listeners and run rounds until the scheduler terminates.
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<(), GameServerError> {
        let (registrations_tx, registrations_rx) = mpsc::unbounded_channel();
        let context = ConnectionContext {
            next_id: Arc::new(AtomicU64::new(1)),
            registrations: registrations_tx,
            inbound_capacity: self.config.server.inbound_queue_capacity,
            name_max_len: self.config.game.player_name_max_len,
        };

        let tcp = bind(&self.config.server.bind_addr).await?;
        info!("Game server listening on {}", self.config.server.bind_addr);
        let mut listeners: Vec<JoinHandle<()>> = vec![tokio::spawn(accept_tcp(
            tcp,
            context.clone(),
            self.shutdown.clone(),
        ))];

        if let Some(ws_addr) = &self.config.server.ws_bind_addr {
            let ws = bind(ws_addr).await?;
            info!("WebSocket listener on {}", ws_addr);
            listeners.push(tokio::spawn(accept_ws(ws, context.clone(), self.shutdown.clone())));
        }

        let shape = MapShape {
            rows: self.config.game.rows,
            columns: self.config.game.columns,
            obstacle_probability: self.config.game.obstacle_probability,
        };
        let loader = FileMapLoader::new(
            self.config.server.maps_dir.clone(),
            self.config.server.map_file.clone(),
            shape,
        );
        let port = ChannelPort::new(registrations_rx);

        let server_nonce = *uuid::Uuid::new_v4().as_bytes();
        info!(nonce = %hex::encode(server_nonce), "Server nonce");

        let mut scheduler =
            RoundScheduler::new(self.config.game.clone(), port, loader, server_nonce);
        let result = scheduler.run(self.shutdown.clone()).await;

        for listener in listeners {
            listener.abort();
        }

        result.map_err(GameServerError::from)
    }
}

async fn bind(addr: &str) -> Result<TcpListener, GameServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| GameServerError::BindFailed {
            addr: addr.to_string(),
            source,
        })
}

async fn accept_tcp(
    listener: TcpListener,
    context: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(handle_tcp(stream, addr, context.clone()));
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            },
            _ = shutdown.changed() => {
                debug!("TCP listener stopping");
                break;
            }
        }
    }
}

async fn accept_ws(
    listener: TcpListener,
    context: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    info!("New WebSocket connection from {}", addr);
                    tokio::spawn(handle_ws(stream, addr, context.clone()));
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            },
            _ = shutdown.changed() => {
                debug!("WebSocket listener stopping");
                break;
            }
        }
    }
}

/// Forward decoded messages; returns false once the port stopped listening.
async fn forward(
    messages: Vec<Result<ClientMessage, ProtocolError>>,
    events: &mpsc::Sender<PlayerEvent>,
    addr: SocketAddr,
) -> bool {
    for message in messages {
        match message {
            Ok(ClientMessage::Input(event)) => {
                if events.send(event).await.is_err() {
                    return false;
                }
            }
            Ok(ClientMessage::Connect { .. }) => {}
            Err(e) => warn!("Protocol violation from {}: {}", addr, e),
        }
    }
    true
}

/// Register a connection whose handshake completed and return its event
/// sender plus the outbound receiver for the writer.
fn register(
    context: &ConnectionContext,
    name: String,
) -> Option<(ConnectionId, mpsc::Sender<PlayerEvent>, mpsc::UnboundedReceiver<Vec<u8>>)> {
    let connection = context.allocate_id();
    let (events_tx, events_rx) = mpsc::channel(context.inbound_capacity);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let registration = NewConnection {
        connection,
        name,
        events: events_rx,
        outbound: outbound_tx,
    };
    context.registrations.send(registration).ok()?;
    Some((connection, events_tx, outbound_rx))
}

/// Split the first decoded batch into the handshake name and what follows.
fn take_handshake(
    mut messages: Vec<Result<ClientMessage, ProtocolError>>,
) -> Option<(String, Vec<Result<ClientMessage, ProtocolError>>)> {
    let position = messages
        .iter()
        .position(|m| matches!(m, Ok(ClientMessage::Connect { .. })))?;
    let rest = messages.split_off(position + 1);
    match messages.pop() {
        Some(Ok(ClientMessage::Connect { name })) => Some((name, rest)),
        _ => None,
    }
}

async fn handle_tcp(stream: TcpStream, addr: SocketAddr, context: ConnectionContext) {
    let (reader, writer) = stream.into_split();
    serve_stream(reader, writer, addr, context).await;
}

/// Reader side of a byte-stream connection; spawns the writer once the
/// handshake is done.
async fn serve_stream<R, W>(mut reader: R, writer: W, addr: SocketAddr, context: ConnectionContext)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut decoder = ClientDecoder::new(context.name_max_len);
    let mut buf = [0u8; 256];

    // Handshake
    let (name, early) = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => {
                debug!("Client {} left before connecting", addr);
                return;
            }
            Ok(n) => n,
        };
        if let Some(handshake) = take_handshake(decoder.feed(&buf[..n])) {
            break handshake;
        }
    };

    let Some((connection, events, outbound)) = register(&context, name) else {
        return;
    };
    info!(%connection, "Client {} completed handshake", addr);
    tokio::spawn(write_stream(writer, outbound, connection));

    if forward(early, &events, addr).await {
        loop {
            tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(n) => {
                        if !forward(decoder.feed(&buf[..n]), &events, addr).await {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(%connection, "Read error: {}", e);
                        break;
                    }
                },
                _ = events.closed() => break,
            }
        }
    }

    // The tick loop may have released the connection already
    let _ = events.send(PlayerEvent::Disconnect).await;
    debug!(%connection, "Client {} reader finished", addr);
}

async fn write_stream<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    connection: ConnectionId,
)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!(%connection, "Write error: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn handle_ws(stream: TcpStream, addr: SocketAddr, context: ConnectionContext) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, GameServerError::from(e));
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut decoder = ClientDecoder::new(context.name_max_len);

    let (name, early) = loop {
        let data = match ws_receiver.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                debug!("WebSocket client {} left before connecting", addr);
                return;
            }
            Some(Ok(_)) => continue,
        };
        if let Some(handshake) = take_handshake(decoder.feed(&data)) {
            break handshake;
        }
    };

    let Some((connection, events, mut outbound)) = register(&context, name) else {
        return;
    };
    info!(%connection, "WebSocket client {} completed handshake", addr);

    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = ws_sender.send(Message::Binary(frame)).await {
                debug!(%connection, "WebSocket write error: {}", e);
                return;
            }
        }
        let _ = ws_sender.close().await;
    });

    if forward(early, &events, addr).await {
        loop {
            tokio::select! {
                message = ws_receiver.next() => {
                    let data = match message {
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(%connection, "WebSocket error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => continue,
                    };
                    if !forward(decoder.feed(&data), &events, addr).await {
                        break;
                    }
                }
                _ = events.closed() => break,
            }
        }
    }

    let _ = events.send(PlayerEvent::Disconnect).await;
    debug!(%connection, "WebSocket client {} reader finished", addr);
}
