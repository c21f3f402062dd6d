//! WebSocket Lobby Server
//!
//! Async WebSocket endpoint for matchmaking connections. A connection
//! presents a join token and a requested group size as query parameters on
//! the upgrade request; anything invalid is closed with a policy-violation
//! code before it can touch shared state. Admitted connections get one
//! read task (this module) and one writer task draining the player's
//! outbound channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::lobby::{DisconnectKind, Lobby, LobbyConfig, PlayerHandle};
use crate::network::auth::{authenticate, AuthConfig, AuthError, IdentityDirectory};
use crate::network::protocol::{Envelope, MessageCode};

/// Default group size when the client does not ask for one.
const DEFAULT_GROUP_SIZE: usize = 2;

/// Outbound channel depth per connection.
const OUTBOUND_BUFFER: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Join-token validation settings.
    pub auth: AuthConfig,
    /// Matchmaking settings.
    pub lobby: LobbyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static address"),
            max_connections: 1000,
            auth: AuthConfig::default(),
            lobby: LobbyConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut lobby = LobbyConfig {
            runner: crate::lobby::runner::RunnerConfig::from_env(),
            ..LobbyConfig::default()
        };
        if let (Ok(min), Ok(max)) = (
            std::env::var("LOBBY_PORT_MIN"),
            std::env::var("LOBBY_PORT_MAX"),
        ) {
            if let (Ok(min), Ok(max)) = (min.parse(), max.parse()) {
                lobby.port_range = min..=max;
            }
        }

        Self {
            bind_addr: std::env::var("LOBBY_BIND_ADDR")
                .ok()
                .and_then(|addr| addr.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: defaults.max_connections,
            auth: AuthConfig::from_env(),
            lobby,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the configured address.
    #[error("failed to bind: {0}")]
    Bind(#[from] std::io::Error),
}

/// The matchmaking server.
pub struct LobbyServer {
    config: ServerConfig,
    lobby: Arc<Lobby>,
    directory: Arc<dyn IdentityDirectory>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LobbyServer {
    /// Create a new server resolving identities through `directory`.
    pub fn new(config: ServerConfig, directory: Arc<dyn IdentityDirectory>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            lobby: Arc::new(Lobby::new(config.lobby.clone())),
            config,
            directory,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!("lobby server listening on {}", addr);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::Acquire)
                                >= self.config.max_connections
                            {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawn the per-connection task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let lobby = self.lobby.clone();
        let directory = self.directory.clone();
        let auth = self.config.auth.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let mut query: Option<String> = None;
            let ws_stream = {
                let capture = |request: &Request, response: Response| {
                    query = request.uri().query().map(str::to_owned);
                    Ok(response)
                };
                match accept_hdr_async(stream, capture).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        debug!("websocket handshake failed for {}: {}", addr, e);
                        connections.fetch_sub(1, Ordering::AcqRel);
                        return;
                    }
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            // Admission: token and group size are checked before the
            // connection may touch any shared state.
            let (profile, group_size) =
                match admit(query.as_deref(), &auth, directory.as_ref()) {
                    Ok(admitted) => admitted,
                    Err(reason) => {
                        debug!("rejecting {}: {}", addr, reason);
                        let _ = ws_sender.send(policy_close(&reason)).await;
                        connections.fetch_sub(1, Ordering::AcqRel);
                        return;
                    }
                };

            let username = profile.username.clone();
            let (msg_tx, mut msg_rx) = mpsc::channel::<Envelope>(OUTBOUND_BUFFER);

            let player = PlayerHandle {
                username: username.clone(),
                profile,
                sender: msg_tx,
            };
            if let Err(e) = lobby.join(player, group_size).await {
                debug!("rejecting {}: {}", addr, e);
                let _ = ws_sender.send(policy_close(&e.to_string())).await;
                connections.fetch_sub(1, Ordering::AcqRel);
                return;
            }

            // Writer task: drains the outbound channel into the socket.
            // A session-abort notice is terminal by protocol contract, so
            // the writer closes the connection right after delivering it.
            let writer_task = tokio::spawn(async move {
                while let Some(envelope) = msg_rx.recv().await {
                    let terminal =
                        envelope.message_code() == Some(MessageCode::SessionAborted);
                    let text = match envelope.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("failed to serialize outbound message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    if terminal {
                        let _ = ws_sender
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "session aborted".into(),
                            })))
                            .await;
                        break;
                    }
                }
            });

            // Read loop: inbound frames feed the relay until the socket
            // goes away, one way or another.
            let mut close_kind = DisconnectKind::Abrupt;
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let envelope = match Envelope::from_json(&text) {
                                    Ok(envelope) => envelope,
                                    Err(e) => {
                                        debug!("invalid frame from {}: {}", username, e);
                                        continue;
                                    }
                                };
                                if let Err(e) =
                                    lobby.relay_message(&username, envelope).await
                                {
                                    debug!("frame from {} not relayed: {}", username, e);
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                close_kind = classify_close(frame.as_ref());
                                debug!(
                                    "{} closed the connection ({:?})",
                                    username, close_kind
                                );
                                break;
                            }
                            Some(Ok(_)) => {
                                // Binary, ping, pong: nothing to relay.
                            }
                            Some(Err(e)) => {
                                debug!("socket error for {}: {}", username, e);
                                close_kind = DisconnectKind::Abrupt;
                                break;
                            }
                            None => {
                                // Stream died without a close frame.
                                close_kind = DisconnectKind::Abrupt;
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        close_kind = DisconnectKind::Graceful;
                        break;
                    }
                }
            }

            writer_task.abort();
            lobby.disconnect(&username, close_kind).await;
            connections.fetch_sub(1, Ordering::AcqRel);
            info!("{} disconnected", username);
        });
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// The lobby this server feeds.
    pub fn lobby(&self) -> &Arc<Lobby> {
        &self.lobby
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
}

/// Validate the upgrade request's query parameters into an admitted
/// profile and group size. The error string becomes the close reason.
fn admit(
    query: Option<&str>,
    auth: &AuthConfig,
    directory: &dyn IdentityDirectory,
) -> Result<(crate::network::protocol::PublicProfile, usize), String> {
    let (token, players) = parse_join_query(query.unwrap_or(""));

    let token = token.ok_or_else(|| "missing join token".to_string())?;
    let profile = authenticate(&token, auth, directory).map_err(|e| match e {
        AuthError::Expired => "join token expired".to_string(),
        other => format!("invalid join token: {other}"),
    })?;

    let group_size = match players {
        None => DEFAULT_GROUP_SIZE,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| format!("invalid group size: {raw}"))?,
    };

    Ok((profile, group_size))
}

/// Pull `token` and `players` out of a query string.
fn parse_join_query(query: &str) -> (Option<String>, Option<String>) {
    let mut token = None;
    let mut players = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("token", value)) if !value.is_empty() => {
                token = Some(value.to_string());
            }
            Some(("players", value)) if !value.is_empty() => {
                players = Some(value.to_string());
            }
            _ => {}
        }
    }
    (token, players)
}

/// Map a received close frame onto the state machine's close kinds.
///
/// Going-away is the only abrupt code a peer actually sends; a vanished
/// stream (the 1006 case) never carries a frame and is classified where
/// the read loop observes it.
fn classify_close(frame: Option<&CloseFrame<'_>>) -> DisconnectKind {
    match frame {
        Some(frame) if frame.code == CloseCode::Away => DisconnectKind::Abrupt,
        Some(frame) if frame.code == CloseCode::Abnormal => DisconnectKind::Abrupt,
        Some(_) => DisconnectKind::Graceful,
        None => DisconnectKind::Abrupt,
    }
}

/// Policy-violation close frame (1008) with a human-readable reason.
fn policy_close(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Policy,
        reason: reason.to_string().into(),
    }))
}
