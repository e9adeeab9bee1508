//! WebSocket Arena Server
//!
//! Async WebSocket server for participant connections.
//! Handles authentication, routes client actions to the arena, and pushes
//! notifications for the sessions each connection follows.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::env_or;
use crate::core::ids::{ParticipantId, SessionId};
use crate::engine::arena::Arena;
use crate::engine::queue::JoinOutcome;
use crate::error::ArenaResult;
use crate::game::events::SessionEvent;
use crate::network::auth::{authenticate, AuthConfig};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage, MAX_LIST_LIMIT,
};
use crate::notify::{BroadcastNotifier, Notification, Topic};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle time after which a silent connection is dropped.
    pub connection_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            connection_timeout: Duration::from_secs(120),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("RPS_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("RPS_MAX_CONNECTIONS", defaults.max_connections),
            connection_timeout: Duration::from_secs(env_or(
                "RPS_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout.as_secs(),
            ).max(1)),
            version: defaults.version,
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind or accept.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected client bookkeeping.
struct ConnectedClient {
    /// Participant identifier (after auth).
    participant: Option<ParticipantId>,
    /// Connection time.
    connected_at: Instant,
}

/// Per-connection routing state.
#[derive(Debug, Default)]
struct ConnectionState {
    participant: Option<ParticipantId>,
    following: BTreeSet<SessionId>,
}

impl ConnectionState {
    fn follow(&mut self, id: SessionId) {
        self.following.insert(id);
    }

    /// Whether a notification is addressed to this connection.
    fn wants(&mut self, notification: &Notification) -> bool {
        let Some(me) = &self.participant else {
            return false;
        };
        // Queue matches are announced on the new session's topic
        if let SessionEvent::Matched { session_id, first, second, .. } = &notification.event {
            if first == me || second == me {
                self.following.insert(*session_id);
            }
        }
        match &notification.topic {
            Topic::Participant(p) => p == me,
            Topic::Session(id) => self.following.contains(id),
        }
    }
}

/// State shared by every connection task.
struct ServerContext {
    config: ServerConfig,
    auth: AuthConfig,
    arena: Arc<Arena>,
    clients: RwLock<BTreeMap<SocketAddr, ConnectedClient>>,
}

/// The arena server.
pub struct GameServer {
    ctx: Arc<ServerContext>,
    notifier: Arc<BroadcastNotifier>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server in front of an arena. `notifier` must be the one
    /// the arena publishes to.
    pub fn new(config: ServerConfig, auth: AuthConfig, arena: Arc<Arena>, notifier: Arc<BroadcastNotifier>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(ServerContext {
                config,
                auth,
                arena,
                clients: RwLock::new(BTreeMap::new()),
            }),
            notifier,
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.ctx.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Arena server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.ctx.clients.read().await.len();
                            if clients_count >= self.ctx.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = self.ctx.clone();
        let mut events = self.notifier.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            ctx.clients.write().await.insert(addr, ConnectedClient {
                participant: None,
                connected_at: Instant::now(),
            });

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut state = ConnectionState::default();
            let mut last_activity = Instant::now();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        last_activity = Instant::now();
                        let parsed = match msg {
                            Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text),
                            Some(Ok(Message::Binary(data))) => ClientMessage::from_bytes(&data),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            Some(Ok(_)) => continue,
                        };

                        let reply = match parsed {
                            Ok(client_msg) => ctx.handle_client_message(addr, &mut state, client_msg).await,
                            Err(e) => {
                                debug!("Invalid message from {}: {}", addr, e);
                                ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "Invalid message format",
                                ))
                            }
                        };
                        if msg_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    notification = events.recv() => {
                        match notification {
                            Ok(n) => {
                                if state.wants(&n) && msg_tx.send(ServerMessage::Event(n)).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                // Clients recover by syncing
                                warn!("Client {} lagged, {} notification(s) dropped", addr, skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = sleep_until(last_activity + ctx.config.connection_timeout) => {
                        info!("Client {} idle, closing", addr);
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Let queued replies flush, then stop the writer
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), sender_task).await.is_err() {
                debug!("Writer for {} did not drain in time", addr);
            }

            ctx.cleanup(addr).await;
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// A receiver that fires when [`GameServer::shutdown`] is called.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.ctx.clients.read().await.len()
    }

    /// Get authenticated connection count.
    pub async fn authenticated_count(&self) -> usize {
        self.ctx
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.participant.is_some())
            .count()
    }
}

impl ServerContext {
    /// Handle a client message and produce the direct reply.
    async fn handle_client_message(
        &self,
        addr: SocketAddr,
        state: &mut ConnectionState,
        msg: ClientMessage,
    ) -> ServerMessage {
        let participant = match (&msg, state.participant.clone()) {
            (ClientMessage::Ping { timestamp }, _) => {
                return ServerMessage::Pong {
                    timestamp: *timestamp,
                    server_time: Utc::now().timestamp_millis().max(0) as u64,
                };
            }
            (ClientMessage::Auth(_), Some(_)) => {
                return error_reply(ErrorCode::AuthFailed, "Already authenticated");
            }
            (ClientMessage::Auth(req), None) => return self.handle_auth(addr, state, req).await,
            (_, None) => return error_reply(ErrorCode::NotAuthenticated, "Authenticate first"),
            (_, Some(participant)) => participant,
        };

        match self.dispatch(&participant, state, msg).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Request from {} rejected: {}", participant, e);
                ServerMessage::Error(ServerError::from(&e))
            }
        }
    }

    /// Handle authentication.
    async fn handle_auth(&self, addr: SocketAddr, state: &mut ConnectionState, req: &AuthRequest) -> ServerMessage {
        let participant = match authenticate(req.token.as_deref(), req.participant.as_deref(), &self.auth) {
            Ok(p) => p,
            Err(e) => {
                warn!("Authentication failed for {}: {}", addr, e);
                return ServerMessage::AuthResult(AuthResult {
                    success: false,
                    participant: None,
                    error: Some(e.to_string()),
                    server_version: self.config.version.clone(),
                });
            }
        };

        if let Some(client) = self.clients.write().await.get_mut(&addr) {
            client.participant = Some(participant.clone());
        }
        state.participant = Some(participant.clone());

        // Reconnecting participants pick their live sessions back up
        match self.arena.active_sessions(&participant).await {
            Ok(sessions) => sessions.iter().for_each(|s| state.follow(s.id)),
            Err(e) => warn!("Could not restore sessions for {}: {}", participant, e),
        }

        debug!("Client {} authenticated as {} (client {})", addr, participant, req.client_version);
        ServerMessage::AuthResult(AuthResult {
            success: true,
            participant: Some(participant),
            error: None,
            server_version: self.config.version.clone(),
        })
    }

    /// Route an authenticated request to the arena.
    async fn dispatch(
        &self,
        participant: &ParticipantId,
        state: &mut ConnectionState,
        msg: ClientMessage,
    ) -> ArenaResult<ServerMessage> {
        let arena = &self.arena;
        let session = match msg {
            ClientMessage::JoinQueue { stake } => match arena.join_queue(participant, stake).await? {
                JoinOutcome::Queued { stake, .. } => return Ok(ServerMessage::Queued { stake }),
                JoinOutcome::Matched { session, .. } => session,
            },
            ClientMessage::LeaveQueue => {
                let stakes = arena.leave_queue(participant).await?;
                return Ok(ServerMessage::QueueLeft { stakes });
            }
            ClientMessage::OpenChallenge { stake } => arena.open_challenge(participant, stake).await?,
            ClientMessage::AcceptChallenge { session_id } => arena.accept_challenge(&session_id, participant).await?,
            ClientMessage::Commit { session_id, commitment } => {
                arena.submit_commitment(&session_id, participant, commitment).await?
            }
            ClientMessage::Reveal { session_id, mv, nonce } => {
                arena.submit_reveal(&session_id, participant, mv, &nonce).await?
            }
            ClientMessage::SignResult { session_id, signature } => {
                arena.request_authorization(&session_id, participant, signature).await?
            }
            ClientMessage::Sync { session_id: Some(id) } => arena.session(&id).await?,
            ClientMessage::Sync { session_id: None } => {
                let sessions = arena.active_sessions(participant).await?;
                sessions.iter().for_each(|s| state.follow(s.id));
                return Ok(ServerMessage::Sessions { sessions });
            }
            ClientMessage::Profile => {
                return Ok(ServerMessage::Profile {
                    participant: arena.participant(participant).await?,
                });
            }
            ClientMessage::History { limit } => {
                let sessions = arena.history(participant, limit.min(MAX_LIST_LIMIT)).await?;
                return Ok(ServerMessage::Sessions { sessions });
            }
            ClientMessage::Leaderboard { limit } => {
                let entries = arena.leaderboard(limit.min(MAX_LIST_LIMIT)).await?;
                return Ok(ServerMessage::Leaderboard { entries });
            }
            ClientMessage::Auth(_) | ClientMessage::Ping { .. } => {
                return Ok(error_reply(ErrorCode::InvalidInput, "Unexpected message"));
            }
        };

        state.follow(session.id);
        Ok(ServerMessage::Session { session })
    }

    /// Drop a closed connection and run disconnect handling if it was the
    /// participant's last one.
    async fn cleanup(&self, addr: SocketAddr) {
        let (removed, still_connected) = {
            let mut clients = self.clients.write().await;
            let removed = clients.remove(&addr);
            let still_connected = match removed.as_ref().and_then(|c| c.participant.as_ref()) {
                Some(p) => clients.values().any(|c| c.participant.as_ref() == Some(p)),
                None => false,
            };
            (removed, still_connected)
        };

        if let Some(client) = removed {
            if let (Some(participant), false) = (client.participant, still_connected) {
                if let Err(e) = self.arena.disconnect(&participant).await {
                    warn!("Disconnect handling failed for {}: {}", participant, e);
                }
            }
            info!("Client {} cleaned up after {:?}", addr, client.connected_at.elapsed());
        }
    }
}

fn error_reply(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error(ServerError::new(code, message))
}
