//! Realtime gateway: one WebSocket session per connection, routed into
//! project rooms.
//!
//! Architecture:
//! ```text
//! Client A ──┐  handshake (Bearer / ?token=)
//!            ├── Session ── TransactionalMutator ── PositionStore
//! Client B ──┘      │
//!                   └── RoomManager ── project:{id} ── BroadcastGroup
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                           Client A      Client B      Client C
//! ```
//!
//! Session lifecycle:
//! `Connecting → Authenticated → Joined(project)* → Disconnected`.
//! A bad credential fails the HTTP upgrade with 401, so an unauthenticated
//! socket never exists. Command failures are answered with `task:error` to
//! the sender only; successful mutations go to the whole room.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use taskboard_core::{ProjectId, UserId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::access::{bearer_token, query_token, CredentialVerifier};
use crate::broadcast::{forward, PeerInfo, RoomManager, SessionId};
use crate::error::BoardError;
use crate::mutator::{MutatorConfig, TransactionalMutator};
use crate::protocol::{ClientCommand, ServerEvent};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the realtime gateway binds to
    pub ws_bind_addr: String,
    /// Address the REST surface binds to
    pub http_bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Conflict retries per mutation
    pub max_conflict_retries: u32,
    /// Whether REST mutations are broadcast to project rooms
    pub broadcast_http_mutations: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: "127.0.0.1:9090".to_string(),
            http_bind_addr: "127.0.0.1:8080".to_string(),
            broadcast_capacity: 256,
            storage_path: None,
            max_conflict_retries: MutatorConfig::default().max_conflict_retries,
            broadcast_http_mutations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl ServerConfig {
    /// Defaults overridden by `TASKBOARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` yields for:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `TASKBOARD_WS_ADDR` | `ws_bind_addr` |
    /// | `TASKBOARD_HTTP_ADDR` | `http_bind_addr` |
    /// | `TASKBOARD_BROADCAST_CAPACITY` | `broadcast_capacity` |
    /// | `TASKBOARD_STORAGE_PATH` | `storage_path` (empty = in-memory) |
    /// | `TASKBOARD_MAX_CONFLICT_RETRIES` | `max_conflict_retries` |
    /// | `TASKBOARD_BROADCAST_HTTP` | `broadcast_http_mutations` |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("TASKBOARD_WS_ADDR") {
            config.ws_bind_addr = addr;
        }
        if let Some(addr) = lookup("TASKBOARD_HTTP_ADDR") {
            config.http_bind_addr = addr;
        }
        if let Some(value) = lookup("TASKBOARD_BROADCAST_CAPACITY") {
            config.broadcast_capacity = parse_var("TASKBOARD_BROADCAST_CAPACITY", &value)?;
            if config.broadcast_capacity == 0 {
                return Err(ConfigError {
                    var: "TASKBOARD_BROADCAST_CAPACITY",
                    value,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(path) = lookup("TASKBOARD_STORAGE_PATH") {
            config.storage_path = (!path.trim().is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(value) = lookup("TASKBOARD_MAX_CONFLICT_RETRIES") {
            config.max_conflict_retries = parse_var("TASKBOARD_MAX_CONFLICT_RETRIES", &value)?;
        }
        if let Some(value) = lookup("TASKBOARD_BROADCAST_HTTP") {
            config.broadcast_http_mutations = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError {
                        var: "TASKBOARD_BROADCAST_HTTP",
                        value,
                        reason: "expected a boolean".to_string(),
                    })
                }
            };
        }

        Ok(config)
    }

    pub fn mutator_config(&self) -> MutatorConfig {
        MutatorConfig {
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub failed_commands: u64,
    pub active_rooms: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    /// Member of at least one project room
    Joined,
    Disconnected,
}

/// Per-connection state: who is on the socket and which rooms it follows.
///
/// Each joined room has a forwarder task pumping room frames into the
/// session's outbound queue; leaving or disconnecting aborts it.
pub struct Session {
    id: SessionId,
    user: Option<UserId>,
    state: SessionState,
    rooms: HashMap<ProjectId, JoinHandle<()>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            user: None,
            state: SessionState::Connecting,
            rooms: HashMap::new(),
        }
    }

    pub fn authenticate(&mut self, user: UserId) {
        if self.state == SessionState::Connecting {
            self.user = Some(user);
            self.state = SessionState::Authenticated;
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_joined(&self, project: &ProjectId) -> bool {
        self.rooms.contains_key(project)
    }

    pub fn joined_projects(&self) -> Vec<ProjectId> {
        self.rooms.keys().copied().collect()
    }

    /// Record membership of `project`, served by `forwarder`.
    pub fn enter(&mut self, project: ProjectId, forwarder: JoinHandle<()>) {
        if let Some(previous) = self.rooms.insert(project, forwarder) {
            previous.abort();
        }
        self.state = SessionState::Joined;
    }

    /// Drop membership of `project`. Returns whether it was joined.
    pub fn exit(&mut self, project: &ProjectId) -> bool {
        let Some(forwarder) = self.rooms.remove(project) else {
            return false;
        };
        forwarder.abort();
        if self.rooms.is_empty() && self.state == SessionState::Joined {
            self.state = SessionState::Authenticated;
        }
        true
    }

    /// Drop every membership. Returns the projects that were joined.
    pub fn close(&mut self) -> Vec<ProjectId> {
        let projects = self.joined_projects();
        for (_, forwarder) in self.rooms.drain() {
            forwarder.abort();
        }
        self.state = SessionState::Disconnected;
        projects
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    config: ServerConfig,
    mutator: Arc<TransactionalMutator>,
    rooms: Arc<RoomManager>,
    verifier: Arc<dyn CredentialVerifier>,
    stats: RwLock<ServerStats>,
}

/// The realtime gateway.
pub struct RealtimeGateway {
    shared: Arc<Shared>,
}

impl RealtimeGateway {
    pub fn new(
        config: ServerConfig,
        mutator: Arc<TransactionalMutator>,
        rooms: Arc<RoomManager>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                mutator,
                rooms,
                verifier,
                stats: RwLock::new(ServerStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.shared.rooms
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.shared.stats.read().await.clone();
        stats.active_rooms = self.shared.rooms.room_count().await;
        stats
    }

    /// Bind `ws_bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.shared.config.ws_bind_addr).await?;
        log::info!("Realtime gateway listening on {}", self.shared.config.ws_bind_addr);
        self.serve(listener).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<Shared>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut session = Session::new();

        let verifier = shared.verifier.clone();
        let mut authenticated: Option<UserId> = None;
        let handshake = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| match credential(request)
                .and_then(|token| verifier.verify(&token))
            {
                Some(user) => {
                    authenticated = Some(user);
                    Ok(response)
                }
                None => Err(unauthorized()),
            },
        )
        .await;

        let (ws_stream, user) = match (handshake, authenticated) {
            (Ok(ws), Some(user)) => {
                session.authenticate(user);
                (ws, user)
            }
            (result, _) => {
                shared.stats.write().await.rejected_handshakes += 1;
                match result {
                    Err(e) => log::warn!("Rejected handshake from {addr}: {e}"),
                    Ok(_) => log::warn!("Rejected handshake from {addr}: no user resolved"),
                }
                return Ok(());
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("Session {} opened for user {user} from {addr}", session.id());
        {
            let mut s = shared.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Room frames for this session, filled by one forwarder per joined room
        let (out_tx, mut out_rx) = mpsc::channel::<Arc<str>>(shared.config.broadcast_capacity.max(1));

        let outcome = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = shared.stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.len() as u64;
                                }
                                let reply = match ClientCommand::decode(text.as_str()) {
                                    Ok(command) => {
                                        log::debug!("Session {} sent {}", session.id(), command.name());
                                        Self::dispatch(&shared, &mut session, &out_tx, command).await
                                    }
                                    Err(e) => Err(BoardError::InvalidCommand(e.to_string())),
                                };
                                let reply = reply.unwrap_or_else(|err| {
                                    log::debug!("Command from session {} failed: {err}", session.id());
                                    Some(ServerEvent::error(&err))
                                });
                                if let Some(event) = reply {
                                    if matches!(event, ServerEvent::Error { .. }) {
                                        shared.stats.write().await.failed_commands += 1;
                                    }
                                    ws_sender.send(Message::text(event.encode()?)).await?;
                                }
                            }

                            Some(Ok(Message::Binary(_))) => {
                                let err = BoardError::InvalidCommand("binary frames are not supported".to_string());
                                ws_sender.send(Message::text(ServerEvent::error(&err).encode()?)).await?;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    frame = out_rx.recv() => {
                        match frame {
                            Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                            None => break,
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        // Cleanup: drop every membership
        for project in session.close() {
            shared.rooms.leave(&project, &session.id()).await;
        }
        {
            let mut s = shared.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Session {} closed", session.id());

        outcome
    }

    /// Run one command. `Ok(Some(_))` is a reply for the sender only.
    async fn dispatch(
        shared: &Shared,
        session: &mut Session,
        out_tx: &mpsc::Sender<Arc<str>>,
        command: ClientCommand,
    ) -> Result<Option<ServerEvent>, BoardError> {
        let user = session.user().ok_or(BoardError::Unauthorized)?;
        let mutator = &shared.mutator;

        let event = match command {
            ClientCommand::JoinProject { project_id } => {
                if !mutator.gate().check_access(project_id, user).await? {
                    return Err(BoardError::Forbidden {
                        user,
                        project: project_id,
                    });
                }
                if !session.is_joined(&project_id) {
                    let (room, rx) = shared
                        .rooms
                        .join(project_id, PeerInfo::new(session.id(), user))
                        .await;
                    let forwarder = forward(rx, out_tx.clone(), room, session.id());
                    session.enter(project_id, forwarder);
                    log::info!("Session {} joined project {project_id}", session.id());
                }
                return Ok(Some(ServerEvent::JoinedProject { project_id }));
            }

            ClientCommand::LeaveProject { project_id } => {
                if session.exit(&project_id) {
                    shared.rooms.leave(&project_id, &session.id()).await;
                    log::info!("Session {} left project {project_id}", session.id());
                }
                return Ok(Some(ServerEvent::LeftProject { project_id }));
            }

            ClientCommand::CreateTask {
                project_id,
                column_id,
                draft,
            } => ServerEvent::TaskCreated(
                mutator
                    .create_task(project_id, column_id.id(), draft, user)
                    .await?,
            ),

            ClientCommand::UpdateTask { task_id, patch } => {
                ServerEvent::TaskUpdated(mutator.update_task(task_id, patch, user).await?)
            }

            ClientCommand::DeleteTask { task_id } => {
                ServerEvent::TaskDeleted(mutator.delete_task(task_id, user).await?)
            }

            ClientCommand::MoveTask { task_id, column_id } => {
                ServerEvent::TaskMoved(mutator.move_task(task_id, column_id.id(), user).await?)
            }

            ClientCommand::ReorderTask {
                task_id,
                order_index,
            } => ServerEvent::TaskReordered(
                mutator.reorder_task(task_id, order_index, user).await?,
            ),
        };

        shared.rooms.publish(&event).await;
        Ok(None)
    }
}

/// Token from the `Authorization` header, else from `?token=`.
fn credential(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_owned)
        .or_else(|| query_token(request.uri()))
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("missing or invalid credential".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
