//! WebSocket Quiz Server
//!
//! Async WebSocket front end for host and participant clients. Parses
//! protocol messages, routes commands through the session registry, and
//! forwards each client's subscribed session event stream down its
//! connection. All quiz logic lives in the engine; this layer only
//! translates.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::engine::errors::SessionError;
use crate::engine::roster::ParticipantId;
use crate::engine::session::SessionId;
use crate::network::gateway::BroadcastGateway;
use crate::network::protocol::{
    ClientMessage, ServerMessage, ProtocolError, SessionCreatedInfo, JoinedInfo,
};
use crate::network::registry::SessionRegistry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Quiz server errors.
#[derive(Debug, thiserror::Error)]
pub enum QuizServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session engine error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Connected client state.
struct ConnectedClient {
    /// Session this connection is attached to (host or participant).
    session_id: Option<SessionId>,
    /// Participant identity, if this connection joined as one.
    participant_id: Option<ParticipantId>,
    /// Connection time.
    #[allow(dead_code)]
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Message sender (for direct messaging to client).
    #[allow(dead_code)]
    sender: mpsc::Sender<ServerMessage>,
    /// Task forwarding the subscribed event stream to this client.
    event_task: Option<JoinHandle<()>>,
}

/// The quiz server.
pub struct QuizServer {
    /// Server configuration.
    config: ServerConfig,
    /// Command router.
    registry: Arc<SessionRegistry>,
    /// Event fan-out.
    gateway: Arc<BroadcastGateway>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl QuizServer {
    /// Create a new quiz server.
    pub fn new(
        config: ServerConfig,
        registry: Arc<SessionRegistry>,
        gateway: Arc<BroadcastGateway>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            gateway,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), QuizServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Quiz server listening on {}", self.config.bind_addr);

        // Spawn cleanup task
        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
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

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let registry = self.registry.clone();
        let gateway = self.gateway.clone();
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

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    session_id: None,
                    participant_id: None,
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                    event_task: None,
                });
            }

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

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(
                                            ProtocolError::invalid_input("Invalid message format"),
                                        )).await;
                                        continue;
                                    }
                                };

                                // Update activity
                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                Self::handle_client_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &registry,
                                    &gateway,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: wall_clock_ms(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();
            {
                let mut clients = clients.write().await;
                if let Some(client) = clients.remove(&addr) {
                    if let Some(task) = client.event_task {
                        task.abort();
                    }
                    if let (Some(session_id), Some(participant_id)) =
                        (client.session_id, client.participant_id)
                    {
                        debug!(
                            session = %uuid::Uuid::from_bytes(session_id),
                            participant = %participant_id.to_uuid_string(),
                            "Participant connection closed"
                        );
                    }
                }
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        registry: &Arc<SessionRegistry>,
        gateway: &Arc<BroadcastGateway>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::CreateSession(req) => {
                let Some(quiz_id) = req.quiz_id_bytes() else {
                    let _ = sender.send(ServerMessage::Error(
                        ProtocolError::invalid_input("Malformed quiz id"),
                    )).await;
                    return;
                };

                match registry.create_session(quiz_id).await {
                    Ok(created) => {
                        Self::attach_to_session(
                            addr, created.session_id, None, clients, gateway, sender,
                        ).await;
                        let _ = sender.send(ServerMessage::SessionCreated(SessionCreatedInfo {
                            session_id: uuid::Uuid::from_bytes(created.session_id).to_string(),
                            join_code: created.join_code,
                            quiz_title: created.quiz_title,
                            total_rounds: created.total_rounds,
                        })).await;
                    }
                    Err(e) => Self::send_error(sender, e).await,
                }
            }

            ClientMessage::Join(req) => {
                match registry.join_session(&req.code, &req.name).await {
                    Ok(joined) => {
                        Self::attach_to_session(
                            addr,
                            joined.session_id,
                            Some(joined.participant_id),
                            clients,
                            gateway,
                            sender,
                        ).await;
                        let _ = sender.send(ServerMessage::Joined(JoinedInfo::new(
                            &joined.session_id,
                            &joined.participant_id,
                            joined.quiz_title,
                        ))).await;
                    }
                    Err(e) => Self::send_error(sender, e).await,
                }
            }

            ClientMessage::SubmitAnswer(req) => {
                let (Some(session_id), Some(participant_id)) =
                    (req.session_id_bytes(), req.participant_id_bytes())
                else {
                    let _ = sender.send(ServerMessage::Error(
                        ProtocolError::invalid_input("Malformed session or participant id"),
                    )).await;
                    return;
                };

                match registry
                    .submit_answer(session_id, participant_id, req.question_id, req.option)
                    .await
                {
                    Ok(points) => {
                        let _ = sender.send(ServerMessage::AnswerAccepted {
                            question_id: req.question_id,
                            points,
                        }).await;
                    }
                    Err(e) => Self::send_error(sender, e).await,
                }
            }

            ClientMessage::Start { session_id } => {
                Self::handle_host_command(&session_id, "start", sender, |id| {
                    let registry = registry.clone();
                    async move { registry.start_session(id).await }
                }).await;
            }

            ClientMessage::Reveal { session_id } => {
                Self::handle_host_command(&session_id, "reveal", sender, |id| {
                    let registry = registry.clone();
                    async move { registry.reveal_round(id).await }
                }).await;
            }

            ClientMessage::Next { session_id } => {
                Self::handle_host_command(&session_id, "next", sender, |id| {
                    let registry = registry.clone();
                    async move { registry.next_round(id).await }
                }).await;
            }

            ClientMessage::End { session_id } => {
                Self::handle_host_command(&session_id, "end", sender, |id| {
                    let registry = registry.clone();
                    async move { registry.end_session(id).await }
                }).await;
            }

            ClientMessage::Leaderboard { session_id } => {
                let Some(id) = parse_session_id(&session_id) else {
                    let _ = sender.send(ServerMessage::Error(
                        ProtocolError::invalid_input("Malformed session id"),
                    )).await;
                    return;
                };

                match registry.leaderboard(id).await {
                    Ok(ranking) => {
                        let _ = sender.send(ServerMessage::Leaderboard { ranking }).await;
                    }
                    Err(e) => Self::send_error(sender, e).await,
                }
            }

            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: wall_clock_ms(),
                }).await;
            }
        }
    }

    /// Parse, run, and acknowledge a host lifecycle command.
    async fn handle_host_command<F, Fut>(
        session_id: &str,
        command: &str,
        sender: &mpsc::Sender<ServerMessage>,
        run: F,
    ) where
        F: FnOnce(SessionId) -> Fut,
        Fut: std::future::Future<Output = Result<(), SessionError>>,
    {
        let Some(id) = parse_session_id(session_id) else {
            let _ = sender.send(ServerMessage::Error(
                ProtocolError::invalid_input("Malformed session id"),
            )).await;
            return;
        };

        match run(id).await {
            Ok(()) => {
                let _ = sender.send(ServerMessage::Ack {
                    command: command.to_string(),
                }).await;
            }
            Err(e) => Self::send_error(sender, e).await,
        }
    }

    /// Bind a connection to a session: record the attachment and start
    /// forwarding the session's event stream down this connection.
    async fn attach_to_session(
        addr: SocketAddr,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        gateway: &Arc<BroadcastGateway>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let forwarder = Self::spawn_event_forwarder(gateway, session_id, sender.clone());

        let mut clients = clients.write().await;
        if let Some(client) = clients.get_mut(&addr) {
            client.session_id = Some(session_id);
            if participant_id.is_some() {
                client.participant_id = participant_id;
            }
            // One subscription per connection; replace any previous one.
            if let Some(old) = client.event_task.replace(forwarder) {
                old.abort();
            }
        }
    }

    /// Forward a session's event stream to one client until the
    /// connection closes.
    fn spawn_event_forwarder(
        gateway: &Arc<BroadcastGateway>,
        session_id: SessionId,
        sender: mpsc::Sender<ServerMessage>,
    ) -> JoinHandle<()> {
        let mut rx = gateway.subscribe(session_id);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(record) => {
                        if sender.send(ServerMessage::Event(record)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn send_error(sender: &mpsc::Sender<ServerMessage>, err: SessionError) {
        let _ = sender.send(ServerMessage::Error(
            ProtocolError::from_session_error(err),
        )).await;
    }

    /// Run cleanup loop: drop idle connections.
    async fn run_cleanup_loop(
        clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        idle_timeout: Duration,
    ) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let to_remove: Vec<_> = {
                let clients = clients.read().await;
                clients.iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                let mut clients = clients.write().await;
                if let Some(client) = clients.remove(&addr) {
                    if let Some(task) = client.event_task {
                        task.abort();
                    }
                    info!("Removed idle client {}", addr);
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }
}

/// Parse a session id from its UUID string form.
fn parse_session_id(s: &str) -> Option<SessionId> {
    uuid::Uuid::parse_str(s).ok().map(|u| u.into_bytes())
}

/// Wall time in milliseconds since the epoch, for pong replies.
fn wall_clock_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
