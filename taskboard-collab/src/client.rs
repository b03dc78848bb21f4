//! WebSocket client for the realtime gateway.
//!
//! Used by the integration tests and by tools that want to follow a board.
//! The credential travels as `?token=` so plain WebSocket stacks can use it.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use taskboard_core::ProjectId;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::protocol::{ClientCommand, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the board client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// A frame from the gateway
    Server(ServerEvent),
}

pub struct BoardClient {
    server_url: String,
    token: String,

    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl BoardClient {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to the gateway.
    ///
    /// A rejected credential surfaces as [`ProtocolError::Handshake`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let url = format!(
            "{}/?token={}",
            self.server_url.trim_end_matches('/'),
            self.token
        );
        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(match e {
                    tungstenite::Error::Http(response) => {
                        ProtocolError::Handshake(response.status().to_string())
                    }
                    other => {
                        log::debug!("Connection to {} failed: {other}", self.server_url);
                        ProtocolError::ConnectionClosed
                    }
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: decode gateway frames
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(ClientEvent::Server(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Dropping undecodable frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send a command to the gateway.
    pub async fn send(&self, command: &ClientCommand) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let encoded = command.encode()?;
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn join(&self, project_id: ProjectId) -> Result<(), ProtocolError> {
        self.send(&ClientCommand::JoinProject { project_id }).await
    }

    pub async fn leave(&self, project_id: ProjectId) -> Result<(), ProtocolError> {
        self.send(&ClientCommand::LeaveProject { project_id }).await
    }

    /// Close the connection. The reader task reports `Disconnected`.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
