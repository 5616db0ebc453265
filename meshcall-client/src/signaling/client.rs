use crate::room::Room;
use crate::signaling::{SignalingTransport, TransportEvent};
use async_trait::async_trait;
use meshcall_core::{Message, SignalingError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transport-level lifecycle of the signaling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Disconnected = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Connection lifecycle notifications for the layer driving the client.
#[async_trait]
pub trait ClientDelegate: Send + Sync {
    async fn client_did_connect(&self) {}

    /// Fires exactly once per disconnect, explicit or not.
    async fn client_did_disconnect(&self) {}

    async fn client_did_encounter_error(&self, _error: SignalingError) {}
}

/// Carries [`Message`]s to and from the signaling server and feeds a
/// [`Room`]. No retry policy here; that belongs to the caller.
pub struct SignalingClient {
    transport: Arc<dyn SignalingTransport>,
    delegate: Arc<dyn ClientDelegate>,
    state: ConnectionState,
    event_tx: mpsc::Sender<TransportEvent>,
}

impl SignalingClient {
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        delegate: Arc<dyn ClientDelegate>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            transport,
            delegate,
            state: ConnectionState::Disconnected,
            event_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connects the transport and joins the room. A no-op while already
    /// Connecting or Connected. On transport failure the delegate hears the
    /// error and the state returns to Disconnected.
    pub async fn connect_to_room(&mut self, room: &mut Room) -> Result<(), SignalingError> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = ?self.state, "connect ignored");
                return Ok(());
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
        }

        self.state = ConnectionState::Connecting;
        info!(room = %room.name(), "connecting to signaling server");

        let token = room.auth_token().unwrap_or_default().to_owned();
        match self
            .transport
            .connect(room.name(), &token, self.event_tx.clone())
            .await
        {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.delegate.client_did_connect().await;

                let mut join = Message::room_join();
                join.sender_id = room.local_peer().id.clone();
                join.room = room.name().to_owned();
                room.process_message(&join).await;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                let error = SignalingError::Transport(e.to_string());
                warn!(%error, "signaling connect failed");
                self.delegate
                    .client_did_encounter_error(SignalingError::Transport(e.to_string()))
                    .await;
                Err(error)
            }
        }
    }

    /// Stamps the local identity onto the message and sends it. Only valid
    /// while Connected.
    pub async fn send_message(
        &self,
        mut message: Message,
        room: &Room,
    ) -> Result<(), SignalingError> {
        if self.state != ConnectionState::Connected {
            return Err(SignalingError::InvalidState(
                "send_message requires a connected signaling client",
            ));
        }

        message.sender_id = room.local_peer().id.clone();
        message.room = room.name().to_owned();

        let text = message.encode()?;
        self.transport
            .send(text)
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))
    }

    /// Decodes inbound text and routes it through the room. Malformed
    /// messages are dropped and logged, never fatal.
    pub async fn process_incoming(&mut self, text: &str, room: &mut Room) {
        match Message::decode(text) {
            Ok(message) => {
                let handled = room.process_message(&message).await;
                if !handled {
                    debug!(kind = message.payload.kind(), "message not handled");
                }
            }
            Err(error) => {
                warn!(%error, "dropping malformed signaling message");
            }
        }
    }

    /// Reacts to the transport dropping out from under us.
    pub async fn handle_transport_closed(&mut self, room: &mut Room) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        warn!("signaling transport closed unexpectedly");
        self.state = ConnectionState::Disconnected;

        let mut leave = Message::room_leave();
        leave.sender_id = room.local_peer().id.clone();
        leave.room = room.name().to_owned();
        room.process_message(&leave).await;

        self.delegate
            .client_did_encounter_error(SignalingError::Transport(
                "signaling connection lost".to_owned(),
            ))
            .await;
        self.delegate.client_did_disconnect().await;
    }

    /// Leaves the room and closes the transport. Idempotent: a second call
    /// while Disconnected does nothing, and the disconnect delegate fires
    /// exactly once per actual disconnect.
    pub async fn disconnect(&mut self, room: &mut Room) {
        match self.state {
            ConnectionState::Disconnected => return,
            ConnectionState::Disconnecting => return,
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }

        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Disconnecting;
        info!(room = %room.name(), "disconnecting from signaling server");

        if was_connected {
            let mut leave = Message::room_leave();
            leave.sender_id = room.local_peer().id.clone();
            leave.room = room.name().to_owned();
            if let Ok(text) = leave.encode() {
                if let Err(e) = self.transport.send(text).await {
                    debug!(error = %e, "room-leave not delivered");
                }
            }
            room.process_message(&leave).await;
        }

        self.transport.close().await;
        self.state = ConnectionState::Disconnected;
        self.delegate.client_did_disconnect().await;
    }
}
