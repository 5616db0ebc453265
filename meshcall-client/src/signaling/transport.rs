use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Events a transport pushes into the broker's serial queue.
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw inbound message text, decoded by the signaling client.
    Message(String),
    /// The connection dropped without a local `close`.
    Closed,
    Error(String),
}

/// Wire-level connection to the signaling server (typically a WebSocket).
///
/// The transport carries opaque text; framing and reconnect policy live
/// above it.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open the connection and join `room_name`. Inbound traffic flows
    /// through `events` until the transport closes.
    async fn connect(
        &self,
        room_name: &str,
        auth_token: &str,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()>;

    async fn send(&self, text: String) -> Result<()>;

    async fn close(&self);
}
