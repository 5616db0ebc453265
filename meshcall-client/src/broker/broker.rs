use crate::broker::task::BrokerTask;
use crate::broker::BrokerCommand;
use crate::engine::{MediaEngine, StreamHandle};
use crate::signaling::{ConnectionState, SignalingTransport};
use async_trait::async_trait;
use dashmap::DashMap;
use meshcall_core::{MediaConfiguration, PeerId, SignalingError, VideoFormat};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Network reachability signal fed into the broker, typically backed by the
/// platform's reachability API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Stream and failure notifications to the UI layer. These are the only
/// failure signals exposed upward; every lower-level error is translated
/// into `did_fail_with_error` or `did_finish` by the broker.
#[async_trait]
pub trait BrokerDelegate: Send + Sync {
    async fn did_add_local_stream(&self, _stream: &StreamHandle) {}

    async fn did_add_stream(&self, _stream: &StreamHandle) {}

    async fn did_remove_stream(&self, _stream: &StreamHandle) {}

    async fn did_fail_with_error(&self, _error: SignalingError) {}

    /// Fires exactly once when the broker reaches fully disconnected, by
    /// explicit `disconnect` or by unrecoverable signaling failure.
    async fn did_finish(&self) {}
}

/// Call-level facade: composes the signaling client, room, media session and
/// reachability signal into one connect/disconnect lifecycle.
///
/// All state lives in a spawned event-loop task; this handle only posts
/// commands and mirrors the connection state for synchronous reads.
pub struct ConnectionBroker {
    command_tx: mpsc::Sender<BrokerCommand>,
    state: Arc<AtomicU8>,
    local_stream: Arc<Mutex<Option<StreamHandle>>>,
    remote_streams: Arc<DashMap<PeerId, StreamHandle>>,
}

impl ConnectionBroker {
    pub fn new(
        delegate: Arc<dyn BrokerDelegate>,
        engine: Arc<dyn MediaEngine>,
        transport: Arc<dyn SignalingTransport>,
        reachability: watch::Receiver<Reachability>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8));
        let local_stream = Arc::new(Mutex::new(None));
        let remote_streams = Arc::new(DashMap::new());

        let task = BrokerTask::new(
            delegate,
            engine,
            transport,
            command_rx,
            reachability,
            Arc::clone(&state),
            Arc::clone(&local_stream),
            Arc::clone(&remote_streams),
        );
        tokio::spawn(task.run());

        Self {
            command_tx,
            state,
            local_stream,
            remote_streams,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn local_stream(&self) -> Option<StreamHandle> {
        self.local_stream.lock().expect("local stream lock").clone()
    }

    pub fn remote_streams(&self) -> Vec<StreamHandle> {
        self.remote_streams
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Starts a connection attempt. Returns false, and does nothing, when an
    /// attempt is already in progress or a call is live.
    pub async fn connect_to_room(&self, room: crate::room::Room, config: MediaConfiguration) -> bool {
        let idle = ConnectionState::Disconnected as u8;
        let connecting = ConnectionState::Connecting as u8;
        if self
            .state
            .compare_exchange(idle, connecting, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("connect_to_room rejected: attempt already in progress");
            return false;
        }

        info!(room = %room.name(), "broker connecting");
        self.command_tx
            .send(BrokerCommand::ConnectToRoom { room, config })
            .await
            .is_ok()
    }

    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(BrokerCommand::Disconnect).await;
    }

    pub async fn set_receiver_format(&self, format: VideoFormat) {
        let _ = self
            .command_tx
            .send(BrokerCommand::SetReceiverFormat { format })
            .await;
    }
}
