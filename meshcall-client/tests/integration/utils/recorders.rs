use async_trait::async_trait;
use meshcall_client::broker::BrokerDelegate;
use meshcall_client::engine::{IceConnectionState, StreamHandle};
use meshcall_client::media::SessionDelegate;
use meshcall_client::room::RoomObserver;
use meshcall_client::signaling::ClientDelegate;
use meshcall_core::{
    ConnectionId, IceCandidate, Message, Peer, PeerId, SessionDescription, SignalingError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Joined(String),
    Left(String),
    PeerAdded(PeerId),
    PeerRemoved(PeerId),
    Message(Message),
}

/// Observer recording room notifications in order.
pub struct RecordingObserver {
    events: Mutex<Vec<RoomEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<RoomEvent> {
        self.events.lock().await.clone()
    }

    pub async fn take_events(&self) -> Vec<RoomEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl RoomObserver for RecordingObserver {
    async fn did_join_room(&self, room_name: &str) {
        self.events
            .lock()
            .await
            .push(RoomEvent::Joined(room_name.to_owned()));
    }

    async fn did_leave_room(&self, room_name: &str) {
        self.events
            .lock()
            .await
            .push(RoomEvent::Left(room_name.to_owned()));
    }

    async fn did_add_peer(&self, peer: &Peer) {
        self.events
            .lock()
            .await
            .push(RoomEvent::PeerAdded(peer.id.clone()));
    }

    async fn did_remove_peer(&self, peer: &Peer) {
        self.events
            .lock()
            .await
            .push(RoomEvent::PeerRemoved(peer.id.clone()));
    }

    async fn did_receive_message(&self, message: &Message) {
        self.events
            .lock()
            .await
            .push(RoomEvent::Message(message.clone()));
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Offer {
        peer_id: PeerId,
        connection_id: ConnectionId,
        description: SessionDescription,
    },
    Answer {
        peer_id: PeerId,
        connection_id: ConnectionId,
        description: SessionDescription,
    },
    Ice {
        peer_id: PeerId,
        candidate: IceCandidate,
    },
    StreamAdded {
        peer_id: PeerId,
        stream: StreamHandle,
    },
    StreamRemoved {
        peer_id: PeerId,
        stream: StreamHandle,
    },
    IceStatus {
        peer_id: PeerId,
        state: IceConnectionState,
    },
}

/// Session delegate forwarding every signal to the test.
pub struct RecordingSessionDelegate {
    tx: mpsc::UnboundedSender<SessionEvent>,
    renegotiate: AtomicBool,
}

impl RecordingSessionDelegate {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                renegotiate: AtomicBool::new(true),
            }),
            rx,
        )
    }

    /// Makes `should_renegotiate` answer false from now on.
    pub fn refuse_renegotiation(&self) {
        self.renegotiate.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionDelegate for RecordingSessionDelegate {
    async fn signal_offer(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        offer: SessionDescription,
    ) {
        let _ = self.tx.send(SessionEvent::Offer {
            peer_id: peer_id.clone(),
            connection_id: connection_id.clone(),
            description: offer,
        });
    }

    async fn signal_answer(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        answer: SessionDescription,
    ) {
        let _ = self.tx.send(SessionEvent::Answer {
            peer_id: peer_id.clone(),
            connection_id: connection_id.clone(),
            description: answer,
        });
    }

    async fn signal_ice_candidate(
        &self,
        peer_id: &PeerId,
        _connection_id: &ConnectionId,
        candidate: IceCandidate,
    ) {
        let _ = self.tx.send(SessionEvent::Ice {
            peer_id: peer_id.clone(),
            candidate,
        });
    }

    async fn connection_added_stream(&self, peer_id: &PeerId, stream: StreamHandle) {
        let _ = self.tx.send(SessionEvent::StreamAdded {
            peer_id: peer_id.clone(),
            stream,
        });
    }

    async fn connection_removed_stream(&self, peer_id: &PeerId, stream: StreamHandle) {
        let _ = self.tx.send(SessionEvent::StreamRemoved {
            peer_id: peer_id.clone(),
            stream,
        });
    }

    async fn ice_status_changed(&self, peer_id: &PeerId, state: IceConnectionState) {
        let _ = self.tx.send(SessionEvent::IceStatus {
            peer_id: peer_id.clone(),
            state,
        });
    }

    async fn should_renegotiate(&self, _format: &meshcall_core::VideoFormat) -> bool {
        self.renegotiate.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum BrokerEvent {
    LocalStream(StreamHandle),
    StreamAdded(StreamHandle),
    StreamRemoved(StreamHandle),
    Failed(String),
    Finished,
}

/// Broker delegate forwarding UI-level notifications to the test.
pub struct RecordingBrokerDelegate {
    tx: mpsc::UnboundedSender<BrokerEvent>,
    finished: AtomicUsize,
}

impl RecordingBrokerDelegate {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                finished: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerDelegate for RecordingBrokerDelegate {
    async fn did_add_local_stream(&self, stream: &StreamHandle) {
        let _ = self.tx.send(BrokerEvent::LocalStream(stream.clone()));
    }

    async fn did_add_stream(&self, stream: &StreamHandle) {
        let _ = self.tx.send(BrokerEvent::StreamAdded(stream.clone()));
    }

    async fn did_remove_stream(&self, stream: &StreamHandle) {
        let _ = self.tx.send(BrokerEvent::StreamRemoved(stream.clone()));
    }

    async fn did_fail_with_error(&self, error: SignalingError) {
        let _ = self.tx.send(BrokerEvent::Failed(error.to_string()));
    }

    async fn did_finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(BrokerEvent::Finished);
    }
}

/// Client delegate counting lifecycle callbacks.
pub struct RecordingClientDelegate {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl RecordingClientDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub async fn errors(&self) -> Vec<String> {
        self.errors.lock().await.clone()
    }
}

#[async_trait]
impl ClientDelegate for RecordingClientDelegate {
    async fn client_did_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn client_did_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn client_did_encounter_error(&self, error: SignalingError) {
        self.errors.lock().await.push(error.to_string());
    }
}
