use crate::broker::{BrokerCommand, BrokerDelegate, Reachability};
use crate::engine::{EngineEvent, IceConnectionState, MediaEngine, StreamHandle};
use crate::media::{ConnectionRole, MediaReadinessPolicy, MediaSession, SessionDelegate};
use crate::room::{Room, RoomObserver};
use crate::signaling::{
    ClientDelegate, ConnectionState, SignalingClient, SignalingTransport, TransportEvent,
};
use async_trait::async_trait;
use dashmap::DashMap;
use meshcall_core::{
    ConnectionId, IceCandidate, MediaConfiguration, Message, MessagePayload, Peer, PeerId,
    SessionDescription, SignalingError,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Room notifications hopped onto the broker's queue.
enum RoomSignal {
    Joined,
    Left,
    PeerAdded(Peer),
    PeerRemoved(Peer),
    Message(Message),
}

struct RoomForwarder {
    tx: mpsc::UnboundedSender<RoomSignal>,
}

#[async_trait]
impl RoomObserver for RoomForwarder {
    async fn did_join_room(&self, _room_name: &str) {
        let _ = self.tx.send(RoomSignal::Joined);
    }

    async fn did_leave_room(&self, _room_name: &str) {
        let _ = self.tx.send(RoomSignal::Left);
    }

    async fn did_add_peer(&self, peer: &Peer) {
        let _ = self.tx.send(RoomSignal::PeerAdded(peer.clone()));
    }

    async fn did_remove_peer(&self, peer: &Peer) {
        let _ = self.tx.send(RoomSignal::PeerRemoved(peer.clone()));
    }

    async fn did_receive_message(&self, message: &Message) {
        let _ = self.tx.send(RoomSignal::Message(message.clone()));
    }
}

/// Session notifications hopped onto the broker's queue.
enum SessionSignal {
    Outbound(Message),
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

struct SessionForwarder {
    tx: mpsc::UnboundedSender<SessionSignal>,
}

#[async_trait]
impl SessionDelegate for SessionForwarder {
    async fn signal_offer(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        offer: SessionDescription,
    ) {
        let message = Message::offer(peer_id.clone(), connection_id.clone(), offer);
        let _ = self.tx.send(SessionSignal::Outbound(message));
    }

    async fn signal_answer(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        answer: SessionDescription,
    ) {
        let message = Message::answer(peer_id.clone(), connection_id.clone(), answer);
        let _ = self.tx.send(SessionSignal::Outbound(message));
    }

    async fn signal_ice_candidate(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        candidate: IceCandidate,
    ) {
        let message = Message::ice_candidate(peer_id.clone(), connection_id.clone(), candidate);
        let _ = self.tx.send(SessionSignal::Outbound(message));
    }

    async fn connection_added_stream(&self, peer_id: &PeerId, stream: StreamHandle) {
        let _ = self.tx.send(SessionSignal::StreamAdded {
            peer_id: peer_id.clone(),
            stream,
        });
    }

    async fn connection_removed_stream(&self, peer_id: &PeerId, stream: StreamHandle) {
        let _ = self.tx.send(SessionSignal::StreamRemoved {
            peer_id: peer_id.clone(),
            stream,
        });
    }

    async fn ice_status_changed(&self, peer_id: &PeerId, state: IceConnectionState) {
        let _ = self.tx.send(SessionSignal::IceStatus {
            peer_id: peer_id.clone(),
            state,
        });
    }
}

/// The broker surfaces failures itself; client-level callbacks only log.
struct LoggingClientDelegate;

#[async_trait]
impl ClientDelegate for LoggingClientDelegate {
    async fn client_did_connect(&self) {
        info!("signaling client connected");
    }

    async fn client_did_disconnect(&self) {
        info!("signaling client disconnected");
    }

    async fn client_did_encounter_error(&self, error: SignalingError) {
        warn!(%error, "signaling client error");
    }
}

/// Owns every mutable piece of a call. Inbound network events, room and
/// session notifications, engine callbacks and reachability changes all
/// funnel through one `tokio::select!` loop; that is the sole serialization
/// discipline, no other locking.
pub(crate) struct BrokerTask {
    delegate: Arc<dyn BrokerDelegate>,
    engine: Arc<dyn MediaEngine>,
    client: SignalingClient,
    room: Option<Room>,
    session: Option<MediaSession>,

    command_rx: mpsc::Receiver<BrokerCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    engine_tx: mpsc::Sender<EngineEvent>,
    engine_rx: mpsc::Receiver<EngineEvent>,
    room_tx: mpsc::UnboundedSender<RoomSignal>,
    room_rx: mpsc::UnboundedReceiver<RoomSignal>,
    session_tx: mpsc::UnboundedSender<SessionSignal>,
    session_rx: mpsc::UnboundedReceiver<SessionSignal>,
    reachability_rx: watch::Receiver<Reachability>,
    reachability_closed: bool,

    state: Arc<AtomicU8>,
    local_stream: Arc<Mutex<Option<StreamHandle>>>,
    remote_streams: Arc<DashMap<PeerId, StreamHandle>>,
    finished: bool,
    pending_reconnect: bool,
}

impl BrokerTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        delegate: Arc<dyn BrokerDelegate>,
        engine: Arc<dyn MediaEngine>,
        transport: Arc<dyn SignalingTransport>,
        command_rx: mpsc::Receiver<BrokerCommand>,
        reachability_rx: watch::Receiver<Reachability>,
        state: Arc<AtomicU8>,
        local_stream: Arc<Mutex<Option<StreamHandle>>>,
        remote_streams: Arc<DashMap<PeerId, StreamHandle>>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let (engine_tx, engine_rx) = mpsc::channel(256);
        let (room_tx, room_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();

        let client =
            SignalingClient::new(transport, Arc::new(LoggingClientDelegate), transport_tx);

        Self {
            delegate,
            engine,
            client,
            room: None,
            session: None,
            command_rx,
            transport_rx,
            engine_tx,
            engine_rx,
            room_tx,
            room_rx,
            session_tx,
            session_rx,
            reachability_rx,
            reachability_closed: false,
            state,
            local_stream,
            remote_streams,
            finished: true,
            pending_reconnect: false,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("connection broker event loop started");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            debug!("broker handle dropped, shutting down");
                            self.teardown(true).await;
                            break;
                        }
                    }
                }

                Some(evt) = self.transport_rx.recv() => {
                    self.handle_transport_event(evt).await;
                }

                Some(evt) = self.engine_rx.recv() => {
                    self.handle_engine_event(evt).await;
                }

                Some(sig) = self.room_rx.recv() => {
                    self.handle_room_signal(sig).await;
                }

                Some(sig) = self.session_rx.recv() => {
                    self.handle_session_signal(sig).await;
                }

                changed = self.reachability_rx.changed(), if !self.reachability_closed => {
                    match changed {
                        Ok(()) => self.handle_reachability_change().await,
                        Err(_) => self.reachability_closed = true,
                    }
                }
            }
        }

        info!("connection broker event loop finished");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn current_state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    fn local_peer_id(&self) -> Option<PeerId> {
        self.room.as_ref().map(|room| room.local_peer().id.clone())
    }

    async fn handle_command(&mut self, command: BrokerCommand) {
        match command {
            BrokerCommand::ConnectToRoom { room, config } => {
                self.begin_call(room, config).await;
            }
            BrokerCommand::Disconnect => {
                self.teardown(true).await;
            }
            BrokerCommand::SetReceiverFormat { format } => {
                if let Some(session) = &mut self.session {
                    session.set_receiver_format(format).await;
                }
            }
        }
    }

    async fn begin_call(&mut self, mut room: Room, config: MediaConfiguration) {
        self.finished = false;
        self.pending_reconnect = false;
        self.set_state(ConnectionState::Connecting);

        room.add_observer(Arc::new(RoomForwarder {
            tx: self.room_tx.clone(),
        }));

        let session_delegate = Arc::new(SessionForwarder {
            tx: self.session_tx.clone(),
        });
        let mut session = match MediaSession::new(
            Arc::clone(&self.engine),
            session_delegate,
            config,
            MediaReadinessPolicy::default(),
            self.engine_tx.clone(),
        ) {
            Ok(session) => session,
            Err(error) => {
                self.room = Some(room);
                self.fail(error).await;
                return;
            }
        };

        match session.start_local_media().await {
            Ok(stream) => {
                *self.local_stream.lock().expect("local stream lock") = Some(stream.clone());
                self.delegate.did_add_local_stream(&stream).await;
            }
            Err(error) => {
                self.room = Some(room);
                self.session = Some(session);
                self.fail(error).await;
                return;
            }
        }

        self.session = Some(session);
        let connected = self.client.connect_to_room(&mut room).await;
        self.room = Some(room);
        match connected {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
            }
            Err(error) => {
                self.fail(error).await;
            }
        }
    }

    /// Translates any unrecoverable condition into the UI-facing pair of
    /// `did_fail_with_error` + `did_finish`.
    async fn fail(&mut self, error: SignalingError) {
        warn!(%error, "connection broker failed");
        self.delegate.did_fail_with_error(error).await;
        self.teardown(false).await;
    }

    async fn teardown(&mut self, graceful: bool) {
        let active = self.session.is_some()
            || self.room.is_some()
            || self.client.state() != ConnectionState::Disconnected;
        if !active {
            return;
        }

        self.set_state(ConnectionState::Disconnecting);

        if graceful {
            if let (Some(session), Some(room)) = (&self.session, &self.room) {
                if self.client.state() == ConnectionState::Connected {
                    for peer_id in session.peer_ids() {
                        let Some(handle) = session.connection_for_peer(&peer_id) else {
                            continue;
                        };
                        let bye =
                            Message::bye(peer_id.clone(), handle.connection_id().clone(), None);
                        if let Err(e) = self.client.send_message(bye, room).await {
                            debug!(peer = %peer_id, error = %e, "bye not delivered");
                        }
                    }
                }
            }
        }

        if let Some(session) = &mut self.session {
            session.close_all().await;
            session.stop_local_media();
        }
        self.session = None;
        *self.local_stream.lock().expect("local stream lock") = None;

        let departed: Vec<StreamHandle> = self
            .remote_streams
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.remote_streams.clear();
        for stream in departed {
            self.delegate.did_remove_stream(&stream).await;
        }

        if let Some(room) = &mut self.room {
            self.client.disconnect(room).await;
        }
        self.room = None;
        self.pending_reconnect = false;

        self.set_state(ConnectionState::Disconnected);
        if !self.finished {
            self.finished = true;
            self.delegate.did_finish().await;
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => {
                let Some(room) = &mut self.room else {
                    debug!("inbound message with no active room");
                    return;
                };
                self.client.process_incoming(&text, room).await;
            }
            TransportEvent::Closed => match self.client.state() {
                ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
                _ => {
                    if let Some(room) = &mut self.room {
                        self.client.handle_transport_closed(room).await;
                    }
                    self.set_state(ConnectionState::Disconnected);
                    self.delegate
                        .did_fail_with_error(SignalingError::Transport(
                            "signaling connection lost".to_owned(),
                        ))
                        .await;

                    if *self.reachability_rx.borrow() == Reachability::Reachable {
                        self.attempt_reconnect().await;
                    } else {
                        debug!("network unreachable, deferring reconnect");
                        self.pending_reconnect = true;
                    }
                }
            },
            TransportEvent::Error(error) => {
                warn!(%error, "signaling transport error");
            }
        }
    }

    /// One reconnect attempt; a second failure is treated as unrecoverable.
    async fn attempt_reconnect(&mut self) {
        if self.room.is_none() {
            return;
        }
        self.set_state(ConnectionState::Connecting);

        let connected = {
            let Some(room) = self.room.as_mut() else {
                return;
            };
            info!(room = %room.name(), "reconnecting signaling");
            self.client.connect_to_room(room).await
        };
        match connected {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                self.pending_reconnect = false;
                self.restart_all_ice().await;
            }
            Err(error) => {
                self.fail(error).await;
            }
        }
    }

    /// The transport path changed under every connection; re-probe them all.
    async fn restart_all_ice(&mut self) {
        let peers = self
            .session
            .as_ref()
            .map(|session| session.peer_ids())
            .unwrap_or_default();

        for peer_id in peers {
            let result = match &mut self.session {
                Some(session) => session.restart_ice_with_peer(&peer_id).await,
                None => return,
            };
            match result {
                Ok(()) => {}
                Err(error @ SignalingError::IceRestartExhausted(_)) => {
                    self.fail_peer(peer_id, error).await;
                }
                Err(error) => {
                    warn!(peer = %peer_id, %error, "ICE restart failed");
                }
            }
        }
    }

    /// Tears down a single peer without ending the call.
    async fn fail_peer(&mut self, peer_id: PeerId, error: SignalingError) {
        warn!(peer = %peer_id, %error, "tearing down peer");

        if let (Some(session), Some(room)) = (&self.session, &self.room) {
            if let Some(handle) = session.connection_for_peer(&peer_id) {
                if self.client.state() == ConnectionState::Connected {
                    let bye = Message::bye(peer_id.clone(), handle.connection_id().clone(), None);
                    if let Err(e) = self.client.send_message(bye, room).await {
                        debug!(error = %e, "bye not delivered");
                    }
                }
            }
        }
        if let Some(session) = &mut self.session {
            session.close_connection_with_peer(&peer_id).await;
        }
        if let Some((_, stream)) = self.remote_streams.remove(&peer_id) {
            self.delegate.did_remove_stream(&stream).await;
        }
        self.delegate.did_fail_with_error(error).await;
    }

    async fn handle_room_signal(&mut self, signal: RoomSignal) {
        match signal {
            RoomSignal::Joined => {
                info!("room joined, waiting for roster");
            }
            RoomSignal::Left => {
                debug!("room left");
            }
            RoomSignal::PeerAdded(peer) => {
                self.maybe_dial(peer.id).await;
            }
            RoomSignal::PeerRemoved(peer) => {
                info!(peer = %peer.id, "peer left, closing its connection");
                if let Some(session) = &mut self.session {
                    session.close_connection_with_peer(&peer.id).await;
                }
                if let Some((_, stream)) = self.remote_streams.remove(&peer.id) {
                    self.delegate.did_remove_stream(&stream).await;
                }
            }
            RoomSignal::Message(message) => {
                self.route_peer_message(message).await;
            }
        }
    }

    /// Dial policy: the lexicographically smaller peer id initiates, so each
    /// pair negotiates exactly once with no glare.
    async fn maybe_dial(&mut self, peer_id: PeerId) {
        let Some(local_id) = self.local_peer_id() else {
            return;
        };
        if local_id >= peer_id {
            debug!(peer = %peer_id, "waiting for peer to dial us");
            return;
        }
        let Some(session) = &mut self.session else {
            return;
        };
        match session.connect_to_peer(peer_id.clone()).await {
            Ok(()) => {}
            Err(SignalingError::AlreadyConnecting(_)) => {
                debug!(peer = %peer_id, "already connecting");
            }
            Err(error) => {
                self.fail_peer(peer_id, error).await;
            }
        }
    }

    async fn route_peer_message(&mut self, message: Message) {
        let sender = message.sender_id.clone();

        match message.payload {
            MessagePayload::Offer(data) => {
                self.route_offer(sender, data.connection_id, data.description)
                    .await;
            }
            MessagePayload::Answer(data) => {
                let result = match &mut self.session {
                    Some(session) => {
                        session
                            .add_answer(data.description, &sender, &data.connection_id)
                            .await
                    }
                    None => return,
                };
                match result {
                    Ok(()) => {}
                    Err(error @ SignalingError::NegotiationMismatch { .. })
                    | Err(error @ SignalingError::UnknownPeer(_)) => {
                        warn!(peer = %sender, %error, "answer rejected");
                    }
                    Err(error) => {
                        self.fail_peer(sender, error).await;
                    }
                }
            }
            MessagePayload::Ice(data) => {
                let result = match &mut self.session {
                    Some(session) => {
                        session
                            .add_ice_candidate(data.candidate, &sender, &data.connection_id)
                            .await
                    }
                    None => return,
                };
                if let Err(error) = result {
                    warn!(peer = %sender, %error, "candidate not applied");
                }
            }
            MessagePayload::Bye(data) => {
                info!(peer = %sender, reason = ?data.reason, "peer said bye");
                if let Some(session) = &mut self.session {
                    session.close_connection_with_peer(&sender).await;
                }
                if let Some((_, stream)) = self.remote_streams.remove(&sender) {
                    self.delegate.did_remove_stream(&stream).await;
                }
            }
            MessagePayload::RoomJoin
            | MessagePayload::RoomLeave
            | MessagePayload::RoomUsersUpdate(_) => {
                // Presence is consumed by the room, never forwarded here.
                debug!("presence payload in peer message path");
            }
        }
    }

    async fn route_offer(
        &mut self,
        sender: PeerId,
        connection_id: ConnectionId,
        description: SessionDescription,
    ) {
        let local_id = self.local_peer_id();
        let action = {
            let Some(session) = &self.session else { return };
            match session.connection_for_peer(&sender) {
                Some(handle) if handle.connection_id() == &connection_id => OfferAction::Renegotiate,
                Some(handle)
                    if !handle.is_closed()
                        && handle.role() == ConnectionRole::Initiator
                        && local_id.as_ref().is_some_and(|id| *id < sender) =>
                {
                    // Glare: both sides dialed. The smaller id keeps its offer.
                    OfferAction::Ignore
                }
                _ => OfferAction::Accept,
            }
        };

        let result = match action {
            OfferAction::Ignore => {
                debug!(peer = %sender, "ignoring glare offer");
                return;
            }
            OfferAction::Renegotiate => match &mut self.session {
                Some(session) => {
                    session
                        .add_offer(description, &sender, &connection_id)
                        .await
                }
                None => return,
            },
            OfferAction::Accept => match &mut self.session {
                Some(session) => {
                    session
                        .accept_connection_from_peer(sender.clone(), connection_id, description)
                        .await
                }
                None => return,
            },
        };

        match result {
            Ok(()) => {}
            Err(error @ SignalingError::NegotiationMismatch { .. }) => {
                warn!(peer = %sender, %error, "offer rejected");
            }
            Err(error) => {
                self.fail_peer(sender, error).await;
            }
        }
    }

    async fn handle_session_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::Outbound(message) => {
                let Some(room) = &self.room else { return };
                match self.client.send_message(message, room).await {
                    Ok(()) => {}
                    Err(SignalingError::InvalidState(reason)) => {
                        debug!(reason, "dropping outbound signal while not connected");
                    }
                    Err(error) => {
                        warn!(%error, "failed to send signaling message");
                        self.delegate.did_fail_with_error(error).await;
                    }
                }
            }
            SessionSignal::StreamAdded { peer_id, stream } => {
                info!(peer = %peer_id, stream = %stream, "remote stream added");
                self.remote_streams.insert(peer_id, stream.clone());
                self.delegate.did_add_stream(&stream).await;
            }
            SessionSignal::StreamRemoved { peer_id, stream } => {
                if self.remote_streams.remove(&peer_id).is_some() {
                    info!(peer = %peer_id, stream = %stream, "remote stream removed");
                    self.delegate.did_remove_stream(&stream).await;
                }
            }
            SessionSignal::IceStatus { peer_id, state } => {
                self.handle_ice_status(peer_id, state).await;
            }
        }
    }

    async fn handle_ice_status(&mut self, peer_id: PeerId, state: IceConnectionState) {
        match state {
            IceConnectionState::Failed => {
                let result = match &mut self.session {
                    Some(session) => session.restart_ice_with_peer(&peer_id).await,
                    None => return,
                };
                match result {
                    Ok(()) => {}
                    Err(error @ SignalingError::IceRestartExhausted(_)) => {
                        self.fail_peer(peer_id, error).await;
                    }
                    Err(error) => {
                        warn!(peer = %peer_id, %error, "ICE restart not started");
                    }
                }
            }
            IceConnectionState::Disconnected => {
                warn!(peer = %peer_id, "ICE transport disconnected");
            }
            other => {
                debug!(peer = %peer_id, state = ?other, "ICE state changed");
            }
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        let peer_id = match &event {
            EngineEvent::IceCandidate { peer_id, .. }
            | EngineEvent::StreamAdded { peer_id, .. }
            | EngineEvent::StreamRemoved { peer_id, .. }
            | EngineEvent::IceStateChanged { peer_id, .. }
            | EngineEvent::NegotiationCompleted { peer_id, .. } => peer_id.clone(),
        };

        let result = match &mut self.session {
            Some(session) => session.handle_engine_event(event).await,
            None => return,
        };
        if let Err(error) = result {
            self.fail_peer(peer_id, error).await;
        }
    }

    async fn handle_reachability_change(&mut self) {
        let reachability = *self.reachability_rx.borrow_and_update();
        match reachability {
            Reachability::Unreachable => {
                warn!("network unreachable");
            }
            Reachability::Reachable => {
                if self.pending_reconnect && self.room.is_some() {
                    self.attempt_reconnect().await;
                } else if self.current_state() == ConnectionState::Connected {
                    info!("network path changed, restarting ICE");
                    self.restart_all_ice().await;
                }
            }
        }
    }
}

enum OfferAction {
    Renegotiate,
    Accept,
    Ignore,
}
