use crate::engine::{
    EngineConnectionConfig, EngineEvent, IceConnectionState, MediaEngine, StreamHandle,
};
use crate::media::peer_connection::{ConnectionRole, PeerConnectionHandle};
use crate::media::sdp;
use async_trait::async_trait;
use meshcall_core::{
    ConnectionId, IceCandidate, IceServerConfig, MediaConfiguration, PeerId, SdpType,
    SessionDescription, SignalingError, VideoFormat,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Signaling and stream notifications out of a [`MediaSession`].
#[async_trait]
pub trait SessionDelegate: Send + Sync {
    async fn signal_offer(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        offer: SessionDescription,
    );

    async fn signal_answer(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        answer: SessionDescription,
    );

    async fn signal_ice_candidate(
        &self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
        candidate: IceCandidate,
    );

    async fn connection_added_stream(&self, peer_id: &PeerId, stream: StreamHandle);

    async fn connection_removed_stream(&self, peer_id: &PeerId, stream: StreamHandle);

    async fn ice_status_changed(&self, peer_id: &PeerId, state: IceConnectionState);

    /// Cooperative veto before the session renegotiates every connection for
    /// a new receiver format.
    async fn should_renegotiate(&self, _format: &VideoFormat) -> bool {
        true
    }
}

/// Gate for answering inbound offers. Explicit so the trigger condition is a
/// policy, not an inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaReadinessPolicy {
    /// Park inbound offers until the local stream exists.
    #[default]
    RequireLocalStream,
    /// Answer immediately, publishing no local media if none exists yet.
    AlwaysReady,
}

impl MediaReadinessPolicy {
    fn is_ready(&self, local_stream: Option<&StreamHandle>) -> bool {
        match self {
            MediaReadinessPolicy::RequireLocalStream => local_stream.is_some(),
            MediaReadinessPolicy::AlwaysReady => true,
        }
    }
}

/// Orchestrates the mesh of per-peer connections backing one call: creates
/// offers and answers, applies remote descriptions, forwards ICE candidates,
/// and drives renegotiation and ICE restart.
///
/// Mutated only on the broker's serial task. Engine callbacks re-enter
/// through the `engine_tx` channel and land in [`Self::handle_engine_event`].
pub struct MediaSession {
    config: MediaConfiguration,
    engine: Arc<dyn MediaEngine>,
    delegate: Arc<dyn SessionDelegate>,
    connections: HashMap<PeerId, PeerConnectionHandle>,
    ice_servers: Vec<IceServerConfig>,
    single_use_ice_servers: Vec<IceServerConfig>,
    local_stream: Option<StreamHandle>,
    readiness: MediaReadinessPolicy,
    engine_tx: mpsc::Sender<EngineEvent>,
}

impl MediaSession {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        delegate: Arc<dyn SessionDelegate>,
        config: MediaConfiguration,
        readiness: MediaReadinessPolicy,
        engine_tx: mpsc::Sender<EngineEvent>,
    ) -> Result<Self, SignalingError> {
        config.validate().map_err(SignalingError::Configuration)?;
        Ok(Self {
            config,
            engine,
            delegate,
            connections: HashMap::new(),
            ice_servers: Vec::new(),
            single_use_ice_servers: Vec::new(),
            local_stream: None,
            readiness,
            engine_tx,
        })
    }

    pub fn configuration(&self) -> &MediaConfiguration {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_for_peer(&self, peer_id: &PeerId) -> Option<&PeerConnectionHandle> {
        self.connections.get(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.connections.keys().cloned().collect()
    }

    pub fn local_stream(&self) -> Option<&StreamHandle> {
        self.local_stream.as_ref()
    }

    /// Merges servers into the set used for all future connection creation.
    /// Single-use servers are consumed by the next connection and removed.
    pub fn add_ice_servers(&mut self, servers: Vec<IceServerConfig>, single_use: bool) {
        debug!(count = servers.len(), single_use, "adding ICE servers");
        if single_use {
            self.single_use_ice_servers.extend(servers);
        } else {
            self.ice_servers.extend(servers);
        }
    }

    /// Acquires the local capture stream, then answers any offers that were
    /// parked waiting for it.
    pub async fn start_local_media(&mut self) -> Result<StreamHandle, SignalingError> {
        if let Some(stream) = &self.local_stream {
            return Ok(stream.clone());
        }
        let stream = self
            .engine
            .create_local_stream(&self.config)
            .await
            .map_err(|e| SignalingError::Engine(e.to_string()))?;
        info!(stream = %stream, "local media ready");
        self.local_stream = Some(stream.clone());

        self.answer_queued_offers().await;
        Ok(stream)
    }

    /// Releases the local stream reference. Existing peer connections stay
    /// up; media lifecycle is separate from negotiation lifecycle.
    pub fn stop_local_media(&mut self) {
        if let Some(stream) = self.local_stream.take() {
            info!(stream = %stream, "local media stopped");
        }
    }

    /// Dials a peer: creates an Initiator connection and a local offer, which
    /// is emitted through the delegate once the engine finishes creating it.
    pub async fn connect_to_peer(&mut self, peer_id: PeerId) -> Result<(), SignalingError> {
        if let Some(existing) = self.connections.get(&peer_id) {
            if !existing.is_closed() {
                return Err(SignalingError::AlreadyConnecting(peer_id));
            }
        }

        let connection_id = ConnectionId::generate();
        info!(peer = %peer_id, connection = %connection_id, "dialing peer");

        let handle = self
            .create_handle(peer_id.clone(), connection_id.clone(), ConnectionRole::Initiator)
            .await?;
        self.connections.insert(peer_id.clone(), handle);

        self.spawn_negotiation(&peer_id, SdpType::Offer, false);
        Ok(())
    }

    /// Accepts an inbound offer as Receiver. When local media is not ready
    /// per the readiness policy, the offer is parked and answered later. An
    /// existing connection for the peer is replaced; identity is kept.
    pub async fn accept_connection_from_peer(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        offer: SessionDescription,
    ) -> Result<(), SignalingError> {
        if self.connections.contains_key(&peer_id) {
            info!(peer = %peer_id, "replacing existing connection for new offer");
            self.close_connection_with_peer(&peer_id).await;
        }

        info!(peer = %peer_id, connection = %connection_id, "accepting connection");
        let mut handle = self
            .create_handle(peer_id.clone(), connection_id, ConnectionRole::Receiver)
            .await?;

        if self.readiness.is_ready(self.local_stream.as_ref()) {
            handle.apply_remote_description(offer).await?;
            self.connections.insert(peer_id.clone(), handle);
            self.spawn_negotiation(&peer_id, SdpType::Answer, false);
        } else {
            debug!(peer = %peer_id, "local media not ready, queuing offer");
            handle.set_queued_offer(offer);
            self.connections.insert(peer_id, handle);
        }
        Ok(())
    }

    /// Applies a renegotiation offer to an existing connection and answers
    /// it. A mismatched connection id means the peer restarted negotiation;
    /// the offer is rejected and the handle left untouched.
    pub async fn add_offer(
        &mut self,
        offer: SessionDescription,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
    ) -> Result<(), SignalingError> {
        let handle = self.checked_handle(peer_id, connection_id)?;
        handle.apply_remote_description(offer).await?;
        self.spawn_negotiation(peer_id, SdpType::Answer, false);
        Ok(())
    }

    /// Applies a remote answer, draining queued candidates afterwards.
    pub async fn add_answer(
        &mut self,
        answer: SessionDescription,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
    ) -> Result<(), SignalingError> {
        let handle = self.checked_handle(peer_id, connection_id)?;
        handle.apply_remote_description(answer).await?;
        info!(peer = %peer_id, connection = %connection_id, "descriptions exchanged");
        Ok(())
    }

    /// Routes a remote candidate to the matching handle. Candidates for
    /// unknown peers or stale connection ids are dropped and logged.
    pub async fn add_ice_candidate(
        &mut self,
        candidate: IceCandidate,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
    ) -> Result<(), SignalingError> {
        let Some(handle) = self.connections.get_mut(peer_id) else {
            warn!(peer = %peer_id, "dropping candidate for unknown peer");
            return Ok(());
        };
        if handle.connection_id() != connection_id {
            warn!(
                peer = %peer_id,
                connection = %connection_id,
                current = %handle.connection_id(),
                "dropping candidate for stale connection"
            );
            return Ok(());
        }
        handle.add_ice_candidate(candidate).await
    }

    /// Closes and removes the peer's connection. Idempotent.
    pub async fn close_connection_with_peer(&mut self, peer_id: &PeerId) {
        let Some(mut handle) = self.connections.remove(peer_id) else {
            return;
        };
        handle.close().await;
    }

    pub async fn close_all(&mut self) {
        for peer_id in self.peer_ids() {
            self.close_connection_with_peer(&peer_id).await;
        }
    }

    /// Re-offers with an ICE restart constraint, within the configured
    /// budget. At the cap the call fails and the caller tears the peer down.
    pub async fn restart_ice_with_peer(&mut self, peer_id: &PeerId) -> Result<(), SignalingError> {
        let max_restarts = self.config.max_ice_restarts;
        let handle = self
            .connections
            .get_mut(peer_id)
            .ok_or_else(|| SignalingError::UnknownPeer(peer_id.clone()))?;

        if handle.ice_attempts() >= max_restarts {
            return Err(SignalingError::IceRestartExhausted(peer_id.clone()));
        }
        handle.record_ice_attempt();
        info!(
            peer = %peer_id,
            attempt = handle.ice_attempts(),
            "restarting ICE"
        );
        self.spawn_negotiation(peer_id, SdpType::Offer, true);
        Ok(())
    }

    /// Adopts a new receiver format. Renegotiation of live connections only
    /// proceeds when the delegate agrees.
    pub async fn set_receiver_format(&mut self, format: VideoFormat) {
        let renegotiate =
            !self.connections.is_empty() && self.delegate.should_renegotiate(&format).await;
        self.config.preferred_receiver_format = format;

        if !renegotiate {
            debug!("receiver format updated without renegotiation");
            return;
        }
        info!(
            connections = self.connections.len(),
            "renegotiating for new receiver format"
        );
        for peer_id in self.peer_ids() {
            self.spawn_negotiation(&peer_id, SdpType::Offer, false);
        }
    }

    /// Engine callback re-entry point; runs on the broker's serial task.
    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), SignalingError> {
        match event {
            EngineEvent::NegotiationCompleted {
                peer_id,
                connection_id,
                result,
            } => {
                self.finish_negotiation(peer_id, connection_id, result)
                    .await
            }
            EngineEvent::IceCandidate {
                peer_id,
                connection_id,
                candidate,
            } => {
                let Some(handle) = self.connections.get(&peer_id) else {
                    debug!(peer = %peer_id, "local candidate for closed connection");
                    return Ok(());
                };
                if handle.connection_id() != &connection_id || handle.is_closed() {
                    return Ok(());
                }
                if !sdp::candidate_matches(
                    &candidate,
                    self.config.ice_filter,
                    self.config.ice_protocol,
                ) {
                    debug!(peer = %peer_id, "candidate filtered by configuration");
                    return Ok(());
                }
                self.delegate
                    .signal_ice_candidate(&peer_id, &connection_id, candidate)
                    .await;
                Ok(())
            }
            EngineEvent::StreamAdded { peer_id, stream } => {
                if let Some(handle) = self.connections.get_mut(&peer_id) {
                    handle.set_remote_stream(Some(stream.clone()));
                    self.delegate.connection_added_stream(&peer_id, stream).await;
                }
                Ok(())
            }
            EngineEvent::StreamRemoved { peer_id, stream } => {
                if let Some(handle) = self.connections.get_mut(&peer_id) {
                    handle.set_remote_stream(None);
                    self.delegate
                        .connection_removed_stream(&peer_id, stream)
                        .await;
                }
                Ok(())
            }
            EngineEvent::IceStateChanged {
                peer_id,
                connection_id,
                state,
            } => {
                let current = self
                    .connections
                    .get(&peer_id)
                    .map(|handle| handle.connection_id() == &connection_id)
                    .unwrap_or(false);
                if current {
                    self.delegate.ice_status_changed(&peer_id, state).await;
                }
                Ok(())
            }
        }
    }

    /// Completion of a spawned create_offer/create_answer. Stale completions
    /// (handle closed or replaced meanwhile) are no-ops.
    async fn finish_negotiation(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        result: anyhow::Result<SessionDescription>,
    ) -> Result<(), SignalingError> {
        let connection_count = self.connections.len();
        let Some(handle) = self.connections.get_mut(&peer_id) else {
            debug!(peer = %peer_id, "negotiation completed for removed connection");
            return Ok(());
        };
        if handle.connection_id() != &connection_id || handle.is_closed() {
            debug!(peer = %peer_id, "negotiation completed for stale connection");
            return Ok(());
        }

        let description = match result {
            Ok(description) => description,
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "engine failed to create description");
                return Err(SignalingError::Engine(e.to_string()));
            }
        };

        let conditioned = sdp::condition_description(description, &self.config, connection_count);
        handle
            .connection()
            .set_local_description(conditioned.clone())
            .await
            .map_err(|e| SignalingError::Engine(e.to_string()))?;

        match conditioned.kind {
            SdpType::Offer => {
                self.delegate
                    .signal_offer(&peer_id, &connection_id, conditioned)
                    .await;
            }
            SdpType::Answer => {
                self.delegate
                    .signal_answer(&peer_id, &connection_id, conditioned)
                    .await;
            }
        }
        Ok(())
    }

    async fn answer_queued_offers(&mut self) {
        let waiting: Vec<PeerId> = self
            .connections
            .iter()
            .filter(|(_, handle)| handle.has_queued_offer())
            .map(|(peer_id, _)| peer_id.clone())
            .collect();

        for peer_id in waiting {
            let Some(handle) = self.connections.get_mut(&peer_id) else {
                continue;
            };
            let Some(offer) = handle.take_queued_offer() else {
                continue;
            };
            info!(peer = %peer_id, "answering queued offer");
            match handle.apply_remote_description(offer).await {
                Ok(()) => self.spawn_negotiation(&peer_id, SdpType::Answer, false),
                Err(e) => {
                    warn!(peer = %peer_id, error = %e, "failed to answer queued offer");
                    self.close_connection_with_peer(&peer_id).await;
                }
            }
        }
    }

    async fn create_handle(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        role: ConnectionRole,
    ) -> Result<PeerConnectionHandle, SignalingError> {
        let mut ice_servers = self.ice_servers.clone();
        // Single-use servers are spent on this connection.
        ice_servers.append(&mut self.single_use_ice_servers);

        let config = EngineConnectionConfig {
            peer_id: peer_id.clone(),
            connection_id: connection_id.clone(),
            ice_servers,
            ice_filter: self.config.ice_filter,
            ice_protocol: self.config.ice_protocol,
            local_stream: self.local_stream.clone(),
        };

        let connection = self
            .engine
            .create_connection(config, self.engine_tx.clone())
            .await
            .map_err(|e| SignalingError::Engine(e.to_string()))?;

        Ok(PeerConnectionHandle::new(
            peer_id,
            connection_id,
            role,
            connection,
        ))
    }

    fn checked_handle(
        &mut self,
        peer_id: &PeerId,
        connection_id: &ConnectionId,
    ) -> Result<&mut PeerConnectionHandle, SignalingError> {
        let handle = self
            .connections
            .get_mut(peer_id)
            .ok_or_else(|| SignalingError::UnknownPeer(peer_id.clone()))?;
        if handle.connection_id() != connection_id {
            return Err(SignalingError::NegotiationMismatch {
                peer_id: peer_id.clone(),
                expected: handle.connection_id().clone(),
                received: connection_id.clone(),
            });
        }
        Ok(handle)
    }

    fn spawn_negotiation(&self, peer_id: &PeerId, kind: SdpType, ice_restart: bool) {
        let Some(handle) = self.connections.get(peer_id) else {
            return;
        };
        let connection = handle.connection();
        let peer_id = peer_id.clone();
        let connection_id = handle.connection_id().clone();
        let events = self.engine_tx.clone();

        tokio::spawn(async move {
            let result = match kind {
                SdpType::Offer => connection.create_offer(ice_restart).await,
                SdpType::Answer => connection.create_answer().await,
            };
            // The session re-checks the handle before applying this, so a
            // completion racing a close is harmless.
            let _ = events
                .send(EngineEvent::NegotiationCompleted {
                    peer_id,
                    connection_id,
                    result,
                })
                .await;
        });
    }
}
