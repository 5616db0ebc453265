use crate::engine::{EngineConnection, StreamHandle};
use meshcall_core::{ConnectionId, IceCandidate, PeerId, SessionDescription, SignalingError};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Which side of the offer/answer exchange this connection took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Initiator,
    Receiver,
}

/// Per-remote-peer negotiation state machine wrapping one engine connection.
///
/// Remote candidates that arrive before a remote description is applied are
/// queued FIFO; once applied they drain to the engine in arrival order, after
/// which new candidates bypass the queue. Owned exclusively by the media
/// session's connection map and mutated only on the broker task.
pub struct PeerConnectionHandle {
    peer_id: PeerId,
    connection_id: ConnectionId,
    role: ConnectionRole,
    connection: Arc<dyn EngineConnection>,
    queued_remote_candidates: VecDeque<IceCandidate>,
    queued_offer: Option<SessionDescription>,
    remote_description_applied: bool,
    ice_attempts: u32,
    remote_stream: Option<StreamHandle>,
    closed: bool,
}

impl PeerConnectionHandle {
    pub fn new(
        peer_id: PeerId,
        connection_id: ConnectionId,
        role: ConnectionRole,
        connection: Arc<dyn EngineConnection>,
    ) -> Self {
        Self {
            peer_id,
            connection_id,
            role,
            connection,
            queued_remote_candidates: VecDeque::new(),
            queued_offer: None,
            remote_description_applied: false,
            ice_attempts: 0,
            remote_stream: None,
            closed: false,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn connection(&self) -> Arc<dyn EngineConnection> {
        Arc::clone(&self.connection)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn ice_attempts(&self) -> u32 {
        self.ice_attempts
    }

    pub fn record_ice_attempt(&mut self) {
        self.ice_attempts += 1;
    }

    pub fn queued_candidate_count(&self) -> usize {
        self.queued_remote_candidates.len()
    }

    pub fn remote_stream(&self) -> Option<&StreamHandle> {
        self.remote_stream.as_ref()
    }

    pub fn set_remote_stream(&mut self, stream: Option<StreamHandle>) {
        self.remote_stream = stream;
    }

    pub fn has_queued_offer(&self) -> bool {
        self.queued_offer.is_some()
    }

    /// Parks an inbound offer until the local side is ready to answer.
    pub fn set_queued_offer(&mut self, offer: SessionDescription) {
        self.queued_offer = Some(offer);
    }

    /// Consumes the parked offer; the caller answers it exactly once.
    pub fn take_queued_offer(&mut self) -> Option<SessionDescription> {
        self.queued_offer.take()
    }

    /// Queues the candidate until a remote description is applied, forwards
    /// it to the engine directly afterwards.
    pub async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), SignalingError> {
        self.ensure_open()?;

        if self.remote_description_applied {
            self.connection
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| SignalingError::Engine(e.to_string()))
        } else {
            self.queued_remote_candidates.push_back(candidate);
            debug!(
                peer = %self.peer_id,
                queued = self.queued_remote_candidates.len(),
                "queued remote candidate before description"
            );
            Ok(())
        }
    }

    /// Applies the remote offer/answer, then drains queued candidates in
    /// arrival order.
    pub async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.ensure_open()?;

        self.connection
            .set_remote_description(description)
            .await
            .map_err(|e| SignalingError::Engine(e.to_string()))?;
        self.remote_description_applied = true;

        self.drain_remote_candidates().await
    }

    /// Forwards every queued candidate to the engine in original arrival
    /// order and clears the queue. Calling again with an empty queue is a
    /// no-op.
    pub async fn drain_remote_candidates(&mut self) -> Result<(), SignalingError> {
        self.ensure_open()?;

        if self.queued_remote_candidates.is_empty() {
            return Ok(());
        }

        info!(
            peer = %self.peer_id,
            count = self.queued_remote_candidates.len(),
            "draining queued remote candidates"
        );
        while let Some(candidate) = self.queued_remote_candidates.pop_front() {
            self.connection
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| SignalingError::Engine(e.to_string()))?;
        }
        Ok(())
    }

    /// Discards queued candidates without forwarding. Used when negotiation
    /// is aborted before a remote description arrives.
    pub fn remove_remote_candidates(&mut self) {
        if !self.queued_remote_candidates.is_empty() {
            debug!(
                peer = %self.peer_id,
                count = self.queued_remote_candidates.len(),
                "discarding queued remote candidates"
            );
        }
        self.queued_remote_candidates.clear();
    }

    /// Releases the engine connection and marks the handle terminal. Further
    /// candidate or offer operations fail with `ConnectionClosed`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.queued_remote_candidates.clear();
        self.queued_offer = None;
        self.remote_stream = None;

        if let Err(e) = self.connection.close().await {
            debug!(peer = %self.peer_id, error = %e, "engine close reported an error");
        }
        info!(peer = %self.peer_id, connection = %self.connection_id, "connection closed");
    }

    fn ensure_open(&self) -> Result<(), SignalingError> {
        if self.closed {
            return Err(SignalingError::ConnectionClosed(self.peer_id.clone()));
        }
        Ok(())
    }
}
