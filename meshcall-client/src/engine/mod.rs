//! Capability surface of the underlying media engine.
//!
//! The orchestration core never touches a concrete WebRTC implementation; it
//! drives whatever engine is injected through these traits and hears back via
//! [`EngineEvent`]s posted onto the broker's serial event queue.

use anyhow::Result;
use async_trait::async_trait;
use meshcall_core::{
    ConnectionId, IceCandidate, IceFilter, IceProtocol, IceServerConfig, MediaConfiguration,
    PeerId, SessionDescription,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Non-owning reference to an engine-owned media stream. The engine keeps
/// stream ownership; the core only holds this lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub id: Uuid,
    pub label: String,
}

impl StreamHandle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// ICE transport state reported by the engine for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// Everything the engine needs to build one peer connection.
#[derive(Debug, Clone)]
pub struct EngineConnectionConfig {
    pub peer_id: PeerId,
    pub connection_id: ConnectionId,
    pub ice_servers: Vec<IceServerConfig>,
    pub ice_filter: IceFilter,
    pub ice_protocol: IceProtocol,
    /// Local stream the connection should publish, when one exists.
    pub local_stream: Option<StreamHandle>,
}

/// Asynchronous callbacks out of the engine, re-dispatched onto the broker's
/// serial queue before any session state is touched.
#[derive(Debug)]
pub enum EngineEvent {
    /// A local candidate was discovered and should be signaled to the peer.
    IceCandidate {
        peer_id: PeerId,
        connection_id: ConnectionId,
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
    IceStateChanged {
        peer_id: PeerId,
        connection_id: ConnectionId,
        state: IceConnectionState,
    },
    /// Completion of a spawned create_offer/create_answer call. Checked
    /// against the live connection map before being applied, so completions
    /// for closed or replaced handles are no-ops.
    NegotiationCompleted {
        peer_id: PeerId,
        connection_id: ConnectionId,
        result: Result<SessionDescription>,
    },
}

/// Factory half of the engine capability.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Acquire the local capture stream described by the configuration.
    async fn create_local_stream(&self, config: &MediaConfiguration) -> Result<StreamHandle>;

    /// Build one peer connection. Events for it flow through `events`.
    async fn create_connection(
        &self,
        config: EngineConnectionConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn EngineConnection>>;
}

/// One engine-level peer connection.
#[async_trait]
pub trait EngineConnection: Send + Sync {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
