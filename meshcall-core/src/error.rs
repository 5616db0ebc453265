use crate::model::{ConnectionId, PeerId};
use thiserror::Error;

/// A malformed or unrecognized signaling message. Dropped and logged at the
/// boundary, never fatal to the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed signaling JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("message type `{kind}` requires a data payload")]
    MissingData { kind: &'static str },

    #[error("bad payload for `{kind}`: {source}")]
    BadPayload {
        kind: &'static str,
        source: serde_json::Error,
    },
}

/// Error taxonomy of the signaling/orchestration core.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Operation invalid in the current state. Returned to the caller,
    /// never silently swallowed.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A handle was mutated after close.
    #[error("connection with peer {0} is closed")]
    ConnectionClosed(PeerId),

    /// An offer/answer arrived for a negotiation session we no longer hold.
    #[error("stale negotiation for peer {peer_id}: expected connection {expected}, got {received}")]
    NegotiationMismatch {
        peer_id: PeerId,
        expected: ConnectionId,
        received: ConnectionId,
    },

    #[error("already connecting to peer {0}")]
    AlreadyConnecting(PeerId),

    #[error("no connection for peer {0}")]
    UnknownPeer(PeerId),

    /// Signaling connect/send failure. Surfaced to the delegate; retry policy
    /// belongs to the caller.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The restart budget for a connection ran out. The caller is responsible
    /// for tearing the peer down.
    #[error("ICE restart attempts exhausted for peer {0}")]
    IceRestartExhausted(PeerId),

    #[error("engine failure: {0}")]
    Engine(String),

    #[error("invalid configuration: {0}")]
    Configuration(&'static str),
}
