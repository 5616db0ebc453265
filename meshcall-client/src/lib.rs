//! Client-side call orchestration for mesh video rooms.
//!
//! The crate is layered around one serial event loop:
//!
//! - [`signaling`] carries wire messages over a pluggable transport.
//! - [`room`] tracks presence and routes inbound messages to observers.
//! - [`media`] drives per-peer negotiation against a pluggable engine.
//! - [`broker`] composes the above into a connect/disconnect call lifecycle.
//! - [`engine`] defines the traits a media stack implements to plug in.
//!
//! All mutable call state lives on the broker's task; public handles only
//! post commands and read mirrored state.

pub mod broker;
pub mod engine;
pub mod media;
pub mod room;
pub mod signaling;

pub use broker::{BrokerDelegate, ConnectionBroker, Reachability};
pub use engine::{EngineConnection, EngineEvent, IceConnectionState, MediaEngine, StreamHandle};
pub use media::{MediaReadinessPolicy, MediaSession, SessionDelegate};
pub use room::{Room, RoomObserver};
pub use signaling::{ClientDelegate, ConnectionState, SignalingClient, SignalingTransport};
