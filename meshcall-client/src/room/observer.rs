use async_trait::async_trait;
use meshcall_core::{Message, Peer};

/// Presence and message notifications out of a [`Room`](crate::room::Room).
///
/// Observers are notified in registration order. All methods default to
/// no-ops so implementors subscribe only to what they need.
#[async_trait]
pub trait RoomObserver: Send + Sync {
    async fn did_join_room(&self, _room_name: &str) {}

    async fn did_leave_room(&self, _room_name: &str) {}

    async fn did_add_peer(&self, _peer: &Peer) {}

    async fn did_remove_peer(&self, _peer: &Peer) {}

    /// Peer negotiation traffic (ice/offer/answer/bye), forwarded verbatim.
    async fn did_receive_message(&self, _message: &Message) {}
}
