use crate::room::RoomObserver;
use meshcall_core::{Message, MessagePayload, Peer, PeerId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle returned by [`Room::add_observer`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Presence model and message router for one named room.
///
/// Owns the set of known remote peers and the local peer's identity and auth
/// token. Mutated only on the broker's serial task.
pub struct Room {
    name: String,
    auth_token: Option<String>,
    local_peer: Peer,
    joined: bool,
    peers: HashMap<PeerId, Peer>,
    observers: Vec<(ObserverId, Arc<dyn RoomObserver>)>,
    next_observer_id: u64,
}

impl Room {
    pub fn new(
        auth_token: Option<String>,
        username: impl Into<PeerId>,
        room_name: impl Into<String>,
    ) -> Self {
        Self {
            name: room_name.into(),
            auth_token,
            local_peer: Peer::new(username.into()),
            joined: false,
            peers: HashMap::new(),
            observers: Vec::new(),
            next_observer_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn local_peer(&self) -> &Peer {
        &self.local_peer
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Connected remote peers, keyed by identifier. Never contains the local
    /// peer.
    pub fn peers(&self) -> &HashMap<PeerId, Peer> {
        &self.peers
    }

    /// Updates the token only; connecting with it is the signaling client's
    /// job.
    pub fn authorize_with_token(&mut self, token: impl Into<String>) {
        self.auth_token = Some(token.into());
    }

    pub fn clear_authorization_token(&mut self) {
        self.auth_token = None;
    }

    pub fn add_observer(&mut self, observer: Arc<dyn RoomObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) {
        self.observers.retain(|(existing, _)| *existing != id);
    }

    /// Snapshot so observer removal during notification cannot invalidate the
    /// iteration.
    fn observer_snapshot(&self) -> Vec<Arc<dyn RoomObserver>> {
        self.observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// Routes one inbound message. Returns whether the room consumed it;
    /// messages addressed to somebody else are not.
    pub async fn process_message(&mut self, message: &Message) -> bool {
        if let Some(target) = &message.target_id {
            if *target != self.local_peer.id {
                debug!(target = %target, "ignoring message addressed to another peer");
                return false;
            }
        }

        match &message.payload {
            MessagePayload::RoomJoin => {
                if message.sender_id == self.local_peer.id {
                    self.joined = true;
                    info!(room = %self.name, "joined room");
                    for observer in self.observer_snapshot() {
                        observer.did_join_room(&self.name).await;
                    }
                } else {
                    self.add_peer(Peer::new(message.sender_id.clone())).await;
                }
                true
            }
            MessagePayload::RoomLeave => {
                if message.sender_id == self.local_peer.id {
                    self.joined = false;
                    self.peers.clear();
                    info!(room = %self.name, "left room");
                    for observer in self.observer_snapshot() {
                        observer.did_leave_room(&self.name).await;
                    }
                } else {
                    self.remove_peer(&message.sender_id).await;
                }
                true
            }
            MessagePayload::RoomUsersUpdate(update) => {
                self.apply_users_update(&update.users).await;
                true
            }
            MessagePayload::Ice(_)
            | MessagePayload::Offer(_)
            | MessagePayload::Answer(_)
            | MessagePayload::Bye(_) => {
                for observer in self.observer_snapshot() {
                    observer.did_receive_message(message).await;
                }
                true
            }
        }
    }

    async fn add_peer(&mut self, peer: Peer) {
        if peer.id == self.local_peer.id {
            return;
        }
        if self.peers.contains_key(&peer.id) {
            // Duplicate presence updates are absorbed.
            debug!(peer = %peer.id, "peer already present");
            return;
        }
        info!(peer = %peer.id, room = %self.name, "peer joined");
        self.peers.insert(peer.id.clone(), peer.clone());
        for observer in self.observer_snapshot() {
            observer.did_add_peer(&peer).await;
        }
    }

    async fn remove_peer(&mut self, peer_id: &PeerId) {
        let Some(peer) = self.peers.remove(peer_id) else {
            debug!(peer = %peer_id, "remove for unknown peer");
            return;
        };
        info!(peer = %peer.id, room = %self.name, "peer left");
        for observer in self.observer_snapshot() {
            observer.did_remove_peer(&peer).await;
        }
    }

    /// Diffs the authoritative user list against current presence. Additions
    /// fire in payload order; exactly one event per changed peer.
    async fn apply_users_update(&mut self, users: &[PeerId]) {
        let departed: Vec<PeerId> = {
            let mut gone: Vec<PeerId> = self
                .peers
                .keys()
                .filter(|known| !users.contains(known))
                .cloned()
                .collect();
            gone.sort();
            gone
        };

        for peer_id in departed {
            self.remove_peer(&peer_id).await;
        }

        for peer_id in users {
            if *peer_id == self.local_peer.id || self.peers.contains_key(peer_id) {
                continue;
            }
            self.add_peer(Peer::new(peer_id.clone())).await;
        }

        if users.iter().any(|id| *id == self.local_peer.id) && !self.joined {
            warn!(room = %self.name, "users update lists local peer before join ack");
        }
    }
}
