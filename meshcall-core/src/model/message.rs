use crate::error::ProtocolError;
use crate::model::peer::{ConnectionId, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which half of the SDP exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP blob paired with its exchange role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsersUpdateData {
    pub users: Vec<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpData {
    #[serde(rename = "connectionId")]
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub description: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceData {
    #[serde(rename = "connectionId")]
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByeData {
    #[serde(rename = "connectionId")]
    pub connection_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Typed payload of a signaling message. Decoded once at the transport
/// boundary; everything downstream routes by exhaustive matching.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePayload {
    RoomJoin,
    RoomLeave,
    RoomUsersUpdate(UsersUpdateData),
    Ice(IceData),
    Offer(SdpData),
    Answer(SdpData),
    Bye(ByeData),
}

impl MessagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::RoomJoin => "room-join",
            MessagePayload::RoomLeave => "room-leave",
            MessagePayload::RoomUsersUpdate(_) => "room-users-update",
            MessagePayload::Ice(_) => "ice",
            MessagePayload::Offer(_) => "offer",
            MessagePayload::Answer(_) => "answer",
            MessagePayload::Bye(_) => "bye",
        }
    }
}

/// Immutable envelope for all signaling traffic.
///
/// `sender_id` and `room` are stamped by the signaling client just before
/// sending; factory constructors leave them empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender_id: PeerId,
    /// `None` means broadcast to the whole room.
    pub target_id: Option<PeerId>,
    pub room: String,
    pub payload: MessagePayload,
}

/// Raw wire shape, kept private to the codec.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "senderId", default)]
    sender_id: PeerId,
    #[serde(rename = "targetId", default, skip_serializing_if = "Option::is_none")]
    target_id: Option<PeerId>,
    #[serde(default)]
    room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn payload_data<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    data: Option<Value>,
) -> Result<T, ProtocolError> {
    let value = data.ok_or(ProtocolError::MissingData { kind })?;
    serde_json::from_value(value).map_err(|source| ProtocolError::BadPayload { kind, source })
}

impl Message {
    pub fn new(target_id: Option<PeerId>, payload: MessagePayload) -> Self {
        Self {
            sender_id: PeerId::default(),
            target_id,
            room: String::new(),
            payload,
        }
    }

    pub fn room_join() -> Self {
        Self::new(None, MessagePayload::RoomJoin)
    }

    pub fn room_leave() -> Self {
        Self::new(None, MessagePayload::RoomLeave)
    }

    pub fn offer(
        target_id: PeerId,
        connection_id: ConnectionId,
        description: SessionDescription,
    ) -> Self {
        Self::new(
            Some(target_id),
            MessagePayload::Offer(SdpData {
                connection_id,
                description,
            }),
        )
    }

    pub fn answer(
        target_id: PeerId,
        connection_id: ConnectionId,
        description: SessionDescription,
    ) -> Self {
        Self::new(
            Some(target_id),
            MessagePayload::Answer(SdpData {
                connection_id,
                description,
            }),
        )
    }

    pub fn ice_candidate(
        target_id: PeerId,
        connection_id: ConnectionId,
        candidate: IceCandidate,
    ) -> Self {
        Self::new(
            Some(target_id),
            MessagePayload::Ice(IceData {
                connection_id,
                candidate,
            }),
        )
    }

    pub fn bye(target_id: PeerId, connection_id: ConnectionId, reason: Option<String>) -> Self {
        Self::new(
            Some(target_id),
            MessagePayload::Bye(ByeData {
                connection_id,
                reason,
            }),
        )
    }

    /// True when the message is addressed to the whole room.
    pub fn is_broadcast(&self) -> bool {
        self.target_id.is_none()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireMessage = serde_json::from_str(text)?;

        let payload = match wire.kind.as_str() {
            "room-join" => MessagePayload::RoomJoin,
            "room-leave" => MessagePayload::RoomLeave,
            "room-users-update" => {
                MessagePayload::RoomUsersUpdate(payload_data("room-users-update", wire.data)?)
            }
            "ice" => MessagePayload::Ice(payload_data("ice", wire.data)?),
            "offer" => MessagePayload::Offer(payload_data("offer", wire.data)?),
            "answer" => MessagePayload::Answer(payload_data("answer", wire.data)?),
            "bye" => MessagePayload::Bye(payload_data("bye", wire.data)?),
            other => return Err(ProtocolError::UnknownType(other.to_owned())),
        };

        // Some servers broadcast with an empty targetId instead of omitting it.
        let target_id = wire.target_id.filter(|id| !id.is_empty());

        Ok(Self {
            sender_id: wire.sender_id,
            target_id,
            room: wire.room,
            payload,
        })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match &self.payload {
            MessagePayload::RoomJoin | MessagePayload::RoomLeave => None,
            MessagePayload::RoomUsersUpdate(d) => Some(serde_json::to_value(d)?),
            MessagePayload::Ice(d) => Some(serde_json::to_value(d)?),
            MessagePayload::Offer(d) | MessagePayload::Answer(d) => Some(serde_json::to_value(d)?),
            MessagePayload::Bye(d) => Some(serde_json::to_value(d)?),
        };

        let wire = WireMessage {
            kind: self.payload.kind().to_owned(),
            sender_id: self.sender_id.clone(),
            target_id: self.target_id.clone(),
            room: self.room.clone(),
            data,
        };

        Ok(serde_json::to_string(&wire)?)
    }
}
