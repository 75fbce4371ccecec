//! Relay wire protocol and chat message definitions.
//!
//! Every frame is a JSON text message whose `type` field selects the variant.
//! The same [`ControlFrame::Message`] shape travels through the relay (when
//! no peer channel exists) and over the peer data channel, so a message
//! received twice by different paths decodes to the same id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::room::{Address, RoomId};
use crate::time::now_timestamp_millis;

/// Opaque proof of address ownership produced by the wallet.
///
/// Browser wallets return structured objects, so any JSON value is carried
/// through unchanged.
pub type Signature = serde_json::Value;

// ── Frames ────────────────────────────────────────────────────────────────────

/// Messages exchanged between clients and the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ControlFrame {
    /// Bind this connection to a room. Must be sent first.
    ///
    /// The room id stays a raw string so the relay can answer an
    /// undecodable id with an `error` frame instead of dropping it.
    Auth {
        room_id: String,
        address: Address,
        #[serde(default)]
        signature: Signature,
    },

    /// Authentication accepted.
    AuthSuccess,

    /// Relay-side rejection.
    Error { message: String },

    /// The other member of the room connected or disconnected.
    PeerStatus { status: PeerStatus },

    /// Session description from the initiator.
    Offer {
        room_id: RoomId,
        offer: SessionDescription,
    },

    /// Session description from the responder.
    Answer {
        room_id: RoomId,
        answer: SessionDescription,
    },

    /// Connectivity candidate, either direction.
    Ice {
        room_id: RoomId,
        candidate: IceCandidate,
    },

    /// A chat message.
    Message {
        room_id: RoomId,
        #[serde(flatten)]
        message: ChatMessage,
    },
}

impl ControlFrame {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))
    }

    /// Encode to a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlFrame::Auth { .. } => "auth",
            ControlFrame::AuthSuccess => "auth-success",
            ControlFrame::Error { .. } => "error",
            ControlFrame::PeerStatus { .. } => "peer-status",
            ControlFrame::Offer { .. } => "offer",
            ControlFrame::Answer { .. } => "answer",
            ControlFrame::Ice { .. } => "ice",
            ControlFrame::Message { .. } => "message",
        }
    }

    /// Shorthand for a `peer-status` frame.
    pub fn peer_status(status: PeerStatus) -> Self {
        ControlFrame::PeerStatus { status }
    }

    /// Shorthand for an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        ControlFrame::Error {
            message: message.into(),
        }
    }
}

/// Presence of the other room member at the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Online,
    Offline,
}

// ── Handshake payloads ────────────────────────────────────────────────────────

/// SDP type of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description, shaped like the browser's `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate, shaped like the browser's `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

// ── Chat messages ─────────────────────────────────────────────────────────────

/// Delivery progress of a chat message, as seen by the client that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Pushed onto the peer data channel.
    #[default]
    Sent,
    /// Held by the relay queue or the local outbox.
    Queued,
    /// Received from the peer.
    Delivered,
}

/// A chat message. `id` is the only deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: Address,
    pub text: String,
    /// Milliseconds since the Unix epoch, set by the sender.
    pub timestamp: i64,
    #[serde(rename = "status", default)]
    pub delivery_state: DeliveryState,
}

impl ChatMessage {
    /// New message from `sender`, stamped now.
    pub fn new(sender: Address, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            text: text.into(),
            timestamp: now_timestamp_millis(),
            delivery_state: DeliveryState::Sent,
        }
    }

    /// Same message with a different delivery state.
    pub fn with_state(mut self, state: DeliveryState) -> Self {
        self.delivery_state = state;
        self
    }

    /// Wrap into a wire frame for `room`.
    pub fn into_frame(self, room: &RoomId) -> ControlFrame {
        ControlFrame::Message {
            room_id: room.clone(),
            message: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::between("addr1alice", "addr1bob").unwrap()
    }

    #[test]
    fn test_auth_frame_wire_shape() {
        let frame = ControlFrame::Auth {
            room_id: "addr1alice_addr1bob".to_string(),
            address: Address::new("addr1alice"),
            signature: json!({"signature": "84a4", "key": "a401"}),
        };
        let value: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["roomId"], "addr1alice_addr1bob");
        assert_eq!(value["address"], "addr1alice");
        assert_eq!(value["signature"]["key"], "a401");
    }

    #[test]
    fn test_relay_originated_frames() {
        assert_eq!(
            ControlFrame::AuthSuccess.encode().unwrap(),
            r#"{"type":"auth-success"}"#
        );
        assert_eq!(
            ControlFrame::error("Unauthorized").encode().unwrap(),
            r#"{"type":"error","message":"Unauthorized"}"#
        );
        assert_eq!(
            ControlFrame::peer_status(PeerStatus::Online).encode().unwrap(),
            r#"{"type":"peer-status","status":"online"}"#
        );
    }

    #[test]
    fn test_decode_browser_offer() {
        let text = r#"{"type":"offer","roomId":"addr1bob_addr1alice","offer":{"type":"offer","sdp":"v=0\r\n"}}"#;
        match ControlFrame::decode(text).unwrap() {
            ControlFrame::Offer { room_id, offer } => {
                assert_eq!(room_id, room());
                assert_eq!(offer.kind, SdpKind::Offer);
                assert_eq!(offer.sdp, "v=0\r\n");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_decode_browser_candidate() {
        let text = r#"{"type":"ice","roomId":"addr1alice_addr1bob","candidate":{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}}"#;
        match ControlFrame::decode(text).unwrap() {
            ControlFrame::Ice { candidate, .. } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_message_frame_is_flat() {
        let message = ChatMessage::new(Address::new("addr1alice"), "hi");
        let id = message.id;
        let value = serde_json::to_value(message.into_frame(&room())).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["roomId"], "addr1alice_addr1bob");
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["text"], "hi");
        assert_eq!(value["status"], "sent");
    }

    #[test]
    fn test_message_status_defaults_to_sent() {
        let text = r#"{"type":"message","roomId":"addr1alice_addr1bob","id":"6f1c1a3e-0d5b-4bb6-9a55-2c8b1f0f7a11","sender":"addr1bob","text":"yo","timestamp":1700000000000}"#;
        match ControlFrame::decode(text).unwrap() {
            ControlFrame::Message { message, .. } => {
                assert_eq!(message.delivery_state, DeliveryState::Sent);
                assert_eq!(message.timestamp, 1_700_000_000_000);
                assert_eq!(message.sender, Address::new("addr1bob"));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_malformed_frames() {
        for text in [
            "not json",
            r#"{"type":"teleport"}"#,
            r#"{"roomId":"addr1alice_addr1bob"}"#,
            r#"{"type":"offer","roomId":"lonely","offer":{"type":"offer","sdp":""}}"#,
        ] {
            match ControlFrame::decode(text) {
                Err(Error::MalformedFrame(_)) => {}
                other => panic!("expected MalformedFrame for {text}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_auth_with_undecodable_room_still_parses() {
        let text = r#"{"type":"auth","roomId":"lonely","address":"addr1alice","signature":"sig"}"#;
        match ControlFrame::decode(text).unwrap() {
            ControlFrame::Auth { room_id, .. } => assert_eq!(room_id, "lonely"),
            _ => panic!("Wrong variant"),
        }
    }
}
