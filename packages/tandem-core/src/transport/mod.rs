//! # Peer Transport
//!
//! Async seam over a WebRTC-style peer-connection engine. The
//! [`PeerSession`](crate::session::PeerSession) state machine drives a
//! [`PeerConnection`]; the engine reports asynchronous happenings (new local
//! candidates, data channel open/close, inbound text) as [`PeerEvent`]s on
//! the channel handed to [`PeerConnector::connect`].
//!
//! ```text
//!   PeerSession ──create/set/add──► PeerConnection (engine)
//!        ▲                               │
//!        └────────── PeerEvent ◄─────────┘
//! ```
//!
//! Implementations:
//!
//! - [`memory`] - in-process pairs, for tests and demos
//! - `webrtc` - native engine backed by the `webrtc` crate (feature `webrtc`)

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{IceCandidate, SessionDescription};
use crate::room::Role;

pub mod memory;
#[cfg(feature = "webrtc")]
pub mod webrtc;

/// Label of the chat data channel.
pub const CHAT_CHANNEL_LABEL: &str = "chat";

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The engine gathered a local candidate to send to the peer.
    LocalCandidate(IceCandidate),
    /// The chat data channel opened.
    ChannelOpen,
    /// Text arrived on the chat data channel.
    ChannelMessage(String),
    /// The chat data channel closed.
    ChannelClosed,
}

/// Sender half for [`PeerEvent`]s.
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Factory for peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a connection. The initiator creates the chat data channel;
    /// the responder accepts the one announced by the remote side.
    async fn connect(&self, role: Role, events: PeerEventSender) -> Result<Box<dyn PeerConnection>>;
}

/// One peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply a remote candidate. Only valid once a remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Send text over the chat data channel.
    async fn send(&self, text: &str) -> Result<()>;

    /// Tear down the connection.
    async fn close(&self);
}
