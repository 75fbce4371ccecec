//! # Peer Session
//!
//! Handshake state machine for one peer connection.
//!
//! ```text
//!                 start_offer()                 handle_answer()
//!   Initiator:  Idle ──────────► Offering ─────────────────────────┐
//!                                                                  ▼
//!                 handle_offer()                      DescriptionExchanged
//!   Responder:  Idle ──────────► Answering ──(answer sent)─────────┘
//!                                                                  │
//!                                           on_channel_open()      ▼
//!                                                           ChannelOpen
//!                                                                  │
//!                                          close()                 ▼
//!                                                              Closed
//! ```
//!
//! Remote candidates are buffered until a remote description exists, then
//! applied in the order they arrived. Transport failures are logged and
//! leave the state where it was. A closed session is never reused; the
//! signaling client creates a fresh one.
//!
//! A responder that gets a new offer mid-handshake has lost its initiator's
//! connection: it drops its own and answers the new offer. On an open
//! channel the offer is held back until the channel closes.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{ChatMessage, ControlFrame, IceCandidate, SessionDescription};
use crate::room::{Role, RoomId};
use crate::transport::{PeerConnection, PeerConnector, PeerEvent, PeerEventSender};

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Offering,
    Answering,
    DescriptionExchanged,
    ChannelOpen,
    Closed,
}

/// One peer handshake and its data channel.
pub struct PeerSession {
    room: RoomId,
    role: Role,
    state: HandshakeState,
    local_description_set: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    deferred_offer: Option<SessionDescription>,
    connector: Arc<dyn PeerConnector>,
    connection: Option<Box<dyn PeerConnection>>,
    events_tx: PeerEventSender,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerSession {
    pub fn new(room: RoomId, role: Role, connector: Arc<dyn PeerConnector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            room,
            role,
            state: HandshakeState::Idle,
            local_description_set: false,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            deferred_offer: None,
            connector,
            connection: None,
            events_tx,
            events_rx,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == HandshakeState::ChannelOpen
    }

    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Candidates waiting for the remote description.
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Next event from the transport. Pends while no connection exists.
    pub async fn next_event(&mut self) -> PeerEvent {
        match self.events_rx.recv().await {
            Some(event) => event,
            // The session holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    /// Initiator: create the connection and data channel and produce the
    /// offer frame.
    pub async fn start_offer(&mut self) -> Option<ControlFrame> {
        if self.role != Role::Initiator {
            tracing::debug!(room = %self.room, "Responder does not start offers");
            return None;
        }
        if self.state != HandshakeState::Idle {
            tracing::debug!(room = %self.room, state = ?self.state, "Offer already started");
            return None;
        }

        let connection = self.open_connection().await?;
        let offer = match connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Failed to create offer");
                return None;
            }
        };
        if let Err(e) = connection.set_local_description(offer.clone()).await {
            tracing::warn!(room = %self.room, error = %e, "Failed to set local offer");
            return None;
        }

        self.connection = Some(connection);
        self.local_description_set = true;
        self.state = HandshakeState::Offering;
        tracing::info!(room = %self.room, "Sent offer");
        Some(ControlFrame::Offer {
            room_id: self.room.clone(),
            offer,
        })
    }

    /// Responder: accept the initiator's offer and produce the answer frame.
    pub async fn handle_offer(&mut self, offer: SessionDescription) -> Option<ControlFrame> {
        if self.role != Role::Responder {
            tracing::debug!(room = %self.room, "Initiator ignores offers");
            return None;
        }
        match self.state {
            HandshakeState::Idle => {}
            HandshakeState::Closed => return None,
            HandshakeState::ChannelOpen => {
                tracing::debug!(room = %self.room, "Holding offer until the open channel closes");
                self.deferred_offer = Some(offer);
                return None;
            }
            HandshakeState::Offering
            | HandshakeState::Answering
            | HandshakeState::DescriptionExchanged => {
                tracing::info!(room = %self.room, state = ?self.state, "Peer restarted handshake");
                self.restart().await;
            }
        }

        let connection = self.open_connection().await?;
        if let Err(e) = connection.set_remote_description(offer).await {
            tracing::warn!(room = %self.room, error = %e, "Failed to set remote offer");
            return None;
        }
        self.connection = Some(connection);
        self.remote_description_set = true;
        self.state = HandshakeState::Answering;
        self.apply_pending_candidates().await;

        self.send_answer().await
    }

    async fn send_answer(&mut self) -> Option<ControlFrame> {
        let connection = self.connection.as_ref()?;
        let answer = match connection.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Failed to create answer");
                return None;
            }
        };
        if let Err(e) = connection.set_local_description(answer.clone()).await {
            tracing::warn!(room = %self.room, error = %e, "Failed to set local answer");
            return None;
        }

        self.local_description_set = true;
        self.state = HandshakeState::DescriptionExchanged;
        tracing::info!(room = %self.room, "Sent answer");
        Some(ControlFrame::Answer {
            room_id: self.room.clone(),
            answer,
        })
    }

    /// Initiator: apply the responder's answer.
    pub async fn handle_answer(&mut self, answer: SessionDescription) {
        if self.role != Role::Initiator || self.state != HandshakeState::Offering {
            tracing::debug!(room = %self.room, state = ?self.state, "Ignoring answer");
            return;
        }
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        if let Err(e) = connection.set_remote_description(answer).await {
            tracing::warn!(room = %self.room, error = %e, "Failed to set remote answer");
            return;
        }

        self.remote_description_set = true;
        self.state = HandshakeState::DescriptionExchanged;
        tracing::info!(room = %self.room, "Applied answer");
        self.apply_pending_candidates().await;
    }

    /// Apply a remote candidate, or buffer it until the remote description
    /// is set.
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) {
        if matches!(self.state, HandshakeState::Closed) {
            return;
        }
        if !self.remote_description_set || self.deferred_offer.is_some() {
            self.pending_candidates.push_back(candidate);
            tracing::debug!(
                room = %self.room,
                pending = self.pending_candidates.len(),
                "Buffered candidate until remote description"
            );
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn apply_pending_candidates(&mut self) {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        if let Err(e) = connection.add_ice_candidate(candidate).await {
            tracing::warn!(room = %self.room, error = %e, "Failed to add candidate");
        }
    }

    /// Drop the current connection and return to `Idle`. Events still in
    /// flight from the old connection are discarded with its channel.
    async fn restart(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
        self.pending_candidates.clear();
        self.local_description_set = false;
        self.remote_description_set = false;
        self.state = HandshakeState::Idle;
    }

    /// Offer held back while the channel was open, with the candidates that
    /// followed it.
    pub fn take_deferred_offer(&mut self) -> Option<(SessionDescription, Vec<IceCandidate>)> {
        let offer = self.deferred_offer.take()?;
        Some((offer, self.pending_candidates.drain(..).collect()))
    }

    async fn open_connection(&self) -> Option<Box<dyn PeerConnection>> {
        match self.connector.connect(self.role, self.events_tx.clone()).await {
            Ok(connection) => Some(connection),
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Failed to create peer connection");
                None
            }
        }
    }

    // ── Channel ───────────────────────────────────────────────────────────────

    /// The transport reported the data channel open. Returns `true` when
    /// this moved the session into `ChannelOpen`.
    pub fn on_channel_open(&mut self) -> bool {
        if self.connection.is_none()
            || matches!(
                self.state,
                HandshakeState::ChannelOpen | HandshakeState::Closed
            )
        {
            return false;
        }
        self.state = HandshakeState::ChannelOpen;
        tracing::info!(room = %self.room, "Data channel open");
        true
    }

    /// Send a chat message over the open data channel.
    pub async fn send_chat(&self, message: ChatMessage) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed);
        }
        let connection = self.connection.as_ref().ok_or(Error::ChannelClosed)?;
        let text = message.into_frame(&self.room).encode()?;
        connection.send(&text).await
    }

    /// Tear down the connection and discard all handshake state.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.pending_candidates.clear();
        self.deferred_offer = None;
        self.local_description_set = false;
        self.remote_description_set = false;
        self.state = HandshakeState::Closed;
    }
}
