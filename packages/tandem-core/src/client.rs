//! # Signaling Client
//!
//! Drives one room: owns the relay link, the [`PeerSession`] and the local
//! storage handles, and reports progress as [`ClientEvent`]s.
//!
//! ## Session Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ROOM SESSION FLOW                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  settle delay ──► wallet address (bounded retry) ──► relay connect      │
//! │                                                          │              │
//! │                                                          ▼              │
//! │                                              auth ──► auth-success      │
//! │                                                          │              │
//! │                              peer-status online ◄────────┘              │
//! │                                      │                                  │
//! │            initiator: offer ─────────┤──────── responder: answer        │
//! │                                      ▼                                  │
//! │                     ice ◄──► ice  (buffered until remote description)   │
//! │                                      │                                  │
//! │                                      ▼                                  │
//! │                   channel open ──► flush outbox ──► Online              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Send Routing
//!
//! | Situation | Path | State |
//! |-----------|------|-------|
//! | data channel open | peer channel | `Sent` |
//! | authenticated, peer absent | relay `message` frame | `Queued` |
//! | handshake in progress / relay down | local outbox | `Queued` |
//!
//! Every sent message is appended to the ledger. Inbound messages are
//! appended too, and a `Message` event is emitted only for ids the ledger
//! had not seen.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{ChatMessage, ControlFrame, DeliveryState, PeerStatus};
use crate::room::{Address, Role, RoomId};
use crate::session::{HandshakeState, PeerSession};
use crate::storage::{Database, Ledger, Outbox};
use crate::transport::{PeerConnector, PeerEvent};
use crate::wallet::{self, Wallet};

/// Room-level progress reported to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the wallet or the relay link.
    Connecting,
    /// Relay link up, authentication sent.
    Authenticating,
    /// Authenticated, the other member is not connected.
    WaitingForPeer,
    /// The other member is connected; handshake under way.
    PeerOnline,
    /// Data channel open.
    Online,
    /// Terminal failure. The session stays down until closed.
    Error(String),
}

/// Events emitted by a running room session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Status(SessionStatus),
    /// A message from the peer, first time its id was seen.
    Message(ChatMessage),
}

// ── Relay link ────────────────────────────────────────────────────────────────

/// Frame-level link to the relay.
///
/// Dropping the link closes it.
pub struct RelayLink {
    outbound: mpsc::UnboundedSender<ControlFrame>,
    inbound: mpsc::UnboundedReceiver<ControlFrame>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<ControlFrame>,
        inbound: mpsc::UnboundedReceiver<ControlFrame>,
    ) -> Self {
        Self::with_tasks(outbound, inbound, Vec::new())
    }

    /// Link whose background `tasks` are aborted when it is dropped.
    pub fn with_tasks(
        outbound: mpsc::UnboundedSender<ControlFrame>,
        inbound: mpsc::UnboundedReceiver<ControlFrame>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks,
        }
    }

    pub fn send(&self, frame: ControlFrame) -> Result<()> {
        self.outbound.send(frame).map_err(|_| Error::NotConnected)
    }

    /// Next frame from the relay; `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<ControlFrame> {
        self.inbound.recv().await
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens relay links.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<RelayLink>;
}

/// WebSocket relay connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<RelayLink> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
        tracing::info!(url = url, "Connected to relay");

        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ControlFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ControlFrame>();

        // Ends on its own once the link's sender is dropped, closing the socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ControlFrame::decode(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed relay frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay socket error");
                        break;
                    }
                }
            }
        });

        Ok(RelayLink::with_tasks(out_tx, in_rx, vec![reader]))
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<Result<ChatMessage>>,
    },
    Shutdown,
}

/// Starts room sessions.
#[derive(Clone)]
pub struct SignalingClient {
    config: ClientConfig,
    wallet: Arc<dyn Wallet>,
    relay: Arc<dyn RelayConnector>,
    peers: Arc<dyn PeerConnector>,
    db: Database,
}

impl SignalingClient {
    pub fn new(
        config: ClientConfig,
        wallet: Arc<dyn Wallet>,
        relay: Arc<dyn RelayConnector>,
        peers: Arc<dyn PeerConnector>,
        db: Database,
    ) -> Self {
        Self {
            config,
            wallet,
            relay,
            peers,
            db,
        }
    }

    /// Start a session for `room` with `friend`. Must be called from within
    /// a tokio runtime.
    pub fn start(
        &self,
        room: RoomId,
        friend: Address,
    ) -> Result<(ClientHandle, mpsc::UnboundedReceiver<ClientEvent>)> {
        if !room.contains(&friend) {
            return Err(Error::Unauthorized(format!(
                "{friend} is not a member of {room}"
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let ledger = Ledger::new(self.db.clone());

        let task = RoomTask {
            room: room.clone(),
            friend,
            config: self.config.clone(),
            wallet: self.wallet.clone(),
            relay: self.relay.clone(),
            peers: self.peers.clone(),
            db: self.db.clone(),
            ledger: ledger.clone(),
            outbox: Outbox::new(self.db.clone()),
            events: events_tx,
            me: None,
            peer_present: false,
            status: None,
        };
        tracing::info!(room = %room, "Starting room session");
        let handle = tokio::spawn(task.run(commands_rx));

        Ok((
            ClientHandle {
                room,
                commands: commands_tx,
                ledger,
                task: Some(handle),
            },
            events_rx,
        ))
    }
}

/// Handle to a running room session. Dropping it aborts the session.
pub struct ClientHandle {
    room: RoomId,
    commands: mpsc::UnboundedSender<Command>,
    ledger: Ledger,
    task: Option<JoinHandle<()>>,
}

impl ClientHandle {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Send a chat message. The returned copy carries the delivery state
    /// the message was recorded with.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<ChatMessage> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Ledger history of the room.
    pub fn history(&self) -> Result<Vec<ChatMessage>> {
        self.ledger.read(&self.room)
    }

    /// Close the peer connection and the relay link, then wait for the
    /// session to finish.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!(room = %self.room, error = %e, "Room session ended abnormally");
                }
            }
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Exit {
    Shutdown,
    LinkLost,
    Fatal,
}

struct RoomTask {
    room: RoomId,
    friend: Address,
    config: ClientConfig,
    wallet: Arc<dyn Wallet>,
    relay: Arc<dyn RelayConnector>,
    peers: Arc<dyn PeerConnector>,
    db: Database,
    ledger: Ledger,
    outbox: Outbox,
    events: mpsc::UnboundedSender<ClientEvent>,
    me: Option<Address>,
    peer_present: bool,
    status: Option<SessionStatus>,
}

impl RoomTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.emit(SessionStatus::Connecting);

        let settle = tokio::time::sleep(self.config.settle_delay);
        if self.wait(&mut commands, settle).await.is_none() {
            return;
        }

        let provider = self.wallet.clone();
        let policy = self.config.wallet_retry;
        let lookup = async move { wallet::address_with_retry(provider.as_ref(), policy).await };
        let address = match self.wait(&mut commands, lookup).await {
            None => return,
            Some(Ok(address)) => address,
            Some(Err(e)) => {
                self.fail(Error::from(e).to_string());
                self.idle(&mut commands).await;
                return;
            }
        };

        if address == self.friend || !self.room.contains(&address) {
            self.fail(format!(
                "Unauthorized: {address} is not a member of {}",
                self.room
            ));
            self.idle(&mut commands).await;
            return;
        }
        let role = Role::for_pair(&address, &self.friend);
        tracing::info!(room = %self.room, address = %address, role = ?role, "Wallet ready");
        self.me = Some(address);

        loop {
            match self.serve(&mut commands, role).await {
                Exit::Shutdown => return,
                Exit::Fatal => {
                    self.idle(&mut commands).await;
                    return;
                }
                Exit::LinkLost => {
                    self.peer_present = false;
                    self.emit(SessionStatus::Connecting);
                    let delay = tokio::time::sleep(self.config.reconnect_delay);
                    if self.wait(&mut commands, delay).await.is_none() {
                        return;
                    }
                }
            }
        }
    }

    /// Drive `fut` to completion while answering commands. `None` means
    /// shutdown was requested.
    async fn wait<F: Future>(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        fut: F,
    ) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return Some(out),
                command = commands.recv() => match command {
                    Some(Command::Send { text, reply }) => {
                        let _ = reply.send(self.queue_in_outbox(text));
                    }
                    Some(Command::Shutdown) | None => return None,
                },
            }
        }
    }

    async fn idle(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>) {
        let _ = self.wait(commands, std::future::pending::<()>()).await;
    }

    /// One relay link lifetime.
    async fn serve(&mut self, commands: &mut mpsc::UnboundedReceiver<Command>, role: Role) -> Exit {
        let Some(me) = self.me.clone() else {
            return Exit::Fatal;
        };

        let relay = self.relay.clone();
        let url = self.config.relay_url.clone();
        let mut link = match self.wait(commands, async move { relay.connect(&url).await }).await {
            None => return Exit::Shutdown,
            Some(Ok(link)) => link,
            Some(Err(e)) => {
                tracing::warn!(room = %self.room, error = %e, "Relay connection failed");
                return Exit::LinkLost;
            }
        };
        self.emit(SessionStatus::Authenticating);

        let provider = self.wallet.clone();
        let db = self.db.clone();
        let room = self.room.clone();
        let signing = async move { wallet::credential(provider.as_ref(), &db, &room, &me).await };
        let credential = match self.wait(commands, signing).await {
            None => return Exit::Shutdown,
            Some(Ok(credential)) => credential,
            Some(Err(e)) => {
                self.fail(e.to_string());
                return Exit::Fatal;
            }
        };

        let auth = ControlFrame::Auth {
            room_id: self.room.to_string(),
            address: credential.address,
            signature: credential.signature,
        };
        if link.send(auth).is_err() {
            return Exit::LinkLost;
        }

        let mut session = PeerSession::new(self.room.clone(), role, self.peers.clone());
        let mut authenticated = false;
        self.peer_present = false;

        loop {
            tokio::select! {
                frame = link.recv() => {
                    let Some(frame) = frame else {
                        tracing::warn!(room = %self.room, "Relay link lost");
                        session.close().await;
                        return Exit::LinkLost;
                    };
                    if let Some(exit) = self
                        .on_relay_frame(frame, &mut session, &link, &mut authenticated)
                        .await
                    {
                        session.close().await;
                        return exit;
                    }
                }
                event = session.next_event() => {
                    self.on_peer_event(event, &mut session, &link).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Send { text, reply }) => {
                        let result = self.send_chat(text, &session, &link, authenticated).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => {
                        session.close().await;
                        return Exit::Shutdown;
                    }
                },
            }
        }
    }

    // ── Relay frames ──────────────────────────────────────────────────────────

    async fn on_relay_frame(
        &mut self,
        frame: ControlFrame,
        session: &mut PeerSession,
        link: &RelayLink,
        authenticated: &mut bool,
    ) -> Option<Exit> {
        match frame {
            ControlFrame::AuthSuccess => {
                *authenticated = true;
                tracing::info!(room = %self.room, "Authenticated with relay");
                if !self.peer_present {
                    self.emit(SessionStatus::WaitingForPeer);
                }
            }
            ControlFrame::Error { message } => {
                tracing::warn!(room = %self.room, reason = %message, "Relay error");
                if !*authenticated {
                    self.fail(message);
                    return Some(Exit::Fatal);
                }
            }
            ControlFrame::PeerStatus {
                status: PeerStatus::Online,
            } => {
                self.peer_present = true;
                tracing::info!(room = %self.room, "Peer online");
                if session.is_open() {
                    self.emit(SessionStatus::Online);
                    return None;
                }
                self.emit(SessionStatus::PeerOnline);
                if session.role() == Role::Initiator {
                    if session.state() != HandshakeState::Idle {
                        // The peer came back; its old handshake is gone.
                        self.reset_session(session).await;
                    }
                    self.offer(session, link).await;
                }
            }
            ControlFrame::PeerStatus {
                status: PeerStatus::Offline,
            } => {
                self.peer_present = false;
                tracing::info!(room = %self.room, "Peer offline");
                self.reset_session(session).await;
                self.emit(SessionStatus::WaitingForPeer);
            }
            ControlFrame::Offer { room_id, offer } if room_id == self.room => {
                if let Some(answer) = session.handle_offer(offer).await {
                    self.forward(link, answer);
                }
            }
            ControlFrame::Answer { room_id, answer } if room_id == self.room => {
                session.handle_answer(answer).await;
            }
            ControlFrame::Ice { room_id, candidate } if room_id == self.room => {
                session.handle_candidate(candidate).await;
            }
            ControlFrame::Message { room_id, message } if room_id == self.room => {
                self.receive(message);
            }
            other => {
                tracing::debug!(room = %self.room, kind = other.kind(), "Ignoring relay frame");
            }
        }
        None
    }

    // ── Peer events ───────────────────────────────────────────────────────────

    async fn on_peer_event(&mut self, event: PeerEvent, session: &mut PeerSession, link: &RelayLink) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.forward(
                    link,
                    ControlFrame::Ice {
                        room_id: self.room.clone(),
                        candidate,
                    },
                );
            }
            PeerEvent::ChannelOpen => {
                if !session.on_channel_open() {
                    return;
                }
                let open: &PeerSession = session;
                let flushed = self
                    .outbox
                    .drain(&self.room, move |message| {
                        open.send_chat(message.with_state(DeliveryState::Sent))
                    })
                    .await;
                if let Err(e) = flushed {
                    tracing::warn!(room = %self.room, error = %e, "Outbox flush failed");
                }
                self.emit(SessionStatus::Online);
            }
            PeerEvent::ChannelMessage(text) => match ControlFrame::decode(&text) {
                Ok(ControlFrame::Message { message, .. }) => self.receive(message),
                Ok(other) => {
                    tracing::debug!(room = %self.room, kind = other.kind(), "Ignoring channel frame");
                }
                Err(e) => {
                    tracing::warn!(room = %self.room, error = %e, "Dropping malformed channel message");
                }
            },
            PeerEvent::ChannelClosed => {
                if matches!(session.state(), HandshakeState::Idle | HandshakeState::Closed) {
                    return;
                }
                tracing::info!(room = %self.room, "Data channel closed");
                let deferred = session.take_deferred_offer();
                self.reset_session(session).await;
                if self.peer_present {
                    self.emit(SessionStatus::PeerOnline);
                    if session.role() == Role::Initiator {
                        self.offer(session, link).await;
                    } else if let Some((offer, candidates)) = deferred {
                        for candidate in candidates {
                            session.handle_candidate(candidate).await;
                        }
                        if let Some(answer) = session.handle_offer(offer).await {
                            self.forward(link, answer);
                        }
                    }
                } else {
                    self.emit(SessionStatus::WaitingForPeer);
                }
            }
        }
    }

    async fn offer(&self, session: &mut PeerSession, link: &RelayLink) {
        if let Some(offer) = session.start_offer().await {
            self.forward(link, offer);
        }
    }

    async fn reset_session(&self, session: &mut PeerSession) {
        session.close().await;
        *session = PeerSession::new(self.room.clone(), session.role(), self.peers.clone());
    }

    fn forward(&self, link: &RelayLink, frame: ControlFrame) {
        let kind = frame.kind();
        if let Err(e) = link.send(frame) {
            tracing::warn!(room = %self.room, kind = kind, error = %e, "Failed to send frame to relay");
        }
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    fn compose(&self, text: String) -> Result<ChatMessage> {
        let me = self.me.clone().ok_or(Error::NotConnected)?;
        if text.trim().is_empty() {
            return Err(Error::InvalidMessage("message is empty".into()));
        }
        Ok(ChatMessage::new(me, text))
    }

    fn queue_in_outbox(&mut self, text: String) -> Result<ChatMessage> {
        let message = self.compose(text)?.with_state(DeliveryState::Queued);
        self.ledger.append(&self.room, &message)?;
        self.outbox.push(&self.room, &message)?;
        tracing::debug!(room = %self.room, message_id = %message.id, "Queued message in outbox");
        Ok(message)
    }

    async fn send_chat(
        &mut self,
        text: String,
        session: &PeerSession,
        link: &RelayLink,
        authenticated: bool,
    ) -> Result<ChatMessage> {
        let message = self.compose(text)?;

        if session.is_open() {
            match session.send_chat(message.clone()).await {
                Ok(()) => {
                    self.ledger.append(&self.room, &message)?;
                    return Ok(message);
                }
                Err(e) => {
                    tracing::warn!(room = %self.room, error = %e, "Channel send failed, queuing");
                }
            }
        }

        let message = message.with_state(DeliveryState::Queued);
        self.ledger.append(&self.room, &message)?;
        if authenticated
            && !self.peer_present
            && link.send(message.clone().into_frame(&self.room)).is_ok()
        {
            tracing::debug!(room = %self.room, message_id = %message.id, "Handed message to relay queue");
            return Ok(message);
        }
        self.outbox.push(&self.room, &message)?;
        Ok(message)
    }

    fn receive(&self, message: ChatMessage) {
        let message = message.with_state(DeliveryState::Delivered);
        match self.ledger.append(&self.room, &message) {
            Ok(true) => {
                let _ = self.events.send(ClientEvent::Message(message));
            }
            Ok(false) => {
                tracing::debug!(room = %self.room, message_id = %message.id, "Duplicate message ignored");
            }
            Err(e) => {
                tracing::warn!(room = %self.room, error = %e, "Failed to record inbound message");
            }
        }
    }

    // ── Status ────────────────────────────────────────────────────────────────

    fn emit(&mut self, status: SessionStatus) {
        if self.status.as_ref() == Some(&status) {
            return;
        }
        tracing::debug!(room = %self.room, status = ?status, "Session status");
        self.status = Some(status.clone());
        let _ = self.events.send(ClientEvent::Status(status));
    }

    fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(room = %self.room, error = %message, "Room session failed");
        self.emit(SessionStatus::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Signature;
    use crate::transport::memory::MemoryNetwork;
    use crate::wallet::{RetryPolicy, WalletError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct TestWallet {
        address: std::result::Result<Address, WalletError>,
        signs: Mutex<u32>,
    }

    impl TestWallet {
        fn new(address: &str) -> Self {
            Self {
                address: Ok(Address::new(address)),
                signs: Mutex::new(0),
            }
        }

        fn failing(error: WalletError) -> Self {
            Self {
                address: Err(error),
                signs: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Wallet for TestWallet {
        async fn address(&self) -> std::result::Result<Address, WalletError> {
            self.address.clone()
        }

        async fn sign(
            &self,
            _room: &RoomId,
            address: &Address,
        ) -> std::result::Result<Signature, WalletError> {
            *self.signs.lock() += 1;
            Ok(json!({ "signature": format!("sig-{address}") }))
        }
    }

    /// Relay end of a link: frames from the client arrive on `from_client`.
    struct RelaySide {
        from_client: mpsc::UnboundedReceiver<ControlFrame>,
        to_client: mpsc::UnboundedSender<ControlFrame>,
    }

    impl RelaySide {
        async fn next(&mut self) -> ControlFrame {
            timeout(WAIT, self.from_client.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("client link closed")
        }

        fn push(&self, frame: ControlFrame) {
            self.to_client.send(frame).unwrap();
        }
    }

    struct ScriptedRelay {
        sides: mpsc::UnboundedSender<RelaySide>,
    }

    #[async_trait]
    impl RelayConnector for ScriptedRelay {
        async fn connect(&self, _url: &str) -> Result<RelayLink> {
            let (client_tx, from_client) = mpsc::unbounded_channel();
            let (to_client, client_rx) = mpsc::unbounded_channel();
            self.sides
                .send(RelaySide {
                    from_client,
                    to_client,
                })
                .map_err(|_| Error::ConnectionFailed("test relay gone".into()))?;
            Ok(RelayLink::new(client_tx, client_rx))
        }
    }

    fn room() -> RoomId {
        RoomId::between("addr1alice", "addr1bob").unwrap()
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            settle_delay: Duration::ZERO,
            wallet_retry: RetryPolicy {
                retries: 1,
                delay: Duration::from_millis(1),
            },
            reconnect_delay: Duration::from_millis(10),
            ..ClientConfig::default()
        }
    }

    struct Harness {
        handle: ClientHandle,
        events: mpsc::UnboundedReceiver<ClientEvent>,
        sides: mpsc::UnboundedReceiver<RelaySide>,
        wallet: Arc<TestWallet>,
    }

    fn start(wallet: TestWallet) -> Harness {
        let wallet = Arc::new(wallet);
        let (sides_tx, sides) = mpsc::unbounded_channel();
        let client = SignalingClient::new(
            fast_config(),
            wallet.clone(),
            Arc::new(ScriptedRelay { sides: sides_tx }),
            Arc::new(MemoryNetwork::new()),
            Database::open(None).unwrap(),
        );
        let (handle, events) = client.start(room(), Address::new("addr1bob")).unwrap();
        Harness {
            handle,
            events,
            sides,
            wallet,
        }
    }

    impl Harness {
        async fn next_event(&mut self) -> ClientEvent {
            timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event stream closed")
        }

        async fn expect_status(&mut self, status: SessionStatus) {
            assert_eq!(self.next_event().await, ClientEvent::Status(status));
        }

        async fn relay(&mut self) -> RelaySide {
            timeout(WAIT, self.sides.recv())
                .await
                .expect("timed out waiting for relay connect")
                .expect("client gone")
        }

        /// Connect, authenticate and leave the client waiting for its peer.
        async fn authenticated(&mut self) -> RelaySide {
            self.expect_status(SessionStatus::Connecting).await;
            let mut relay = self.relay().await;
            self.expect_status(SessionStatus::Authenticating).await;
            match relay.next().await {
                ControlFrame::Auth { .. } => {}
                other => panic!("expected auth, got {other:?}"),
            }
            relay.push(ControlFrame::AuthSuccess);
            self.expect_status(SessionStatus::WaitingForPeer).await;
            relay
        }
    }

    #[tokio::test]
    async fn test_start_rejects_foreign_friend() {
        let (sides_tx, _sides) = mpsc::unbounded_channel();
        let client = SignalingClient::new(
            fast_config(),
            Arc::new(TestWallet::new("addr1alice")),
            Arc::new(ScriptedRelay { sides: sides_tx }),
            Arc::new(MemoryNetwork::new()),
            Database::open(None).unwrap(),
        );
        assert!(matches!(
            client.start(room(), Address::new("addr1carol")),
            Err(Error::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_auth_frame_carries_room_and_signature() {
        let mut h = start(TestWallet::new("addr1alice"));
        h.expect_status(SessionStatus::Connecting).await;
        let mut relay = h.relay().await;
        match relay.next().await {
            ControlFrame::Auth {
                room_id,
                address,
                signature,
            } => {
                assert_eq!(room_id, "addr1alice_addr1bob");
                assert_eq!(address, Address::new("addr1alice"));
                assert_eq!(signature["signature"], "sig-addr1alice");
            }
            other => panic!("expected auth, got {other:?}"),
        }
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_wallet_exhaustion_is_terminal() {
        let mut h = start(TestWallet::failing(WalletError::AccountChanged));
        h.expect_status(SessionStatus::Connecting).await;
        h.expect_status(SessionStatus::Error("Wallet Error: account changed".into()))
            .await;
        assert!(matches!(
            h.handle.send_message("anyone?").await,
            Err(Error::NotConnected)
        ));
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_non_member_wallet_is_rejected() {
        let mut h = start(TestWallet::new("addr1mallory"));
        h.expect_status(SessionStatus::Connecting).await;
        match h.next_event().await {
            ClientEvent::Status(SessionStatus::Error(message)) => {
                assert!(message.starts_with("Unauthorized"));
            }
            other => panic!("expected error status, got {other:?}"),
        }
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_relay_unauthorized_is_terminal() {
        let mut h = start(TestWallet::new("addr1alice"));
        h.expect_status(SessionStatus::Connecting).await;
        let mut relay = h.relay().await;
        h.expect_status(SessionStatus::Authenticating).await;
        relay.next().await;
        relay.push(ControlFrame::error("Unauthorized"));
        h.expect_status(SessionStatus::Error("Unauthorized".into())).await;
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_message_goes_to_relay_when_peer_absent() {
        let mut h = start(TestWallet::new("addr1alice"));
        let mut relay = h.authenticated().await;

        let sent = h.handle.send_message("are you there?").await.unwrap();
        assert_eq!(sent.delivery_state, DeliveryState::Queued);
        match relay.next().await {
            ControlFrame::Message { room_id, message } => {
                assert_eq!(room_id, room());
                assert_eq!(message.id, sent.id);
                assert_eq!(message.text, "are you there?");
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(h.handle.history().unwrap(), vec![sent]);
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let mut h = start(TestWallet::new("addr1alice"));
        let _relay = h.authenticated().await;
        assert!(matches!(
            h.handle.send_message("   ").await,
            Err(Error::InvalidMessage(_))
        ));
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_inbound_replay_is_deduplicated() {
        let mut h = start(TestWallet::new("addr1alice"));
        let relay = h.authenticated().await;

        let message = ChatMessage::new(Address::new("addr1bob"), "queued while you were away");
        relay.push(message.clone().into_frame(&room()));
        relay.push(message.clone().into_frame(&room()));

        match h.next_event().await {
            ClientEvent::Message(got) => {
                assert_eq!(got.id, message.id);
                assert_eq!(got.delivery_state, DeliveryState::Delivered);
            }
            other => panic!("expected message, got {other:?}"),
        }
        // A later frame proves the duplicate produced no event
        relay.push(ControlFrame::peer_status(PeerStatus::Online));
        h.expect_status(SessionStatus::PeerOnline).await;
        assert_eq!(h.handle.history().unwrap().len(), 1);
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_initiator_offers_when_peer_online() {
        let mut h = start(TestWallet::new("addr1alice"));
        let mut relay = h.authenticated().await;

        relay.push(ControlFrame::peer_status(PeerStatus::Online));
        h.expect_status(SessionStatus::PeerOnline).await;
        match relay.next().await {
            ControlFrame::Offer { room_id, .. } => assert_eq!(room_id, room()),
            other => panic!("expected offer, got {other:?}"),
        }
        match relay.next().await {
            ControlFrame::Ice { .. } => {}
            other => panic!("expected ice, got {other:?}"),
        }

        // Handshake in flight: messages wait in the outbox
        let queued = h.handle.send_message("hold this").await.unwrap();
        assert_eq!(queued.delivery_state, DeliveryState::Queued);

        relay.push(ControlFrame::peer_status(PeerStatus::Offline));
        h.expect_status(SessionStatus::WaitingForPeer).await;
        h.handle.close().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let mut h = start(TestWallet::new("addr1alice"));
        let relay = h.authenticated().await;
        drop(relay);

        h.expect_status(SessionStatus::Connecting).await;
        let mut relay = h.relay().await;
        h.expect_status(SessionStatus::Authenticating).await;
        match relay.next().await {
            ControlFrame::Auth { .. } => {}
            other => panic!("expected auth, got {other:?}"),
        }
        // The cached credential is reused
        assert_eq!(*h.wallet.signs.lock(), 1);
        h.handle.close().await;
    }
}
