//! Relay state management.
//!
//! Tracks live connections, two-party rooms and each room's offline message
//! queue. Rooms live in a [`DashMap`]; every room mutation happens while that
//! room's entry guard is held, so authentication, routing and disconnect are
//! mutually exclusive per room without blocking other rooms.
//!
//! Lock order is always connections, then rooms, and no guard is held across
//! an await.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use tandem_core::protocol::{ChatMessage, ControlFrame, PeerStatus, Signature};
use tandem_core::room::{Address, RoomId};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Per-room offline queue bound. `None` keeps every message.
    pub max_offline_per_room: Option<NonZeroUsize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_offline_per_room: None,
        }
    }
}

/// Identifier of one transport connection.
pub type ConnectionId = Uuid;

/// Outbound text frames for one connection.
pub type ClientSender = mpsc::UnboundedSender<String>;

/// A transport connection and, once authenticated, its room binding.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub sender: ClientSender,
    pub binding: Option<(RoomId, Address)>,
}

impl Connection {
    pub fn is_authenticated(&self) -> bool {
        self.binding.is_some()
    }
}

#[derive(Debug)]
struct Member {
    connection: ConnectionId,
    address: Address,
    sender: ClientSender,
}

/// Authenticated members of a room and the messages nobody was there to
/// receive.
#[derive(Debug, Default)]
pub struct Room {
    members: Vec<Member>,
    offline: VecDeque<ChatMessage>,
}

impl Room {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn queued(&self) -> &VecDeque<ChatMessage> {
        &self.offline
    }

    fn is_idle(&self) -> bool {
        self.members.is_empty() && self.offline.is_empty()
    }
}

/// Result of an `auth` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Bound to the room; `flushed` queued messages were delivered and
    /// `peers` other members were told about the newcomer.
    Authenticated { flushed: usize, peers: usize },
    /// Room id did not decompose, or the address is not a member.
    Unauthorized,
    /// The connection is already bound; nothing changed.
    AlreadyAuthenticated,
    /// The connection is gone.
    UnknownConnection,
}

/// Result of routing a non-auth frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to this many other members.
    Delivered(usize),
    /// Nobody else was present; the chat message was queued.
    Queued,
    /// Nobody else was present and the frame is not a chat message.
    Dropped,
    /// The connection has not authenticated.
    Unauthenticated,
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// Connection id → connection, authenticated or not.
    pub connections: Arc<DashMap<ConnectionId, Connection>>,

    /// Room id → members and offline queue.
    pub rooms: Arc<DashMap<RoomId, Room>>,

    /// Server configuration.
    pub config: RelayConfig,
}

fn encode(frame: &ControlFrame) -> Option<String> {
    match frame.encode() {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(kind = frame.kind(), error = %e, "Failed to serialize frame");
            None
        }
    }
}

impl RelayState {
    /// Create a new relay state with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            config,
        }
    }

    // ── Connection Management ─────────────────────────────────────────────

    /// Register a freshly opened transport connection.
    pub fn connect(&self, sender: ClientSender) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                id,
                sender,
                binding: None,
            },
        );
        tracing::debug!(conn = %id, "Connection opened");
        id
    }

    /// Send a frame to one connection. Returns `false` if it is gone.
    pub fn send_to_connection(&self, id: ConnectionId, frame: &ControlFrame) -> bool {
        let Some(text) = encode(frame) else {
            return false;
        };
        match self.connections.get(&id) {
            Some(conn) => conn.sender.send(text).is_ok(),
            None => false,
        }
    }

    // ── Authentication ────────────────────────────────────────────────────

    /// Bind a connection to a room.
    ///
    /// Membership is the only check: the address must be one of the two
    /// addresses the room id decomposes into. The signature is carried for
    /// the record and not verified. On success the queued messages of the
    /// room are flushed to the newcomer, the other members are told it is
    /// online, and the newcomer is told when another member is already
    /// present.
    pub fn authenticate(
        &self,
        id: ConnectionId,
        room_id: &str,
        address: &Address,
        signature: &Signature,
    ) -> AuthOutcome {
        match self.connections.get(&id) {
            None => return AuthOutcome::UnknownConnection,
            Some(conn) => {
                if let Some((bound, _)) = &conn.binding {
                    tracing::warn!(conn = %id, room = %bound, "Ignoring auth on an authenticated connection");
                    return AuthOutcome::AlreadyAuthenticated;
                }
            }
        }

        let room_id = match RoomId::parse(room_id) {
            Ok(room_id) => room_id,
            Err(e) => {
                tracing::warn!(conn = %id, error = %e, "Rejecting auth for invalid room");
                return AuthOutcome::Unauthorized;
            }
        };
        if !room_id.contains(address) {
            tracing::warn!(conn = %id, room = %room_id, address = %address, "Rejecting auth from non-member");
            return AuthOutcome::Unauthorized;
        }

        let sender = {
            let Some(mut conn) = self.connections.get_mut(&id) else {
                return AuthOutcome::UnknownConnection;
            };
            if conn.binding.is_some() {
                return AuthOutcome::AlreadyAuthenticated;
            }
            conn.binding = Some((room_id.clone(), address.clone()));
            conn.sender.clone()
        };

        let mut room = self.rooms.entry(room_id.clone()).or_default();

        if let Some(text) = encode(&ControlFrame::AuthSuccess) {
            let _ = sender.send(text);
        }

        let queued = std::mem::take(&mut room.offline);
        let flushed = queued.len();
        for message in queued {
            if let Some(text) = encode(&message.into_frame(&room_id)) {
                let _ = sender.send(text);
            }
        }

        let mut peers = 0;
        if let Some(online) = encode(&ControlFrame::peer_status(PeerStatus::Online)) {
            for member in room.members.iter().filter(|m| m.connection != id) {
                if member.sender.send(online.clone()).is_ok() {
                    peers += 1;
                }
            }
            if !room.members.is_empty() {
                let _ = sender.send(online);
            }
        }

        room.members.push(Member {
            connection: id,
            address: address.clone(),
            sender,
        });

        tracing::info!(
            conn = %id,
            room = %room_id,
            address = %address,
            signed = !signature.is_null(),
            flushed = flushed,
            peers = peers,
            "Connection authenticated"
        );
        AuthOutcome::Authenticated { flushed, peers }
    }

    // ── Routing ───────────────────────────────────────────────────────────

    /// Forward a non-auth frame to the other members of the sender's room.
    ///
    /// `raw` is the frame text exactly as received. A chat message that
    /// finds nobody to deliver to is queued for the next member to
    /// authenticate.
    pub fn route(&self, id: ConnectionId, raw: &str, frame: &ControlFrame) -> RouteOutcome {
        let binding = self
            .connections
            .get(&id)
            .and_then(|conn| conn.binding.clone());
        let Some((room_id, _)) = binding else {
            tracing::debug!(conn = %id, kind = frame.kind(), "Dropping frame from unauthenticated connection");
            return RouteOutcome::Unauthenticated;
        };

        let mut room = self.rooms.entry(room_id.clone()).or_default();
        let mut delivered = 0;
        for member in room.members.iter().filter(|m| m.connection != id) {
            if member.sender.send(raw.to_owned()).is_ok() {
                delivered += 1;
            }
        }
        if delivered > 0 {
            tracing::debug!(conn = %id, room = %room_id, kind = frame.kind(), recipients = delivered, "Routed frame");
            return RouteOutcome::Delivered(delivered);
        }

        match frame {
            ControlFrame::Message { message, .. } => {
                if let Some(max) = self.config.max_offline_per_room {
                    while room.offline.len() >= max.get() {
                        let Some(evicted) = room.offline.pop_front() else {
                            break;
                        };
                        tracing::warn!(
                            room = %room_id,
                            max = max.get(),
                            message_id = %evicted.id,
                            "Offline queue full, dropping oldest message"
                        );
                    }
                }
                room.offline.push_back(message.clone());
                tracing::info!(
                    room = %room_id,
                    message_id = %message.id,
                    queued = room.offline.len(),
                    "Queued message for offline peer"
                );
                RouteOutcome::Queued
            }
            _ => {
                tracing::debug!(room = %room_id, kind = frame.kind(), "No recipient for frame");
                RouteOutcome::Dropped
            }
        }
    }

    // ── Disconnect ────────────────────────────────────────────────────────

    /// Forget a connection, telling the rest of its room it went offline.
    /// Returns how many members were notified.
    pub fn disconnect(&self, id: ConnectionId) -> usize {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return 0;
        };
        let Some((room_id, address)) = conn.binding else {
            tracing::debug!(conn = %id, "Unauthenticated connection closed");
            return 0;
        };

        let mut notified = 0;
        let idle = match self.rooms.get_mut(&room_id) {
            Some(mut room) => {
                room.members.retain(|m| m.connection != id);
                if let Some(offline) = encode(&ControlFrame::peer_status(PeerStatus::Offline)) {
                    for member in &room.members {
                        if member.sender.send(offline.clone()).is_ok() {
                            notified += 1;
                        }
                    }
                }
                room.is_idle()
            }
            None => false,
        };
        if idle {
            self.rooms.remove_if(&room_id, |_, room| room.is_idle());
        }

        tracing::info!(conn = %id, room = %room_id, address = %address, notified = notified, "Connection closed");
        notified
    }

    // ── Stats ─────────────────────────────────────────────────────────────

    /// Number of authenticated connections.
    pub fn online_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|conn| conn.is_authenticated())
            .count()
    }

    /// Number of open connections, authenticated or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of rooms with members or queued messages.
    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Total queued messages across all rooms.
    pub fn offline_queue_size(&self) -> usize {
        self.rooms.iter().map(|room| room.offline.len()).sum()
    }

    /// Queued messages for one room.
    pub fn queued_for(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|r| r.offline.len()).unwrap_or(0)
    }

    /// Addresses currently present in a room.
    pub fn members_of(&self, room: &RoomId) -> Vec<Address> {
        self.rooms
            .get(room)
            .map(|r| r.members.iter().map(|m| m.address.clone()).collect())
            .unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
