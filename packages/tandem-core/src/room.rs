//! # Rooms
//!
//! A room is a conversation between exactly two addresses. Its id is derived
//! from the two addresses alone, so both participants compute the same id
//! without coordinating:
//!
//! ```text
//!   RoomId(a, b) = sort(normalize(a), normalize(b)).join("_")
//! ```
//!
//! Normalization trims surrounding whitespace and ASCII-lowercases, and it is
//! applied everywhere an address is compared: room construction, relay
//! membership checks and the initiator rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between the two member addresses of a room id.
pub const ROOM_SEPARATOR: char = '_';

/// A normalized participant address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Normalize a raw address string.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when nothing is left after normalization.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidAddress("address is empty".into()));
        }
        if self.0.contains(ROOM_SEPARATOR) {
            return Err(Error::InvalidAddress(format!(
                "address must not contain '{ROOM_SEPARATOR}': {}",
                self.0
            )));
        }
        Ok(())
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Address::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Address::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identifier of a two-party room.
///
/// Always holds two distinct, normalized, sorted member addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId {
    low: Address,
    high: Address,
}

impl RoomId {
    /// Room between two addresses, in either order.
    pub fn between(a: impl Into<Address>, b: impl Into<Address>) -> Result<Self> {
        let a = a.into();
        let b = b.into();
        a.validate()?;
        b.validate()?;
        if a == b {
            return Err(Error::InvalidRoomId(format!(
                "a room needs two distinct members, got {a} twice"
            )));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    /// Parse a wire room id. Members are normalized and re-sorted, so ids
    /// that differ only in case or member order resolve to the same room.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split(ROOM_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), None) if !a.trim().is_empty() && !b.trim().is_empty() => {
                Self::between(a, b).map_err(|e| Error::InvalidRoomId(format!("{raw}: {e}")))
            }
            _ => Err(Error::InvalidRoomId(format!(
                "expected two addresses joined by '{ROOM_SEPARATOR}': {raw}"
            ))),
        }
    }

    /// Both members, lowest first.
    pub fn members(&self) -> (&Address, &Address) {
        (&self.low, &self.high)
    }

    /// Whether `address` is one of the two members.
    pub fn contains(&self, address: &Address) -> bool {
        &self.low == address || &self.high == address
    }

    /// The member other than `address`, if `address` belongs to the room.
    pub fn peer_of(&self, address: &Address) -> Option<&Address> {
        if &self.low == address {
            Some(&self.high)
        } else if &self.high == address {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.low, ROOM_SEPARATOR, self.high)
    }
}

impl TryFrom<String> for RoomId {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        RoomId::parse(&raw)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

/// Which side of the handshake a client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the data channel and sends the offer.
    Initiator,
    /// Waits for the offer and answers it.
    Responder,
}

impl Role {
    /// Role of `mine` when talking to `peer`.
    pub fn for_pair(mine: &Address, peer: &Address) -> Self {
        if is_initiator(mine, peer) {
            Role::Initiator
        } else {
            Role::Responder
        }
    }
}

/// The lexicographically smaller address initiates.
pub fn is_initiator(mine: &Address, peer: &Address) -> bool {
    mine < peer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_is_symmetric() {
        let ab = RoomId::between("addr1alice", "addr1bob").unwrap();
        let ba = RoomId::between("addr1bob", "addr1alice").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.to_string(), "addr1alice_addr1bob");
    }

    #[test]
    fn test_room_id_normalizes_members() {
        let room = RoomId::between("  Addr1BOB ", "addr1alice").unwrap();
        assert_eq!(room.to_string(), "addr1alice_addr1bob");
        assert!(room.contains(&Address::new("ADDR1BOB")));
    }

    #[test]
    fn test_parse_resorts_members() {
        let room = RoomId::parse("addr1zed_addr1amy").unwrap();
        assert_eq!(room.to_string(), "addr1amy_addr1zed");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for raw in ["", "addr1alice", "addr1alice_", "_addr1bob", "a_b_c", "a_a"] {
            match RoomId::parse(raw) {
                Err(Error::InvalidRoomId(_)) => {}
                other => panic!("expected InvalidRoomId for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_peer_of() {
        let alice = Address::new("addr1alice");
        let bob = Address::new("addr1bob");
        let room = RoomId::between(alice.clone(), bob.clone()).unwrap();
        assert_eq!(room.peer_of(&alice), Some(&bob));
        assert_eq!(room.peer_of(&bob), Some(&alice));
        assert_eq!(room.peer_of(&Address::new("addr1carol")), None);
    }

    #[test]
    fn test_exactly_one_initiator() {
        let alice = Address::new("addr1alice");
        let bob = Address::new("addr1bob");
        assert_ne!(is_initiator(&alice, &bob), is_initiator(&bob, &alice));
        assert_eq!(Role::for_pair(&alice, &bob), Role::Initiator);
        assert_eq!(Role::for_pair(&bob, &alice), Role::Responder);
    }

    #[test]
    fn test_initiator_uses_normalized_form() {
        let upper = Address::new("ADDR1ZED");
        let lower = Address::new("addr1amy");
        // "addr1amy" < "addr1zed" even though raw "ADDR1ZED" < "addr1amy"
        assert!(is_initiator(&lower, &upper));
    }

    #[test]
    fn test_room_id_serde_as_string() {
        let room = RoomId::between("addr1alice", "addr1bob").unwrap();
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, "\"addr1alice_addr1bob\"");
        let back: RoomId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, room);
        assert!(serde_json::from_str::<RoomId>("\"nope\"").is_err());
    }
}
