//! Append-only, deduplicated per-room message history.

use rusqlite::params;

use super::database::{decode_message, Database};
use crate::error::Result;
use crate::protocol::ChatMessage;
use crate::room::RoomId;

/// Per-room message history.
///
/// No two entries of a room share an id, and entries come back in the order
/// they were first appended.
#[derive(Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. Returns `false` without writing when the room
    /// already holds a message with the same id.
    pub fn append(&self, room: &RoomId, message: &ChatMessage) -> Result<bool> {
        let body = serde_json::to_string(message)?;
        let inserted = self.db.conn().execute(
            "INSERT OR IGNORE INTO ledger (room_id, message_id, body) VALUES (?1, ?2, ?3)",
            params![room.to_string(), message.id.to_string(), body],
        )?;
        Ok(inserted > 0)
    }

    /// Full history of a room in insertion order.
    pub fn read(&self, room: &RoomId) -> Result<Vec<ChatMessage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT body FROM ledger WHERE room_id = ? ORDER BY seq")?;
        let bodies = stmt
            .query_map(params![room.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies.iter().map(|body| decode_message(body)).collect()
    }

    /// Number of entries for a room.
    pub fn len(&self, room: &RoomId) -> Result<usize> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM ledger WHERE room_id = ?",
            params![room.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self, room: &RoomId) -> Result<bool> {
        Ok(self.len(room)? == 0)
    }
}
