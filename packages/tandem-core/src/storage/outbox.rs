//! Per-room queue of messages waiting for the peer data channel.

use std::future::Future;

use rusqlite::params;
use uuid::Uuid;

use super::database::{decode_message, Database};
use crate::error::Result;
use crate::protocol::ChatMessage;
use crate::room::RoomId;

/// Client-side offline queue.
///
/// Messages leave the outbox only after a successful send.
#[derive(Clone)]
pub struct Outbox {
    db: Database,
}

impl Outbox {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Queue a message. Queuing the same id twice keeps one entry.
    pub fn push(&self, room: &RoomId, message: &ChatMessage) -> Result<()> {
        let body = serde_json::to_string(message)?;
        self.db.conn().execute(
            "INSERT OR IGNORE INTO outbox (room_id, message_id, body) VALUES (?1, ?2, ?3)",
            params![room.to_string(), message.id.to_string(), body],
        )?;
        Ok(())
    }

    /// Queued messages of a room, oldest first.
    pub fn pending(&self, room: &RoomId) -> Result<Vec<ChatMessage>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT body FROM outbox WHERE room_id = ? ORDER BY seq")?;
        let bodies = stmt
            .query_map(params![room.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies.iter().map(|body| decode_message(body)).collect()
    }

    /// Remove one message after it was sent.
    pub fn remove(&self, room: &RoomId, id: &Uuid) -> Result<bool> {
        let removed = self.db.conn().execute(
            "DELETE FROM outbox WHERE room_id = ?1 AND message_id = ?2",
            params![room.to_string(), id.to_string()],
        )?;
        Ok(removed > 0)
    }

    pub fn len(&self, room: &RoomId) -> Result<usize> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM outbox WHERE room_id = ?",
            params![room.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self, room: &RoomId) -> Result<bool> {
        Ok(self.len(room)? == 0)
    }

    /// Send queued messages in order, removing each after its send succeeds.
    ///
    /// Stops at the first failed send; that message and everything after it
    /// stay queued. Returns how many messages were sent.
    pub async fn drain<F, Fut>(&self, room: &RoomId, mut send: F) -> Result<usize>
    where
        F: FnMut(ChatMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut sent = 0;
        for message in self.pending(room)? {
            let id = message.id;
            if let Err(e) = send(message).await {
                tracing::warn!(room = %room, message_id = %id, error = %e, "Outbox flush interrupted");
                break;
            }
            self.remove(room, &id)?;
            sent += 1;
        }
        if sent > 0 {
            tracing::info!(room = %room, sent = sent, "Flushed outbox");
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::room::Address;
    use parking_lot::Mutex;

    fn setup() -> (Outbox, RoomId, Address) {
        let outbox = Outbox::new(Database::open(None).unwrap());
        let room = RoomId::between("addr1alice", "addr1bob").unwrap();
        (outbox, room, Address::new("addr1alice"))
    }

    #[test]
    fn test_push_deduplicates() {
        let (outbox, room, me) = setup();
        let message = ChatMessage::new(me, "hi");
        outbox.push(&room, &message).unwrap();
        outbox.push(&room, &message).unwrap();
        assert_eq!(outbox.len(&room).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_in_order() {
        let (outbox, room, me) = setup();
        for text in ["m1", "m2", "m3"] {
            outbox.push(&room, &ChatMessage::new(me.clone(), text)).unwrap();
        }

        let sent = Mutex::new(Vec::new());
        let count = outbox
            .drain(&room, |message| {
                sent.lock().push(message.text);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(*sent.lock(), vec!["m1", "m2", "m3"]);
        assert!(outbox.is_empty(&room).unwrap());
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_failure() {
        let (outbox, room, me) = setup();
        for text in ["m1", "m2", "m3"] {
            outbox.push(&room, &ChatMessage::new(me.clone(), text)).unwrap();
        }

        let count = outbox
            .drain(&room, |message| async move {
                if message.text == "m2" {
                    Err(Error::ChannelClosed)
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(count, 1);
        let left: Vec<_> = outbox
            .pending(&room)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(left, vec!["m2", "m3"]);
    }

    #[test]
    fn test_remove() {
        let (outbox, room, me) = setup();
        let message = ChatMessage::new(me, "hi");
        outbox.push(&room, &message).unwrap();
        assert!(outbox.remove(&room, &message.id).unwrap());
        assert!(!outbox.remove(&room, &message.id).unwrap());
    }
}
