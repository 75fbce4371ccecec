//! # Database
//!
//! SQLite handle shared by the ledger, the outbox and the credential cache.
//!
//! ```text
//! ┌─────────────────┐
//! │ Ledger / Outbox │  per-room message tables
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Database     │  schema, credentials, shared connection
//! │   (this file)   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   SQLite DB     │  in-memory for tests, file otherwise
//! └─────────────────┘
//! ```

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::schema;
use crate::error::{Error, Result};
use crate::protocol::{ChatMessage, Signature};
use crate::room::{Address, RoomId};
use crate::time::now_timestamp_millis;

/// Address and signature presented to the relay for one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub address: Address,
    pub signature: Signature,
}

/// The main database handle
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;
                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema is at version {}", v);
            }
        }

        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // ========================================================================
    // CREDENTIALS
    // ========================================================================

    /// Cached credential for a room, if one was stored.
    pub fn cached_credential(&self, room: &RoomId) -> Result<Option<Credential>> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT address, signature FROM credentials WHERE room_id = ?",
                params![room.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((address, signature)) => {
                let signature = serde_json::from_str(&signature)
                    .map_err(|e| Error::Corrupted(format!("credential for {room}: {e}")))?;
                Ok(Some(Credential {
                    address: Address::new(address),
                    signature,
                }))
            }
            None => Ok(None),
        }
    }

    /// Store (or replace) the credential for a room.
    pub fn store_credential(&self, room: &RoomId, credential: &Credential) -> Result<()> {
        let signature = serde_json::to_string(&credential.signature)?;
        self.conn.lock().execute(
            "INSERT INTO credentials (room_id, address, signature, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(room_id) DO UPDATE SET
                address = excluded.address,
                signature = excluded.signature,
                created_at = excluded.created_at",
            params![
                room.to_string(),
                credential.address.as_str(),
                signature,
                now_timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Forget the credential for a room.
    pub fn clear_credential(&self, room: &RoomId) -> Result<bool> {
        let removed = self.conn.lock().execute(
            "DELETE FROM credentials WHERE room_id = ?",
            params![room.to_string()],
        )?;
        Ok(removed > 0)
    }
}

/// Decode a stored message body.
pub(crate) fn decode_message(body: &str) -> Result<ChatMessage> {
    serde_json::from_str(body).map_err(|e| Error::Corrupted(format!("stored message: {e}")))
}
