//! # Database Schema
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐      │
//! │  │     ledger      │    │     outbox      │    │   credentials   │      │
//! │  ├─────────────────┤    ├─────────────────┤    ├─────────────────┤      │
//! │  │ seq             │    │ seq             │    │ room_id (PK)    │      │
//! │  │ room_id         │    │ room_id         │    │ address         │      │
//! │  │ message_id      │    │ message_id      │    │ signature       │      │
//! │  │ body (json)     │    │ body (json)     │    │ created_at      │      │
//! │  └─────────────────┘    └─────────────────┘    └─────────────────┘      │
//! │                                                                         │
//! │  (room_id, message_id) is unique in ledger and outbox; seq keeps        │
//! │  insertion order.                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Permanent per-room history, deduplicated by message id
CREATE TABLE IF NOT EXISTS ledger (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    -- ChatMessage as JSON
    body TEXT NOT NULL,
    UNIQUE (room_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_ledger_room ON ledger(room_id, seq);

-- Messages waiting for the peer data channel
CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    body TEXT NOT NULL,
    UNIQUE (room_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_outbox_room ON outbox(room_id, seq);

-- Relay credentials, reused across sessions
CREATE TABLE IF NOT EXISTS credentials (
    room_id TEXT PRIMARY KEY,
    address TEXT NOT NULL,
    -- Wallet signature as JSON
    signature TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
"#;
