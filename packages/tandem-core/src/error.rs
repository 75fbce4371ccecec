//! # Error Handling
//!
//! Error types shared by every Tandem component.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Room Errors (100)                                                 │
//! │  │   ├── InvalidAddress        - Empty or unusable participant address │
//! │  │   ├── InvalidRoomId         - Room id does not name two members     │
//! │  │   └── Unauthorized          - Address is not a member of the room   │
//! │  │                                                                      │
//! │  ├── Protocol Errors (200)                                             │
//! │  │   ├── MalformedFrame        - Frame failed to decode                │
//! │  │   └── InvalidMessage        - Chat message rejected before sending  │
//! │  │                                                                      │
//! │  ├── Storage Errors (300)                                              │
//! │  │   ├── DatabaseError         - SQLite operation failed               │
//! │  │   └── Corrupted             - Stored row failed to decode           │
//! │  │                                                                      │
//! │  ├── Transport Errors (400)                                            │
//! │  │   ├── NotConnected          - No relay link / peer connection       │
//! │  │   ├── ConnectionFailed      - Relay link could not be opened        │
//! │  │   ├── TransportError        - Peer-connection engine failure        │
//! │  │   └── ChannelClosed         - Data channel not open                 │
//! │  │                                                                      │
//! │  └── Wallet Errors (500)                                               │
//! │      └── Wallet                - Wallet collaborator failure           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::wallet::WalletError;

/// Result type alias for Tandem Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tandem Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Room Errors (100-199)
    // ========================================================================

    /// Address was empty after normalization or contains the room separator
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Room id does not decompose into exactly two member addresses
    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    /// Address is not one of the room's two members
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ========================================================================
    // Protocol Errors (200-299)
    // ========================================================================

    /// A wire frame could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A chat message was rejected before it was sent
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // ========================================================================
    // Storage Errors (300-399)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored row could not be decoded
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    // ========================================================================
    // Transport Errors (400-499)
    // ========================================================================

    /// No active relay link or peer connection
    #[error("Not connected")]
    NotConnected,

    /// The relay link could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer-connection engine reported an error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The data channel is not open
    #[error("Data channel closed")]
    ChannelClosed,

    // ========================================================================
    // Wallet Errors (500-599)
    // ========================================================================

    /// The wallet collaborator failed
    #[error("Wallet Error: {0}")]
    Wallet(#[from] WalletError),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Get the error code for this error
    pub fn code(&self) -> i32 {
        match self {
            // Room (100-199)
            Error::InvalidAddress(_) => 100,
            Error::InvalidRoomId(_) => 101,
            Error::Unauthorized(_) => 102,

            // Protocol (200-299)
            Error::MalformedFrame(_) => 200,
            Error::InvalidMessage(_) => 202,

            // Storage (300-399)
            Error::DatabaseError(_) => 300,
            Error::Corrupted(_) => 301,

            // Transport (400-499)
            Error::NotConnected => 400,
            Error::ConnectionFailed(_) => 401,
            Error::TransportError(_) => 402,
            Error::ChannelClosed => 403,

            // Wallet (500-599)
            Error::Wallet(_) => 500,

            // Internal (900-999)
            Error::SerializationError(_) => 901,
        }
    }

    /// Check if this error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NotConnected
            | Error::ConnectionFailed(_)
            | Error::TransportError(_)
            | Error::ChannelClosed => true,
            Error::Wallet(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Error::Corrupted(format!("invalid message id: {err}"))
    }
}
