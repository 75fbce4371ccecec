//! # Tandem Core
//!
//! Session establishment for two-party peer-to-peer chat. A lightweight
//! relay carries connection-setup metadata and buffers chat messages while a
//! peer is unreachable; once the data channel is up, chat flows directly
//! between the two clients.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         TANDEM CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SignalingClient (client)                    │  │
//! │  │   relay link ◄──► PeerSession ◄──► Ledger / Outbox ◄──► events   │  │
//! │  └──────┬──────────────────┬──────────────────┬───────────────┬─────┘  │
//! │         │                  │                  │               │        │
//! │  ┌──────▼──────┐  ┌────────▼───────┐  ┌───────▼──────┐  ┌─────▼─────┐  │
//! │  │  protocol   │  │    session     │  │   storage    │  │  wallet   │  │
//! │  │             │  │                │  │              │  │           │  │
//! │  │ ControlFrame│  │ Idle→Offering→ │  │ - Ledger     │  │ - address │  │
//! │  │ ChatMessage │  │ ...→ChannelOpen│  │ - Outbox     │  │ - sign    │  │
//! │  └──────┬──────┘  └────────┬───────┘  │ - Credentials│  └───────────┘  │
//! │         │                  │          └──────────────┘                 │
//! │  ┌──────▼──────┐  ┌────────▼───────┐                                   │
//! │  │    room     │  │   transport    │                                   │
//! │  │ Address     │  │ memory, webrtc │                                   │
//! │  │ RoomId      │  └────────────────┘                                   │
//! │  └─────────────┘                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`room`] - Participant addresses, room ids and the initiator rule
//! - [`protocol`] - Relay wire frames and chat messages
//! - [`storage`] - SQLite-backed ledger, outbox and credential cache
//! - [`session`] - Peer handshake state machine
//! - [`transport`] - Peer-connection engines behind an async seam
//! - [`wallet`] - Address/signature provider seam
//! - [`client`] - Signaling client driving one room

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod room;
pub mod session;
pub mod storage;
/// Time utilities.
pub mod time;
pub mod transport;
pub mod wallet;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use client::{ClientEvent, ClientHandle, SessionStatus, SignalingClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use protocol::{ChatMessage, ControlFrame, DeliveryState, PeerStatus};
pub use room::{Address, Role, RoomId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
