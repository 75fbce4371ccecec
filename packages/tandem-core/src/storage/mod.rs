//! # Storage Module
//!
//! Local persistence for one client:
//!
//! - [`Ledger`] - permanent per-room history, deduplicated by message id
//! - [`Outbox`] - per-room messages waiting for the peer data channel
//! - [`Database`] - shared SQLite handle, which also caches relay credentials

mod database;
mod ledger;
mod outbox;
pub mod schema;

pub use database::{Credential, Database};
pub use ledger::Ledger;
pub use outbox::Outbox;
