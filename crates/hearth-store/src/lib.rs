//! # hearth-store
//!
//! SQLite persistence for the Hearth messaging core.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed operations for the two stores the
//! server serves:
//!
//! - the **message store**: direct messages and group chats ([`messages`],
//!   [`groups`])
//! - the **call signaling store**: in-flight call sessions with their SDP
//!   offer/answer and ICE candidates ([`calls`])
//!
//! Permission and single-flight rules live here, so every caller of the store
//! gets the same guarantees regardless of transport.

pub mod calls;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use groups::LeaveOutcome;
