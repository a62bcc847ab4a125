//! # hearth-shared
//!
//! Types shared by the Hearth server, store and clients: identifiers, the
//! JSON wire shapes of messages, group chats and call sessions, input
//! validation and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ValidationError;
pub use protocol::*;
pub use types::{CallId, GroupId, MessageId, UserId};
