//! # hearth-client
//!
//! Client side of the Hearth family board: the HTTP API client, the
//! conversation poller that keeps an open chat in sync, and the voice call
//! controller. The `hearth` binary wraps them in a terminal front end.

pub mod api;
pub mod call;
pub mod config;
pub mod error;
pub mod poller;
pub mod ports;
pub mod schedule;

pub use api::{ApiClient, ServerInfo};
pub use call::{CallController, CallError, CallPhase, CallSnapshot, CallTiming};
pub use config::ClientConfig;
pub use error::ClientError;
pub use poller::{ChatLine, ConversationPoller, ConversationTarget, ConversationView};
pub use ports::{CallSignaling, MessageFeed};
pub use schedule::{Liveness, PollHandle};
