use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Hearth";

/// Maximum username length in characters
pub const MAX_USERNAME_LEN: usize = 64;

/// Maximum chat message length in characters
pub const MAX_CONTENT_LEN: usize = 4000;

/// Maximum group chat name length in characters
pub const MAX_GROUP_NAME_LEN: usize = 100;

/// Maximum SDP payload size in bytes
pub const MAX_SDP_LEN: usize = 64 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// How often an open conversation re-fetches its messages
pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How often an idle client checks for an incoming call
pub const INCOMING_CALL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How often an active call re-reads its session (answer / ICE)
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Public STUN servers offered to the peer link
pub const STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];
