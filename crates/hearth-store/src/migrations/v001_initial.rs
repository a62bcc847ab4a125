//! v001 -- Initial schema creation.
//!
//! Direct messages, group chats (with members and messages), call sessions
//! and their ICE candidates.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Direct messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS direct_messages (
    id        TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    sender    TEXT NOT NULL,                 -- username
    recipient TEXT NOT NULL,                 -- username
    content   TEXT NOT NULL,
    sent_at   TEXT NOT NULL,                 -- RFC-3339, fixed width
    is_read   INTEGER NOT NULL DEFAULT 0     -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_dm_sender    ON direct_messages(sender, sent_at);
CREATE INDEX IF NOT EXISTS idx_dm_recipient ON direct_messages(recipient, sent_at);

-- ----------------------------------------------------------------
-- Group chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS group_chats (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name       TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    username TEXT NOT NULL,

    PRIMARY KEY (group_id, username),
    FOREIGN KEY (group_id) REFERENCES group_chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(username);

CREATE TABLE IF NOT EXISTS group_messages (
    seq      INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL,
    sender   TEXT NOT NULL,
    content  TEXT NOT NULL,
    sent_at  TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES group_chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_messages_group ON group_messages(group_id, seq);

-- ----------------------------------------------------------------
-- Call sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS call_sessions (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    caller     TEXT NOT NULL,
    callee     TEXT NOT NULL,
    offer      TEXT NOT NULL,                -- JSON SessionDescription
    answer     TEXT,                         -- JSON SessionDescription, NULL until answered
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calls_callee ON call_sessions(callee, created_at);

CREATE TABLE IF NOT EXISTS call_ice_candidates (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    call_id   TEXT NOT NULL,
    candidate TEXT NOT NULL,                 -- JSON IceCandidate

    FOREIGN KEY (call_id) REFERENCES call_sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_ice_call ON call_ice_candidates(call_id, seq);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
