//! v001 -- Initial schema creation.
//!
//! Creates `chats`, `chat_participants`, `chat_participant_cross_refs`,
//! `chat_messages` and the key/value `session` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id               TEXT PRIMARY KEY NOT NULL,   -- server-assigned
    last_activity_at TEXT NOT NULL,               -- RFC-3339
    last_message     TEXT
);

-- ----------------------------------------------------------------
-- Participant profiles (one row per user, shared by all chats)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_participants (
    user_id             TEXT PRIMARY KEY NOT NULL,
    username            TEXT NOT NULL,
    profile_picture_url TEXT
);

-- ----------------------------------------------------------------
-- Chat membership.  Rows are never deleted: leaving a chat flips
-- is_active so the history survives a re-join.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_participant_cross_refs (
    chat_id   TEXT NOT NULL,                      -- FK -> chats(id)
    user_id   TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,         -- boolean 0/1

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cross_refs_user
    ON chat_participant_cross_refs(user_id);

-- ----------------------------------------------------------------
-- Messages.  No FK on chat_id: a message may arrive before its chat
-- could be fetched.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id              TEXT PRIMARY KEY NOT NULL,
    chat_id         TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL,                -- RFC-3339, millis, UTC
    delivery_status TEXT NOT NULL DEFAULT 'SENT'  -- PENDING / SENT / FAILED
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_chat_ts
    ON chat_messages(chat_id, created_at DESC);

-- ----------------------------------------------------------------
-- Session (key/value, JSON values)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS session (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
