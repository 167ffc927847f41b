//! v001 -- Initial schema creation.
//!
//! Creates `members`, `messages`, `announcements`, `check_ins`, `settings`
//! and the single-row `emergency` table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Members
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS members (
    id             TEXT PRIMARY KEY NOT NULL,   -- mesh address
    name           TEXT NOT NULL,
    role           TEXT NOT NULL,
    last_seen      TEXT,                        -- RFC-3339, NULL if never heard
    signal_quality INTEGER,                     -- 0-100
    latitude       REAL,
    longitude      REAL,
    location_at    TEXT,
    current_shift  TEXT,
    active         INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1
    added_at       TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation    TEXT NOT NULL,              -- 'camp' or 'dm:<member>'
    sequence        INTEGER NOT NULL,
    from_id         TEXT NOT NULL,
    from_name       TEXT NOT NULL,
    content         TEXT NOT NULL,
    body            TEXT NOT NULL,              -- JSON-encoded typed payload
    timestamp       TEXT NOT NULL,
    delivery_status TEXT NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
    ON messages(conversation, sequence);

-- ----------------------------------------------------------------
-- Announcements
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS announcements (
    id         TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    title      TEXT NOT NULL,
    message    TEXT NOT NULL,
    priority   TEXT NOT NULL,
    from_id    TEXT NOT NULL,
    from_name  TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    read_by    TEXT NOT NULL DEFAULT '[]',      -- JSON array of member ids
    dismissed  INTEGER NOT NULL DEFAULT 0       -- boolean 0/1, local banner state
);

-- ----------------------------------------------------------------
-- Check-ins
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS check_ins (
    member_id     TEXT PRIMARY KEY NOT NULL,
    last_check_in TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Settings (key/value)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Active emergency (at most one row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS emergency (
    slot      INTEGER PRIMARY KEY CHECK (slot = 1),
    emergency TEXT NOT NULL                     -- JSON-encoded
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
