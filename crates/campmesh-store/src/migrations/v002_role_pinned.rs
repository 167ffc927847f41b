//! v002 -- Remember which member roles were set by hand.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE members ADD COLUMN role_pinned INTEGER NOT NULL DEFAULT 0;  -- 1 = hand-added role
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
