use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use campmesh_shared::{Announcement, MemberId};

use crate::codec::{conversion_err, parse_opt_ts, parse_ts, priority_from_sql, priority_to_sql};
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert or merge an announcement. `read_by` is unioned with what is stored.
    pub fn upsert_announcement(&self, announcement: &Announcement, dismissed: bool) -> Result<()> {
        write_announcement(self.conn(), announcement, dismissed)
    }

    /// All announcements, oldest first, with their local dismissed flag.
    pub fn get_announcements(&self) -> Result<Vec<(Announcement, bool)>> {
        read_announcements(self.conn())
    }
}

pub(crate) fn write_announcement(conn: &Connection, announcement: &Announcement, dismissed: bool) -> Result<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT read_by FROM announcements WHERE id = ?1",
            params![announcement.id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let mut read_by = announcement.read_by.clone();
    if let Some(stored) = stored {
        let previous: BTreeSet<MemberId> = serde_json::from_str(&stored)?;
        read_by.extend(previous);
    }

    conn.execute(
        "INSERT INTO announcements (id, title, message, priority, from_id, from_name,
                                    created_at, expires_at, read_by, dismissed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
             read_by = excluded.read_by,
             dismissed = MAX(announcements.dismissed, excluded.dismissed)",
        params![
            announcement.id.to_string(),
            announcement.title,
            announcement.message,
            priority_to_sql(announcement.priority),
            announcement.from.as_str(),
            announcement.from_name,
            announcement.created_at.to_rfc3339(),
            announcement.expires_at.map(|t| t.to_rfc3339()),
            serde_json::to_string(&read_by)?,
            dismissed,
        ],
    )?;
    Ok(())
}

pub(crate) fn read_announcements(conn: &Connection) -> Result<Vec<(Announcement, bool)>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, message, priority, from_id, from_name, created_at, expires_at,
                read_by, dismissed
         FROM announcements
         ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map([], row_to_announcement)?;

    let mut announcements = Vec::new();
    for row in rows {
        announcements.push(row?);
    }
    Ok(announcements)
}

fn row_to_announcement(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Announcement, bool)> {
    let id_str: String = row.get(0)?;
    let priority: String = row.get(3)?;
    let from: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let read_by_json: String = row.get(8)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_err(0, e))?;
    let read_by: BTreeSet<MemberId> =
        serde_json::from_str(&read_by_json).map_err(|e| conversion_err(8, e))?;

    let announcement = Announcement {
        id,
        title: row.get(1)?,
        message: row.get(2)?,
        priority: priority_from_sql(3, &priority)?,
        from: MemberId::new(from),
        from_name: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        expires_at: parse_opt_ts(7, row.get(7)?)?,
        read_by,
    };
    Ok((announcement, row.get(9)?))
}
