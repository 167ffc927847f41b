use rusqlite::{params, Connection, OptionalExtension};

use campmesh_shared::{Coordinate, Member, MemberId, Role};

use crate::codec::{conversion_err, parse_opt_ts, parse_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};

const SELECT_MEMBER: &str = "SELECT id, name, role, last_seen, signal_quality, latitude, longitude,
        location_at, current_shift, active, added_at, role_pinned
     FROM members";

impl Database {
    pub fn upsert_member(&self, member: &Member) -> Result<()> {
        write_member(self.conn(), member)
    }

    pub fn get_member(&self, id: &MemberId) -> Result<Member> {
        self.conn()
            .query_row(
                &format!("{SELECT_MEMBER} WHERE id = ?1"),
                params![id.as_str()],
                row_to_member,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    /// All members, sorted by name.
    pub fn get_members(&self) -> Result<Vec<Member>> {
        read_members(self.conn())
    }
}

pub(crate) fn write_member(conn: &Connection, member: &Member) -> Result<()> {
    let location = member.last_known_location;
    conn.execute(
        "INSERT INTO members (id, name, role, last_seen, signal_quality, latitude, longitude,
                              location_at, current_shift, active, added_at, role_pinned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             role = excluded.role,
             last_seen = excluded.last_seen,
             signal_quality = excluded.signal_quality,
             latitude = excluded.latitude,
             longitude = excluded.longitude,
             location_at = excluded.location_at,
             current_shift = excluded.current_shift,
             active = excluded.active,
             role_pinned = excluded.role_pinned",
        params![
            member.id.as_str(),
            member.name,
            member.role.as_str(),
            member.last_seen.map(|t| t.to_rfc3339()),
            member.signal_quality,
            location.map(|c| c.latitude),
            location.map(|c| c.longitude),
            location.map(|c| c.recorded_at.to_rfc3339()),
            member.current_shift,
            member.active,
            member.added_at.to_rfc3339(),
            member.role_pinned,
        ],
    )?;
    Ok(())
}

pub(crate) fn read_members(conn: &Connection) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(&format!("{SELECT_MEMBER} ORDER BY name, id"))?;
    let rows = stmt.query_map([], row_to_member)?;

    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    let id: String = row.get(0)?;
    let role_str: String = row.get(2)?;
    let role: Role = role_str.parse().map_err(|e| conversion_err(2, e))?;
    let latitude: Option<f64> = row.get(5)?;
    let longitude: Option<f64> = row.get(6)?;
    let location_at = parse_opt_ts(7, row.get(7)?)?;
    let added_at: String = row.get(10)?;

    let last_known_location = match (latitude, longitude, location_at) {
        (Some(latitude), Some(longitude), Some(recorded_at)) => Some(Coordinate {
            latitude,
            longitude,
            recorded_at,
        }),
        _ => None,
    };

    Ok(Member {
        id: MemberId::new(id),
        name: row.get(1)?,
        role,
        last_seen: parse_opt_ts(3, row.get(3)?)?,
        signal_quality: row.get(4)?,
        last_known_location,
        current_shift: row.get(8)?,
        active: row.get(9)?,
        added_at: parse_ts(10, &added_at)?,
        role_pinned: row.get(11)?,
    })
}
