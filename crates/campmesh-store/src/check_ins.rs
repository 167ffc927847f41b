use rusqlite::{params, Connection, OptionalExtension};

use campmesh_shared::{CheckInRecord, MemberId};

use crate::codec::parse_ts;
use crate::database::Database;
use crate::error::Result;

pub(crate) const INTERVAL_KEY: &str = "check_in_interval_secs";

impl Database {
    /// Store a check-in unless a later one is already on file.
    pub fn record_check_in(&self, record: &CheckInRecord) -> Result<()> {
        write_check_in(self.conn(), record)
    }

    pub fn get_check_ins(&self) -> Result<Vec<CheckInRecord>> {
        read_check_ins(self.conn())
    }

    pub fn set_check_in_interval_secs(&self, secs: u64) -> Result<()> {
        write_setting(self.conn(), INTERVAL_KEY, &secs.to_string())
    }

    pub fn get_check_in_interval_secs(&self) -> Result<Option<u64>> {
        read_interval(self.conn())
    }
}

pub(crate) fn write_check_in(conn: &Connection, record: &CheckInRecord) -> Result<()> {
    // RFC-3339 in UTC sorts lexicographically.
    conn.execute(
        "INSERT INTO check_ins (member_id, last_check_in) VALUES (?1, ?2)
         ON CONFLICT(member_id) DO UPDATE SET last_check_in = excluded.last_check_in
         WHERE excluded.last_check_in > check_ins.last_check_in",
        params![record.member.as_str(), record.last_check_in.to_rfc3339()],
    )?;
    Ok(())
}

pub(crate) fn read_check_ins(conn: &Connection) -> Result<Vec<CheckInRecord>> {
    let mut stmt = conn.prepare("SELECT member_id, last_check_in FROM check_ins ORDER BY member_id")?;
    let rows = stmt.query_map([], |row| {
        let member: String = row.get(0)?;
        let at: String = row.get(1)?;
        Ok(CheckInRecord {
            member: MemberId::new(member),
            last_check_in: parse_ts(1, &at)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

pub(crate) fn write_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn read_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}

pub(crate) fn read_interval(conn: &Connection) -> Result<Option<u64>> {
    match read_setting(conn, INTERVAL_KEY)? {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| crate::StoreError::Invalid(format!("{INTERVAL_KEY}={value}"))),
        None => Ok(None),
    }
}
