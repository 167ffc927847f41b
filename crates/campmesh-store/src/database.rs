//! The camp database file.
//!
//! Opening a [`Database`] always brings the schema up to date first, so the
//! row helpers in the sibling modules can assume every table exists.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::migrations;

const FILE_NAME: &str = "campmesh.db";

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the node's database in the platform data directory, creating the
    /// directory on first run (`~/.local/share/campmesh/campmesh.db` on Linux).
    pub fn new() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Self::open_at(&path)
    }

    pub fn default_path() -> Result<PathBuf> {
        ProjectDirs::from("org", "campmesh", "campmesh")
            .map(|dirs| dirs.data_dir().join(FILE_NAME))
            .ok_or(StoreError::NoDataDir)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Opening camp database");
        let conn = Connection::open(path)?;
        // WAL keeps readers unblocked while the node writes a snapshot.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Needed for transactions.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_migrates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camp.db");

        let db = Database::open_at(&path).unwrap();
        assert!(db.path().is_some());
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
        drop(db);

        assert!(Database::open_at(&path).is_ok());
    }

    #[test]
    fn test_newer_schema_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", migrations::CURRENT_VERSION + 1)
                .unwrap();
        }
        assert!(matches!(
            Database::open_at(&path),
            Err(StoreError::Migration(_))
        ));
    }

    #[test]
    fn test_v1_members_upgrade_unpinned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v1.db");
        {
            let conn = Connection::open(&path).unwrap();
            migrations::v001_initial::up(&conn).unwrap();
            conn.pragma_update(None, "user_version", 1).unwrap();
            conn.execute(
                "INSERT INTO members (id, name, role, added_at)
                 VALUES ('m-7', 'Ines', 'perimeter', '2026-08-30T18:00:00+00:00')",
                [],
            )
            .unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let member = db.get_member(&campmesh_shared::MemberId::new("m-7")).unwrap();
        assert_eq!(member.role, campmesh_shared::Role::Perimeter);
        assert!(!member.role_pinned);
    }
}
