//! Schema migrations keyed on `PRAGMA user_version`.
//!
//! [`run_migrations`] is called by every constructor of
//! [`Database`](crate::Database); each step runs once and bumps the version.

pub mod v001_initial;
pub mod v002_role_pinned;

use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = 2;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "camp database is at schema v{found}, this build only knows v{CURRENT_VERSION}"
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    info!(from = found, to = CURRENT_VERSION, "Migrating camp database");
    if found < 1 {
        v001_initial::up(conn).map_err(|e| StoreError::Migration(format!("v001: {e}")))?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    if found < 2 {
        v002_role_pinned::up(conn).map_err(|e| StoreError::Migration(format!("v002: {e}")))?;
        conn.pragma_update(None, "user_version", 2)?;
    }
    Ok(())
}
