//! # campmesh-store
//!
//! SQLite persistence for CampMesh engine snapshots.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every table plus
//! whole-snapshot save and load. Callers running inside an async runtime
//! should move the handle into `spawn_blocking`.

pub mod announcements;
pub mod check_ins;
pub mod database;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod snapshot;

mod codec;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
