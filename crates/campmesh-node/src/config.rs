//! Node configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a node can start with zero
//! configuration on a laptop joined to the camp network.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use campmesh_shared::constants::{DEFAULT_CHECK_IN_INTERVAL_HOURS, DEFAULT_UDP_PORT};
use campmesh_shared::Role;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Mesh address of this member. `None` reuses the identity of the stored
    /// snapshot, or generates a fresh one.
    /// Env: `CAMP_MEMBER_ID`
    pub member_id: Option<String>,

    /// Env: `CAMP_MEMBER_NAME`
    /// Default: `"Camper"`
    pub member_name: String,

    /// Env: `CAMP_ROLE` (lead/medical/perimeter/bus/general)
    /// Default: `general`
    pub role: Role,

    /// Local UDP socket.
    /// Env: `UDP_BIND_ADDR`
    /// Default: `0.0.0.0:47100`
    pub bind_addr: SocketAddr,

    /// Where broadcast frames are sent.
    /// Env: `UDP_BROADCAST_ADDR`
    /// Default: `255.255.255.255:47100`
    pub broadcast_addr: SocketAddr,

    /// SQLite file. `None` uses the platform data directory.
    /// Env: `DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Env: `CHECK_IN_INTERVAL_HOURS` (1, 4, 8 or 12)
    /// Default: `4`
    pub check_in_interval_hours: u64,

    /// Env: `TICK_SECS`
    /// Default: `15`
    pub tick_interval: Duration,

    /// How often the engine snapshot is written to disk.
    /// Env: `PERSIST_SECS`
    /// Default: `30`
    pub persist_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            member_id: None,
            member_name: "Camper".to_string(),
            role: Role::General,
            bind_addr: ([0, 0, 0, 0], DEFAULT_UDP_PORT).into(),
            broadcast_addr: ([255, 255, 255, 255], DEFAULT_UDP_PORT).into(),
            db_path: None,
            check_in_interval_hours: DEFAULT_CHECK_IN_INTERVAL_HOURS,
            tick_interval: Duration::from_secs(15),
            persist_interval: Duration::from_secs(30),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(id) = lookup("CAMP_MEMBER_ID") {
            if !id.trim().is_empty() {
                config.member_id = Some(id.trim().to_string());
            }
        }

        if let Some(name) = lookup("CAMP_MEMBER_NAME") {
            config.member_name = name;
        }

        if let Some(role) = lookup("CAMP_ROLE") {
            match role.parse::<Role>() {
                Ok(parsed) => config.role = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid CAMP_ROLE, using default"),
            }
        }

        if let Some(addr) = lookup("UDP_BIND_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.bind_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid UDP_BIND_ADDR, using default");
            }
        }

        if let Some(addr) = lookup("UDP_BROADCAST_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.broadcast_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid UDP_BROADCAST_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("CHECK_IN_INTERVAL_HOURS") {
            match val.parse::<u64>() {
                Ok(hours) => config.check_in_interval_hours = hours,
                Err(_) => tracing::warn!(value = %val, "Invalid CHECK_IN_INTERVAL_HOURS, using default"),
            }
        }

        if let Some(val) = lookup("TICK_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.tick_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid TICK_SECS, using default"),
            }
        }

        if let Some(val) = lookup("PERSIST_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.persist_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PERSIST_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
