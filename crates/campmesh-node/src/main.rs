//! # campmesh-node
//!
//! Reference CampMesh node for a laptop or single-board computer on the
//! camp network.
//!
//! This binary provides:
//! - a **UDP broadcast transport** standing in for the radio link
//! - the **mesh engine** (messaging, emergencies, check-ins, announcements)
//! - **SQLite persistence** of the engine snapshot, restored at startup
//! - a small **operator console** on stdin

mod config;
mod console;
mod udp;

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use campmesh_core::{CheckInInterval, EngineConfig, EngineEvent, MeshEngine};
use campmesh_shared::{MemberId, SenderInfo, Snapshot};
use campmesh_store::Database;

use crate::config::NodeConfig;
use crate::console::ConsoleCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,campmesh_core=debug,campmesh_node=debug")),
        )
        .init();

    info!("Starting CampMesh node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database and load the last snapshot
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("opening database")?;
    info!(path = ?db.path(), "Database opened");

    let snapshot = db.load_snapshot().context("loading snapshot")?;
    let local = resolve_identity(&config, snapshot.as_ref());
    info!(member = %local.id, name = %local.name, role = %local.role, "Local identity");

    let db = Arc::new(Mutex::new(db));

    // -----------------------------------------------------------------------
    // 4. Start the transport and the engine
    // -----------------------------------------------------------------------
    let socket = UdpSocket::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    let (transport, notifications) =
        udp::spawn_udp_transport(socket, local.id.clone(), config.broadcast_addr)?;

    let mut engine_config = EngineConfig::new(local);
    engine_config.tick_interval = config.tick_interval;
    match CheckInInterval::from_hours(config.check_in_interval_hours) {
        Ok(interval) => engine_config.check_in_interval = interval,
        Err(e) => warn!(error = %e, "Invalid check-in interval, using default"),
    }

    let mut builder = MeshEngine::builder(engine_config);
    if let Some(snapshot) = snapshot {
        builder = builder.restore(snapshot);
    }
    let engine = builder.spawn(transport, notifications).await;

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------

    // Event log
    let events = engine.subscribe();
    tokio::spawn(log_events(events));

    // Periodic persistence
    let persist_engine = engine.clone();
    let persist_db = db.clone();
    let persist_interval = config.persist_interval;
    let persister = tokio::spawn(async move {
        let mut interval = tokio::time::interval(persist_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = persist(&persist_db, &persist_engine).await {
                error!(error = %e, "Periodic snapshot failed");
            }
        }
    });

    // Operator console
    let console_engine = engine.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{}", console::HELP);
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ConsoleCommand>() {
                Ok(command) => match console::execute(&console_engine, command).await {
                    Ok(reply) => println!("{reply}"),
                    Err(e) => println!("error: {e}"),
                },
                Err(e) => println!("{e}"),
            }
        }
        debug!("Console input closed");
    });

    // -----------------------------------------------------------------------
    // 6. Run until Ctrl-C, then persist a final snapshot
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");

    persister.abort();
    engine.shutdown().await;
    persist(&db, &engine).await.context("saving final snapshot")?;

    info!("CampMesh node stopped");
    Ok(())
}

/// Configured id first, then the stored identity, then a fresh one.
fn resolve_identity(config: &NodeConfig, snapshot: Option<&Snapshot>) -> SenderInfo {
    let id = match (&config.member_id, snapshot) {
        (Some(id), _) => MemberId::new(id.clone()),
        (None, Some(snapshot)) => snapshot.local.id.clone(),
        (None, None) => MemberId::new(Uuid::new_v4().simple().to_string()),
    };
    SenderInfo {
        id,
        name: config.member_name.clone(),
        role: config.role,
    }
}

async fn persist(db: &Arc<Mutex<Database>>, engine: &MeshEngine) -> anyhow::Result<()> {
    let snapshot = engine.snapshot().await;
    let messages = snapshot.messages.len();
    let db = db.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut db = db
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))?;
        db.save_snapshot(&snapshot)?;
        Ok(())
    })
    .await??;
    debug!(messages, "Snapshot saved");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(target: "campmesh_node::events", "{json}"),
                Err(e) => warn!(error = %e, ?event, "Unserializable engine event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campmesh_shared::Role;

    #[test]
    fn test_identity_prefers_configured_id() {
        let config = NodeConfig {
            member_id: Some("medic-7".into()),
            role: Role::Medical,
            ..NodeConfig::default()
        };
        let local = resolve_identity(&config, None);
        assert_eq!(local.id, MemberId::new("medic-7"));
        assert_eq!(local.role, Role::Medical);
    }

    #[test]
    fn test_identity_generated_when_missing() {
        let config = NodeConfig::default();
        let a = resolve_identity(&config, None);
        let b = resolve_identity(&config, None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "Camper");
    }
}
