//! Boundary to the radio transport driver.
//!
//! The driver runs as its own task. The engine talks to it through typed
//! command and notification channels, keeping the radio layer fully
//! asynchronous and decoupled from engine state.

pub mod loopback;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use campmesh_shared::{MemberId, Recipient};

use crate::presence::LinkTelemetry;

pub use loopback::LoopbackMesh;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Outcome of handing one frame to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The link layer confirmed receipt.
    Delivered,
    /// Handed to the radio; an application ack may follow.
    Accepted,
    /// No route to the recipient right now.
    Unreachable,
    /// The driver refused the frame.
    Rejected(String),
}

/// Commands sent *into* the transport task.
#[derive(Debug)]
pub enum TransportCommand {
    Send {
        to: Recipient,
        payload: Bytes,
        reply: oneshot::Sender<SendOutcome>,
    },
}

/// Notifications sent *from* the transport task to the engine.
#[derive(Debug, Clone)]
pub enum TransportNotification {
    /// A frame arrived from the radio.
    Frame { from: MemberId, payload: Bytes },
    /// Link telemetry for a peer.
    Telemetry(LinkTelemetry),
}

/// Cloneable sender half used by the engine and its delivery tasks.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::Sender<TransportCommand>,
}

impl TransportHandle {
    pub fn new(cmd_tx: mpsc::Sender<TransportCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Create a handle plus the receiving end a driver task consumes.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TransportCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(buffer);
        (Self::new(cmd_tx), cmd_rx)
    }

    pub async fn send(&self, to: Recipient, payload: Bytes) -> SendOutcome {
        let (reply, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(TransportCommand::Send { to, payload, reply })
            .await
            .is_err()
        {
            debug!("Transport command channel closed");
            return SendOutcome::Rejected("transport closed".into());
        }
        reply_rx
            .await
            .unwrap_or_else(|_| SendOutcome::Rejected("transport dropped reply".into()))
    }
}
