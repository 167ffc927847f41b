//! In-memory mesh connecting several engines in one process.
//!
//! Every node gets a transport handle and a notification receiver. Nodes
//! can be switched offline to simulate partitions: an offline node can
//! neither send nor receive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use campmesh_shared::{MemberId, Recipient};

use super::{SendOutcome, TransportCommand, TransportHandle, TransportNotification};

struct Node {
    notif_tx: mpsc::Sender<TransportNotification>,
    online: bool,
}

#[derive(Clone, Default)]
pub struct LoopbackMesh {
    nodes: Arc<Mutex<HashMap<MemberId, Node>>>,
}

impl LoopbackMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Must be called inside a tokio runtime.
    pub fn join(&self, id: MemberId) -> (TransportHandle, mpsc::Receiver<TransportNotification>) {
        let (handle, mut cmd_rx) = TransportHandle::channel(64);
        let (notif_tx, notif_rx) = mpsc::channel(256);

        self.lock().insert(
            id.clone(),
            Node {
                notif_tx,
                online: true,
            },
        );

        let mesh = self.clone();
        tokio::spawn(async move {
            while let Some(TransportCommand::Send { to, payload, reply }) = cmd_rx.recv().await {
                let outcome = mesh.route(&id, to, payload).await;
                let _ = reply.send(outcome);
            }
            debug!(node = %id, "Loopback node detached");
        });

        (handle, notif_rx)
    }

    pub fn set_online(&self, id: &MemberId, online: bool) {
        if let Some(node) = self.lock().get_mut(id) {
            node.online = online;
        }
    }

    async fn route(&self, from: &MemberId, to: Recipient, payload: Bytes) -> SendOutcome {
        let targets: Vec<mpsc::Sender<TransportNotification>> = {
            let nodes = self.lock();
            if !nodes.get(from).map_or(false, |n| n.online) {
                return SendOutcome::Unreachable;
            }
            match &to {
                Recipient::Broadcast => nodes
                    .iter()
                    .filter(|(id, n)| *id != from && n.online)
                    .map(|(_, n)| n.notif_tx.clone())
                    .collect(),
                Recipient::Peer(peer) => match nodes.get(peer) {
                    Some(n) if n.online => vec![n.notif_tx.clone()],
                    _ => return SendOutcome::Unreachable,
                },
            }
        };

        for tx in targets {
            let _ = tx
                .send(TransportNotification::Frame {
                    from: from.clone(),
                    payload: payload.clone(),
                })
                .await;
        }
        SendOutcome::Accepted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MemberId, Node>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}
