//! UDP broadcast driver for the mesh transport boundary.
//!
//! Every frame is wrapped in an [`Envelope`] naming its sender and, for
//! direct frames, its single recipient. Frames go to the configured
//! broadcast address unless the peer's unicast address has been learned
//! from its own traffic. Receivers drop envelopes that are their own echo
//! or that were addressed to somebody else.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use campmesh_core::{SendOutcome, TransportCommand, TransportHandle, TransportNotification};
use campmesh_shared::constants::MAX_FRAME_SIZE;
use campmesh_shared::{MemberId, Recipient};

/// Room for the envelope header on top of the largest frame.
const MAX_DATAGRAM_SIZE: usize = MAX_FRAME_SIZE + 512;

#[derive(Error, Debug)]
pub enum UdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Envelope encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// What actually travels in a datagram.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub from: MemberId,
    /// `None` for broadcast frames.
    pub to: Option<MemberId>,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, UdpError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, UdpError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Whether `local` should hand this envelope to its engine.
    pub fn is_for(&self, local: &MemberId) -> bool {
        self.from != *local && self.to.as_ref().map_or(true, |to| to == local)
    }
}

/// Start the driver on an already bound socket.
///
/// Returns the handle the engine sends through and the notification stream
/// it consumes. The driver task exits once every handle has been dropped.
pub fn spawn_udp_transport(
    socket: UdpSocket,
    local: MemberId,
    broadcast_addr: SocketAddr,
) -> Result<(TransportHandle, mpsc::Receiver<TransportNotification>), UdpError> {
    socket.set_broadcast(true)?;
    info!(
        local_addr = ?socket.local_addr().ok(),
        broadcast = %broadcast_addr,
        member = %local,
        "UDP transport started"
    );

    let (handle, mut cmd_rx) = TransportHandle::channel(256);
    let (notif_tx, notif_rx) = mpsc::channel::<TransportNotification>(256);

    tokio::spawn(async move {
        let mut peers: HashMap<MemberId, SocketAddr> = HashMap::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::Send { to, payload, reply }) => {
                            let outcome =
                                send_frame(&socket, &local, &peers, broadcast_addr, to, payload).await;
                            let _ = reply.send(outcome);
                        }
                        None => {
                            debug!("Transport handles dropped, stopping UDP driver");
                            break;
                        }
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, addr)) => {
                            let envelope = match Envelope::decode(&buf[..len]) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    debug!(%addr, error = %e, "Dropping undecodable datagram");
                                    continue;
                                }
                            };
                            if !envelope.is_for(&local) {
                                trace!(%addr, from = %envelope.from, "Ignoring datagram not for us");
                                continue;
                            }
                            peers.insert(envelope.from.clone(), addr);
                            let notification = TransportNotification::Frame {
                                from: envelope.from,
                                payload: Bytes::from(envelope.payload),
                            };
                            if notif_tx.send(notification).await.is_err() {
                                debug!("Engine stopped listening, stopping UDP driver");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "UDP receive failed"),
                    }
                }
            }
        }
    });

    Ok((handle, notif_rx))
}

async fn send_frame(
    socket: &UdpSocket,
    local: &MemberId,
    peers: &HashMap<MemberId, SocketAddr>,
    broadcast_addr: SocketAddr,
    to: Recipient,
    payload: Bytes,
) -> SendOutcome {
    if payload.len() > MAX_FRAME_SIZE {
        return SendOutcome::Rejected(format!(
            "frame of {} bytes exceeds {MAX_FRAME_SIZE}",
            payload.len()
        ));
    }

    let (target, addr) = match to {
        Recipient::Broadcast => (None, broadcast_addr),
        Recipient::Peer(peer) => {
            let addr = peers.get(&peer).copied().unwrap_or(broadcast_addr);
            (Some(peer), addr)
        }
    };

    let envelope = Envelope {
        from: local.clone(),
        to: target,
        payload: payload.to_vec(),
    };
    let datagram = match envelope.encode() {
        Ok(datagram) => datagram,
        Err(e) => return SendOutcome::Rejected(e.to_string()),
    };

    match socket.send_to(&datagram, addr).await {
        Ok(_) => SendOutcome::Accepted,
        Err(e) => {
            debug!(%addr, error = %e, "UDP send failed");
            SendOutcome::Unreachable
        }
    }
}
