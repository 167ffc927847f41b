//! Per-message delivery tasks.
//!
//! Each outbound message gets its own task that pushes the frame to the
//! transport, retries with exponential backoff, and waits for an
//! acknowledgement. Status changes are applied to the shared log under its
//! lock; no lock is held while talking to the transport.
//!
//! Cancellation leaves a message either `queued` (never handed to the radio)
//! or `failed` (handed over but never acknowledged).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use campmesh_shared::{DeliveryStatus, MessageId, Recipient};

use crate::config::DeliveryPolicy;
use crate::events::EngineEvent;
use crate::pipeline::MessageLog;
use crate::transport::{SendOutcome, TransportHandle};

/// Signals a running delivery task can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverySignal {
    Acknowledged,
    Cancelled,
    /// The message was re-sequenced; push this frame from now on.
    Replace(Bytes),
}

/// One outbound frame to push.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub message_id: MessageId,
    pub recipient: Recipient,
    pub payload: Bytes,
    /// Emergencies retry until delivered.
    pub unbounded: bool,
}

/// How a delivery task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEnd {
    Delivered,
    Failed,
    Cancelled,
}

type SignalMap = Arc<Mutex<HashMap<MessageId, mpsc::Sender<DeliverySignal>>>>;

/// Everything a delivery task needs, shared with the engine.
#[derive(Clone)]
pub struct DeliveryContext {
    pub log: Arc<Mutex<MessageLog>>,
    pub events: broadcast::Sender<EngineEvent>,
    pub transport: TransportHandle,
    pub policy: DeliveryPolicy,
    signals: SignalMap,
}

impl DeliveryContext {
    pub fn new(
        log: Arc<Mutex<MessageLog>>,
        events: broadcast::Sender<EngineEvent>,
        transport: TransportHandle,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            log,
            events,
            transport,
            policy,
            signals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register and spawn a delivery task for `job`.
    pub async fn spawn(&self, job: DeliveryJob) -> tokio::task::JoinHandle<DeliveryEnd> {
        let (signal_tx, signal_rx) = mpsc::channel(4);
        self.signals.lock().await.insert(job.message_id, signal_tx);
        let ctx = self.clone();
        tokio::spawn(async move { ctx.run(job, signal_rx).await })
    }

    /// Forward an acknowledgement to the task owning `id`, if any.
    pub async fn acknowledge(&self, id: &MessageId) -> bool {
        self.signal(id, DeliverySignal::Acknowledged).await
    }

    pub async fn cancel(&self, id: &MessageId) -> bool {
        self.signal(id, DeliverySignal::Cancelled).await
    }

    /// Hand a running task a new frame for its message.
    pub async fn replace_payload(&self, id: &MessageId, payload: Bytes) -> bool {
        self.signal(id, DeliverySignal::Replace(payload)).await
    }

    /// Whether a task is currently delivering `id`.
    pub async fn is_running(&self, id: &MessageId) -> bool {
        self.signals.lock().await.contains_key(id)
    }

    pub async fn cancel_all(&self) -> usize {
        let senders: Vec<_> = self.signals.lock().await.values().cloned().collect();
        for tx in &senders {
            let _ = tx.try_send(DeliverySignal::Cancelled);
        }
        senders.len()
    }

    async fn signal(&self, id: &MessageId, signal: DeliverySignal) -> bool {
        match self.signals.lock().await.get(id) {
            Some(tx) => tx.try_send(signal).is_ok(),
            None => false,
        }
    }

    async fn run(self, job: DeliveryJob, mut signals: mpsc::Receiver<DeliverySignal>) -> DeliveryEnd {
        let id = job.message_id;
        let end = self.drive(&job, &mut signals).await;
        self.signals.lock().await.remove(&id);
        if end != DeliveryEnd::Cancelled {
            self.flush_replacement(&job, &mut signals).await;
        }
        match end {
            DeliveryEnd::Delivered => info!(msg_id = %id, "Message delivered"),
            DeliveryEnd::Failed => error!(msg_id = %id, "Message delivery failed permanently"),
            DeliveryEnd::Cancelled => debug!(msg_id = %id, "Delivery cancelled"),
        }
        end
    }

    /// A replacement that raced the end of delivery still goes out once.
    async fn flush_replacement(&self, job: &DeliveryJob, signals: &mut mpsc::Receiver<DeliverySignal>) {
        let mut latest = None;
        while let Ok(signal) = signals.try_recv() {
            if let DeliverySignal::Replace(frame) = signal {
                latest = Some(frame);
            }
        }
        if let Some(frame) = latest {
            let outcome = self.transport.send(job.recipient.clone(), frame).await;
            debug!(msg_id = %job.message_id, outcome = ?outcome, "Late replacement frame pushed");
        }
    }

    async fn drive(&self, job: &DeliveryJob, signals: &mut mpsc::Receiver<DeliverySignal>) -> DeliveryEnd {
        let id = job.message_id;
        let mut payload = job.payload.clone();
        let mut failures: u32 = 0;

        loop {
            let attempt = self.log.lock().await.record_attempt(&id).unwrap_or(0);
            debug!(msg_id = %id, attempt, "Pushing frame to transport");

            // Hand the frame over before looking at signals.
            let outcome = tokio::select! {
                biased;
                outcome = self.transport.send(job.recipient.clone(), payload.clone()) => outcome,
                signal = signals.recv() => match signal {
                    Some(DeliverySignal::Acknowledged) => return self.finish_delivered(&id).await,
                    Some(DeliverySignal::Replace(frame)) => {
                        payload = frame;
                        continue;
                    }
                    Some(DeliverySignal::Cancelled) | None => return self.finish_cancelled(&id).await,
                },
            };

            match outcome {
                SendOutcome::Delivered => return self.finish_delivered(&id).await,
                SendOutcome::Accepted => {
                    self.apply(&id, DeliveryStatus::Sent).await;
                    tokio::select! {
                        signal = signals.recv() => match signal {
                            Some(DeliverySignal::Acknowledged) => return self.finish_delivered(&id).await,
                            Some(DeliverySignal::Replace(frame)) => {
                                debug!(msg_id = %id, "Frame replaced, pushing again");
                                payload = frame;
                                continue;
                            }
                            Some(DeliverySignal::Cancelled) | None => return self.finish_cancelled(&id).await,
                        },
                        _ = tokio::time::sleep(self.policy.ack_timeout) => {
                            if !job.unbounded {
                                warn!(msg_id = %id, "No acknowledgement before timeout");
                                self.apply(&id, DeliveryStatus::Failed).await;
                                return DeliveryEnd::Failed;
                            }
                            warn!(msg_id = %id, attempt, "Emergency not acknowledged, resending");
                        }
                    }
                }
                SendOutcome::Unreachable | SendOutcome::Rejected(_) => {
                    failures += 1;
                    if !job.unbounded && failures >= self.policy.max_attempts {
                        warn!(msg_id = %id, attempts = failures, outcome = ?outcome, "Attempt ceiling reached");
                        self.apply(&id, DeliveryStatus::Failed).await;
                        return DeliveryEnd::Failed;
                    }
                    let delay = self.policy.backoff(failures, job.unbounded);
                    debug!(msg_id = %id, outcome = ?outcome, delay_ms = delay.as_millis() as u64, "Send failed, backing off");
                    tokio::select! {
                        signal = signals.recv() => match signal {
                            // An earlier attempt made it after all.
                            Some(DeliverySignal::Acknowledged) => return self.finish_delivered(&id).await,
                            Some(DeliverySignal::Replace(frame)) => {
                                debug!(msg_id = %id, "Frame replaced, pushing again");
                                payload = frame;
                                continue;
                            }
                            Some(DeliverySignal::Cancelled) | None => return self.finish_cancelled(&id).await,
                        },
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn finish_delivered(&self, id: &MessageId) -> DeliveryEnd {
        self.apply(id, DeliveryStatus::Sent).await;
        self.apply(id, DeliveryStatus::Delivered).await;
        DeliveryEnd::Delivered
    }

    async fn finish_cancelled(&self, id: &MessageId) -> DeliveryEnd {
        // Queued stays queued; a frame already on the air without an ack fails.
        let sent = self
            .log
            .lock()
            .await
            .get(id)
            .map_or(false, |m| m.delivery_status == DeliveryStatus::Sent);
        if sent {
            self.apply(id, DeliveryStatus::Failed).await;
        }
        DeliveryEnd::Cancelled
    }

    /// Move the status forward and announce it. Non-forward moves are ignored.
    pub async fn apply(&self, id: &MessageId, status: DeliveryStatus) {
        let mut log = self.log.lock().await;
        if log.advance(id, status).is_some() {
            let attempts = log.get(id).map_or(0, |m| m.attempts);
            let _ = self.events.send(EngineEvent::DeliveryStatusChanged {
                id: *id,
                status,
                attempts,
            });
        }
    }
}
