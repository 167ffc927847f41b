//! The `MeshEngine` coordinator.
//!
//! Owns one instance of every component, each behind its own lock, and wires
//! them to the transport. Three kinds of producers drive it concurrently:
//! API calls, the inbound frame loop, and the ticker. Locks are taken one at
//! a time and never held across a transport await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use campmesh_shared::{
    AckFrame, Announcement, AnnouncementPriority, ConnectionStatus, Conversation, Coordinate,
    DeliveryStatus, Emergency, EmergencyKind, MemberId, Message, MessageBody, MessageFrame,
    MessageId, ReadReceipt, Recipient, Role, SenderInfo, Snapshot, WireMessage,
};

use crate::announcements::AnnouncementBoard;
use crate::auth::{Authorizer, RoleAuthorizer};
use crate::checkin::{CheckInInterval, CheckInScheduler};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::delivery::{DeliveryContext, DeliveryJob};
use crate::emergency::{EmergencyController, EmergencyState, SlotChange};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EVENT_CHANNEL_CAPACITY};
use crate::pipeline::{Admission, InsertOutcome, MessageLog};
use crate::presence::{LinkTelemetry, MemberView, PresenceTracker};
use crate::transport::{TransportHandle, TransportNotification};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct MeshEngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    authorizer: Arc<dyn Authorizer>,
    snapshot: Option<Snapshot>,
}

impl MeshEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            authorizer: Arc::new(RoleAuthorizer::default()),
            snapshot: None,
        }
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn authorizer(mut self, authorizer: impl Authorizer) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    /// Load persisted state on start. Pending outbound messages are re-sent.
    pub fn restore(mut self, snapshot: Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Start the engine: spawns the inbound loop and the ticker.
    pub async fn spawn(
        self,
        transport: TransportHandle,
        notifications: mpsc::Receiver<TransportNotification>,
    ) -> MeshEngine {
        let Self {
            config,
            clock,
            authorizer,
            snapshot,
        } = self;
        let now = clock.now();
        let local = config.local.clone();

        let mut presence = PresenceTracker::new(config.presence);
        let mut log = MessageLog::new();
        let mut emergency = EmergencyController::new();
        let mut check_ins = CheckInScheduler::new(
            local.id.clone(),
            config.check_in_interval,
            config.reminder_thresholds.clone(),
        );
        let mut announcements = AnnouncementBoard::new(local.id.clone());

        if let Some(snapshot) = snapshot {
            if snapshot.local.id != local.id {
                warn!(
                    snapshot = %snapshot.local.id,
                    configured = %local.id,
                    "Snapshot belongs to a different member, restoring anyway"
                );
            }
            info!(
                members = snapshot.members.len(),
                messages = snapshot.messages.len(),
                announcements = snapshot.announcements.len(),
                taken_at = %snapshot.taken_at,
                "Restoring snapshot"
            );
            presence.restore(snapshot.members);
            log.restore(snapshot.messages);
            announcements.restore(snapshot.announcements, snapshot.dismissed_announcements, now);
            check_ins.restore(snapshot.check_ins);
            emergency.restore(snapshot.active_emergency);
            match CheckInInterval::from_duration(Duration::from_secs(snapshot.check_in_interval_secs)) {
                Ok(interval) => check_ins.set_interval(interval),
                Err(e) => warn!(error = %e, "Ignoring persisted check-in interval"),
            }
        }

        presence.add_member(local.id.clone(), local.name.clone(), local.role, now);
        check_ins.ensure_baseline(&local.id, now);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let log = Arc::new(Mutex::new(log));
        let delivery = DeliveryContext::new(log.clone(), events.clone(), transport.clone(), config.delivery);

        let engine = MeshEngine {
            inner: Arc::new(EngineInner {
                config,
                clock,
                authorizer,
                transport,
                presence: Mutex::new(presence),
                log,
                emergency: Mutex::new(emergency),
                check_ins: Mutex::new(check_ins),
                announcements: Mutex::new(announcements),
                delivery,
                events,
                last_statuses: Mutex::new(HashMap::new()),
                running: AtomicBool::new(true),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        engine.redispatch_pending().await;

        let inbound = tokio::spawn(run_inbound(engine.clone(), notifications));
        let ticker = tokio::spawn(run_ticker(engine.clone()));
        engine.inner.tasks.lock().await.extend([inbound, ticker]);

        info!(member = %local.id, name = %local.name, role = %local.role, "Mesh engine started");
        engine
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    authorizer: Arc<dyn Authorizer>,
    transport: TransportHandle,
    presence: Mutex<PresenceTracker>,
    log: Arc<Mutex<MessageLog>>,
    emergency: Mutex<EmergencyController>,
    check_ins: Mutex<CheckInScheduler>,
    announcements: Mutex<AnnouncementBoard>,
    delivery: DeliveryContext,
    events: broadcast::Sender<EngineEvent>,
    /// Last status reported per member, for edge-triggered presence events.
    last_statuses: Mutex<HashMap<MemberId, ConnectionStatus>>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct MeshEngine {
    inner: Arc<EngineInner>,
}

impl MeshEngine {
    pub fn builder(config: EngineConfig) -> MeshEngineBuilder {
        MeshEngineBuilder::new(config)
    }

    pub fn local(&self) -> &SenderInfo {
        &self.inner.config.local
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Stopped)
        }
    }

    // -- Messaging ----------------------------------------------------------

    /// Log a new outbound message and start delivering it.
    ///
    /// Returns the message as logged. Transport trouble never surfaces here;
    /// it shows up later as a `failed` delivery status.
    pub async fn send(
        &self,
        conversation: Conversation,
        content: impl Into<String>,
        body: MessageBody,
    ) -> Result<Message> {
        self.ensure_running()?;
        let now = self.now();
        let local = &self.inner.config.local;
        let critical = body.is_critical();
        let unbounded = matches!(body, MessageBody::Emergency { .. });

        let (message, payload, admission) = {
            let mut log = self.inner.log.lock().await;
            let message = Message {
                id: MessageId::new(),
                from: local.id.clone(),
                from_name: local.name.clone(),
                sequence: log.next_sequence(&conversation)?,
                conversation,
                content: content.into(),
                body,
                timestamp: now,
                delivery_status: DeliveryStatus::Queued,
                attempts: 0,
            };
            // Encode before touching the log so an oversized frame changes nothing.
            let payload = WireMessage::Message(MessageFrame::from_message(&message, local)).to_bytes()?;
            let admission = log.admission(&local.id, self.inner.config.outbox_capacity, critical);
            log.insert(message.clone());
            (message, payload, admission)
        };

        self.inner.presence.lock().await.observe_sender(local, now);

        match admission {
            Admission::Admit => {}
            Admission::AdmitAfterDropping(victim) => self.drop_queued(&victim).await,
            Admission::Reject => {
                warn!(msg_id = %message.id, "Outbox full of critical messages, failing new message");
                self.drop_queued(&message.id).await;
                return Ok(self.message(&message.id).await.unwrap_or(message));
            }
        }

        debug!(
            msg_id = %message.id,
            conversation = %message.conversation,
            sequence = message.sequence,
            kind = ?message.kind(),
            "Message queued"
        );
        self.inner
            .delivery
            .spawn(DeliveryJob {
                message_id: message.id,
                recipient: message.conversation.recipient(),
                payload: Bytes::from(payload),
                unbounded,
            })
            .await;
        Ok(message)
    }

    pub async fn send_text(&self, conversation: Conversation, content: impl Into<String>) -> Result<Message> {
        self.send(conversation, content, MessageBody::Text).await
    }

    /// Overflow policy: fail a queued message and say so.
    async fn drop_queued(&self, id: &MessageId) {
        warn!(msg_id = %id, "Outbox overflow, dropping queued message");
        self.inner.delivery.apply(id, DeliveryStatus::Failed).await;
        self.inner.delivery.cancel(id).await;
        self.emit(EngineEvent::MessageDropped { id: *id });
    }

    async fn redispatch_pending(&self) {
        let local = &self.inner.config.local;
        let pending: Vec<Message> = self
            .inner
            .log
            .lock()
            .await
            .in_flight(&local.id)
            .into_iter()
            .cloned()
            .collect();
        for message in pending {
            let frame = WireMessage::Message(MessageFrame::from_message(&message, local));
            match frame.to_bytes() {
                Ok(payload) => {
                    debug!(msg_id = %message.id, status = %message.delivery_status, "Re-dispatching restored message");
                    self.inner
                        .delivery
                        .spawn(DeliveryJob {
                            message_id: message.id,
                            recipient: message.conversation.recipient(),
                            payload: Bytes::from(payload),
                            unbounded: matches!(message.body, MessageBody::Emergency { .. }),
                        })
                        .await;
                }
                Err(e) => {
                    warn!(msg_id = %message.id, error = %e, "Cannot re-encode restored message");
                    self.inner.delivery.apply(&message.id, DeliveryStatus::Failed).await;
                }
            }
        }
    }

    pub async fn messages(&self, conversation: &Conversation) -> Vec<Message> {
        self.inner.log.lock().await.conversation(conversation)
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.log.lock().await.conversation_ids()
    }

    pub async fn message(&self, id: &MessageId) -> Option<Message> {
        self.inner.log.lock().await.get(id).cloned()
    }

    pub async fn delivery_status(&self, id: &MessageId) -> Option<DeliveryStatus> {
        self.inner.log.lock().await.get(id).map(|m| m.delivery_status)
    }

    /// Remove a conversation, stopping its deliveries first.
    ///
    /// Frames already on the air without an ack become `failed`; messages
    /// never handed to the radio stay `queued`.
    pub async fn delete_conversation(&self, conversation: &Conversation) -> usize {
        let entries = self.inner.log.lock().await.conversation(conversation);
        for message in &entries {
            if message.delivery_status == DeliveryStatus::Sent {
                self.inner.delivery.apply(&message.id, DeliveryStatus::Failed).await;
            }
            self.inner.delivery.cancel(&message.id).await;
        }
        let removed = self.inner.log.lock().await.remove_conversation(conversation);
        info!(conversation = %conversation, removed = removed.len(), "Conversation deleted");
        removed.len()
    }

    // -- Emergency ----------------------------------------------------------

    /// Raise an SOS. The local slot shows it at once, whatever the radio does.
    pub async fn send_sos(&self, location: Option<Coordinate>) -> Result<Message> {
        let message = self
            .send(
                Conversation::Camp,
                "SOS",
                MessageBody::Emergency {
                    kind: EmergencyKind::Sos,
                    location,
                },
            )
            .await?;
        let emergency = Emergency {
            id: message.id,
            originator_id: message.from.clone(),
            originator_name: message.from_name.clone(),
            timestamp: message.timestamp,
            kind: EmergencyKind::Sos,
            location,
        };
        self.inner.emergency.lock().await.raise_local(emergency.clone());
        self.emit(EngineEvent::EmergencyActive(emergency));
        Ok(message)
    }

    /// Dismiss the active emergency locally. The SOS message is unaffected.
    pub async fn acknowledge_emergency(&self) -> Option<Emergency> {
        let cleared = self.inner.emergency.lock().await.acknowledge()?;
        self.emit(EngineEvent::EmergencyCleared { id: cleared.id });
        Some(cleared)
    }

    /// Admin all-clear: clears the slot here and on every peer showing it.
    pub async fn resolve_emergency(&self) -> Result<Option<Message>> {
        let role = self.inner.config.local.role;
        if !self.inner.authorizer.is_admin(role) {
            return Err(EngineError::Unauthorized {
                role,
                action: "resolve emergencies",
            });
        }
        let Some(active) = self.inner.emergency.lock().await.active().cloned() else {
            return Ok(None);
        };
        let message = self
            .send(
                Conversation::Camp,
                format!("All clear: {}", active.originator_name),
                MessageBody::AllClear {
                    emergency_id: active.id,
                },
            )
            .await?;
        if let Some(cleared) = self.inner.emergency.lock().await.clear(&active.id) {
            self.emit(EngineEvent::EmergencyCleared { id: cleared.id });
        }
        Ok(Some(message))
    }

    pub async fn active_emergency(&self) -> Option<Emergency> {
        self.inner.emergency.lock().await.active().cloned()
    }

    pub async fn emergency_state(&self) -> EmergencyState {
        self.inner.emergency.lock().await.state()
    }

    // -- Check-in -----------------------------------------------------------

    /// Confirm the local member is safe and tell the camp.
    pub async fn check_in(&self) -> Result<Message> {
        self.ensure_running()?;
        let now = self.now();
        self.inner
            .check_ins
            .lock()
            .await
            .check_in(&self.inner.config.local.id, now);
        info!("Checked in");
        self.send(Conversation::Camp, "Checked in", MessageBody::CheckIn).await
    }

    /// Switch the camp-wide interval. Invalid values change nothing.
    pub async fn set_check_in_interval(&self, interval: Duration) -> Result<()> {
        let interval = CheckInInterval::from_duration(interval)?;
        self.inner.check_ins.lock().await.set_interval(interval);
        Ok(())
    }

    pub async fn check_in_interval(&self) -> CheckInInterval {
        self.inner.check_ins.lock().await.interval()
    }

    /// Active members past their check-in deadline, computed now.
    pub async fn overdue_members(&self) -> Vec<MemberId> {
        let overdue = self.inner.check_ins.lock().await.overdue_members(self.now());
        let presence = self.inner.presence.lock().await;
        overdue.into_iter().filter(|m| presence.is_active(m)).collect()
    }

    pub async fn is_overdue(&self, member: &MemberId) -> bool {
        self.inner.check_ins.lock().await.is_overdue(member, self.now())
    }

    pub async fn next_check_in_due(&self, member: &MemberId) -> Option<DateTime<Utc>> {
        self.inner.check_ins.lock().await.next_due(member)
    }

    /// Countdown for the local member.
    pub async fn time_until_check_in(&self) -> Option<chrono::Duration> {
        self.inner
            .check_ins
            .lock()
            .await
            .time_remaining(&self.inner.config.local.id, self.now())
    }

    // -- Announcements ------------------------------------------------------

    pub async fn send_announcement(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
        priority: AnnouncementPriority,
        expires_in: Option<Duration>,
    ) -> Result<Announcement> {
        let local = &self.inner.config.local;
        if !self.inner.authorizer.can_send_announcement(local.role) {
            return Err(EngineError::Unauthorized {
                role: local.role,
                action: "send announcements",
            });
        }
        let now = self.now();
        let expires_at = match expires_in {
            None => None,
            Some(d) if d.is_zero() => {
                return Err(EngineError::InvalidExpiry("expiry must be in the future".into()))
            }
            Some(d) => {
                let d = chrono::Duration::from_std(d).map_err(|e| EngineError::InvalidExpiry(e.to_string()))?;
                Some(now + d)
            }
        };

        let announcement = Announcement {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            priority,
            from: local.id.clone(),
            from_name: local.name.clone(),
            created_at: now,
            expires_at,
            read_by: Default::default(),
        };
        self.send(
            Conversation::Camp,
            announcement.title.clone(),
            MessageBody::Announcement(announcement.clone()),
        )
        .await?;
        self.inner.announcements.lock().await.insert(announcement.clone());
        info!(id = %announcement.id, priority = ?priority, "Announcement sent");
        Ok(announcement)
    }

    pub async fn mark_as_read(&self, id: &Uuid) -> Result<()> {
        let changed = self.inner.announcements.lock().await.mark_as_read(id)?;
        if changed {
            self.broadcast_read_receipt([*id].into_iter().collect());
        }
        Ok(())
    }

    /// Returns how many announcements changed.
    pub async fn mark_all_as_read(&self) -> usize {
        let changed = self.inner.announcements.lock().await.mark_all_as_read(self.now());
        let count = changed.len();
        if count > 0 {
            self.broadcast_read_receipt(changed);
        }
        count
    }

    pub async fn active_announcements(&self) -> Vec<Announcement> {
        self.inner.announcements.lock().await.active(self.now())
    }

    pub async fn unread_announcement_count(&self) -> usize {
        self.inner.announcements.lock().await.unread_count(self.now())
    }

    pub async fn announcement(&self, id: &Uuid) -> Option<Announcement> {
        self.inner.announcements.lock().await.get(id).cloned()
    }

    pub async fn latest_announcement(&self) -> Option<Announcement> {
        self.inner.announcements.lock().await.latest(self.now())
    }

    /// Hide the banner locally. Does not mark anything read.
    pub async fn dismiss_latest_announcement(&self) -> Option<Uuid> {
        self.inner.announcements.lock().await.dismiss_latest(self.now())
    }

    fn broadcast_read_receipt(&self, announcement_ids: std::collections::BTreeSet<Uuid>) {
        let receipt = WireMessage::ReadReceipt(ReadReceipt {
            reader: self.inner.config.local.id.clone(),
            announcement_ids,
        });
        self.send_control(Recipient::Broadcast, receipt);
    }

    // -- Location and shifts ------------------------------------------------

    pub async fn share_location(&self, location: Coordinate) -> Result<Message> {
        let local = &self.inner.config.local.id;
        self.inner.presence.lock().await.update_location(local, location)?;
        self.send(
            Conversation::Camp,
            format!("{:.5}, {:.5}", location.latitude, location.longitude),
            MessageBody::LocationShare(location),
        )
        .await
    }

    pub async fn send_shift_update(&self, shift_ref: Option<String>) -> Result<Message> {
        let local = &self.inner.config.local.id;
        self.inner
            .presence
            .lock()
            .await
            .update_shift(local, shift_ref.clone())?;
        let content = match &shift_ref {
            Some(shift) => format!("On shift {shift}"),
            None => "Off shift".to_string(),
        };
        self.send(Conversation::Camp, content, MessageBody::ShiftUpdate { shift_ref })
            .await
    }

    // -- Members ------------------------------------------------------------

    /// Register a member by hand. Returns `true` if they were new.
    pub async fn add_member(&self, id: MemberId, name: impl Into<String>, role: Role) -> bool {
        let now = self.now();
        let created = self
            .inner
            .presence
            .lock()
            .await
            .add_member(id.clone(), name.into(), role, now);
        self.inner.check_ins.lock().await.ensure_baseline(&id, now);
        created
    }

    pub async fn mark_inactive(&self, id: &MemberId) -> Result<()> {
        self.inner.presence.lock().await.mark_inactive(id)
    }

    pub async fn member(&self, id: &MemberId) -> Option<MemberView> {
        self.inner.presence.lock().await.view(id, self.now())
    }

    pub async fn members(&self) -> Vec<MemberView> {
        self.inner.presence.lock().await.views(self.now())
    }

    pub async fn online_members(&self) -> Vec<MemberId> {
        self.inner.presence.lock().await.online_members(self.now())
    }

    pub async fn connection_status(&self, id: &MemberId) -> Option<ConnectionStatus> {
        self.inner.presence.lock().await.status(id, self.now())
    }

    pub async fn is_online(&self, id: &MemberId) -> bool {
        self.inner.presence.lock().await.is_online(id, self.now())
    }

    pub async fn record_telemetry(&self, telemetry: LinkTelemetry) {
        if telemetry.peer == self.inner.config.local.id {
            return;
        }
        let created = self.inner.presence.lock().await.record_telemetry(&telemetry);
        if created {
            self.inner
                .check_ins
                .lock()
                .await
                .ensure_baseline(&telemetry.peer, telemetry.last_heard_at);
        }
        self.refresh_presence(&telemetry.peer).await;
    }

    /// Emit `PresenceChanged` if `member`'s status differs from the last one reported.
    async fn refresh_presence(&self, member: &MemberId) {
        let Some(status) = self.inner.presence.lock().await.status(member, self.now()) else {
            return;
        };
        let previous = self.inner.last_statuses.lock().await.insert(member.clone(), status);
        if previous != Some(status) {
            debug!(member = %member, status = ?status, "Presence changed");
            self.emit(EngineEvent::PresenceChanged {
                member: member.clone(),
                status,
            });
        }
    }

    // -- Inbound ------------------------------------------------------------

    /// Handle one frame from the transport.
    pub async fn receive(&self, from: &MemberId, payload: &[u8]) {
        let local = &self.inner.config.local.id;
        if from == local {
            return;
        }
        let wire = match WireMessage::from_bytes(payload) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(peer = %from, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        let now = self.now();
        let created = self.inner.presence.lock().await.record_activity(from, now);
        if created {
            self.inner.check_ins.lock().await.ensure_baseline(from, now);
        }
        self.refresh_presence(from).await;

        match wire {
            WireMessage::Message(frame) => self.on_message(frame, now).await,
            WireMessage::Ack(ack) => self.on_ack(ack).await,
            WireMessage::ReadReceipt(receipt) => {
                let merged = self
                    .inner
                    .announcements
                    .lock()
                    .await
                    .apply_read_receipt(&receipt.reader, &receipt.announcement_ids);
                debug!(reader = %receipt.reader, merged, "Read receipt applied");
            }
        }
    }

    async fn on_message(&self, frame: MessageFrame, now: DateTime<Utc>) {
        let local = &self.inner.config.local.id;
        let sender = frame.sender.clone();
        if &sender.id == local {
            return;
        }
        if let Conversation::Direct(to) = &frame.conversation {
            if to != local {
                debug!(msg_id = %frame.id, to = %to, "Ignoring direct frame for another member");
                return;
            }
        }

        let created = self.inner.presence.lock().await.observe_sender(&sender, now);
        if created {
            self.inner.check_ins.lock().await.ensure_baseline(&sender.id, now);
        }
        self.refresh_presence(&sender.id).await;

        let message = frame.into_message(local);
        let (outcome, resequenced) = {
            let mut log = self.inner.log.lock().await;
            let outcome = log.insert(message.clone());
            let resequenced = match &outcome {
                InsertOutcome::Superseded(evicted) if &evicted.from == local => {
                    match log.resequence(evicted.clone()) {
                        Ok(moved) => Some(moved),
                        Err(e) => {
                            warn!(msg_id = %evicted.id, error = %e, "Cannot re-sequence evicted message");
                            None
                        }
                    }
                }
                _ => None,
            };
            (outcome, resequenced)
        };

        if let InsertOutcome::OutOfRange { high_water } = outcome {
            warn!(msg_id = %message.id, from = %sender.id, high_water, "Frame refused, not acknowledging");
            return;
        }

        // Always answer, the sender may have missed an earlier ack.
        self.send_control(
            Recipient::Peer(sender.id.clone()),
            WireMessage::Ack(AckFrame {
                message_id: message.id,
                from: local.clone(),
            }),
        );

        match outcome {
            InsertOutcome::Duplicate | InsertOutcome::OutOfRange { .. } => {
                debug!(msg_id = %message.id, "Duplicate frame absorbed");
                return;
            }
            InsertOutcome::Moved { from } => {
                debug!(msg_id = %message.id, from, to = message.sequence, "Message moved by its author");
                return;
            }
            InsertOutcome::Inserted => {
                debug!(
                    msg_id = %message.id,
                    from = %sender.id,
                    conversation = %message.conversation,
                    sequence = message.sequence,
                    "Message received"
                );
                self.emit(EngineEvent::MessageReceived {
                    id: message.id,
                    conversation: message.conversation.clone(),
                    kind: message.kind(),
                    from: sender.id.clone(),
                });
            }
            InsertOutcome::LostTie { winner } => {
                self.emit(EngineEvent::MessageSuperseded {
                    id: message.id,
                    by: winner,
                });
            }
            InsertOutcome::Superseded(evicted) => {
                self.emit(EngineEvent::MessageSuperseded {
                    id: evicted.id,
                    by: message.id,
                });
                self.emit(EngineEvent::MessageReceived {
                    id: message.id,
                    conversation: message.conversation.clone(),
                    kind: message.kind(),
                    from: sender.id.clone(),
                });
                match resequenced {
                    Some(moved) => self.redeliver(moved).await,
                    None if &evicted.from == local => {
                        self.inner.delivery.cancel(&evicted.id).await;
                    }
                    None => {}
                }
            }
        }

        self.route(&sender, &message, now).await;
    }

    /// Push a re-sequenced local message again under its new sequence.
    async fn redeliver(&self, message: Message) {
        self.emit(EngineEvent::MessageResequenced {
            id: message.id,
            sequence: message.sequence,
        });
        if message.delivery_status == DeliveryStatus::Failed {
            return;
        }
        let local = &self.inner.config.local;
        let payload = match WireMessage::Message(MessageFrame::from_message(&message, local)).to_bytes() {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(msg_id = %message.id, error = %e, "Cannot re-encode moved message");
                return;
            }
        };
        if self.inner.delivery.replace_payload(&message.id, payload.clone()).await {
            return;
        }
        debug!(msg_id = %message.id, sequence = message.sequence, "Re-dispatching moved message");
        self.inner
            .delivery
            .spawn(DeliveryJob {
                message_id: message.id,
                recipient: message.conversation.recipient(),
                payload,
                unbounded: matches!(message.body, MessageBody::Emergency { .. }),
            })
            .await;
    }

    /// Hand a freshly received message to the component its body concerns.
    async fn route(&self, sender: &SenderInfo, message: &Message, now: DateTime<Utc>) {
        // Hand-added members keep the role they were registered with.
        let role = self
            .inner
            .presence
            .lock()
            .await
            .member(&sender.id)
            .map_or(sender.role, |m| m.role);
        match &message.body {
            MessageBody::Text => {}
            MessageBody::Emergency { kind, location } => {
                let emergency = Emergency {
                    id: message.id,
                    originator_id: sender.id.clone(),
                    originator_name: sender.name.clone(),
                    timestamp: message.timestamp,
                    kind: *kind,
                    location: *location,
                };
                if let Some(location) = location {
                    self.record_location(&sender.id, *location).await;
                }
                let change = self.inner.emergency.lock().await.on_received(emergency.clone());
                match change {
                    SlotChange::Activated | SlotChange::Replaced { .. } => {
                        self.emit(EngineEvent::EmergencyActive(emergency));
                    }
                    SlotChange::Ignored => {
                        debug!(emergency = %message.id, "Emergency did not take the slot");
                    }
                }
            }
            MessageBody::AllClear { emergency_id } => {
                if !self.inner.authorizer.is_admin(role) {
                    warn!(from = %sender.id, role = %role, "All-clear from non-admin ignored");
                    return;
                }
                if let Some(cleared) = self.inner.emergency.lock().await.clear(emergency_id) {
                    self.emit(EngineEvent::EmergencyCleared { id: cleared.id });
                }
            }
            MessageBody::Announcement(announcement) => {
                if !self.inner.authorizer.can_send_announcement(role) {
                    warn!(from = %sender.id, role = %role, "Announcement from unauthorized role ignored");
                    return;
                }
                let created = self
                    .inner
                    .announcements
                    .lock()
                    .await
                    .insert(announcement.clone());
                if created {
                    self.emit(EngineEvent::AnnouncementReceived {
                        id: announcement.id,
                        priority: announcement.priority,
                    });
                }
            }
            MessageBody::LocationShare(location) => {
                self.record_location(&sender.id, *location).await;
            }
            MessageBody::ShiftUpdate { shift_ref } => {
                let updated = self
                    .inner
                    .presence
                    .lock()
                    .await
                    .update_shift(&sender.id, shift_ref.clone());
                if updated.is_ok() {
                    self.emit(EngineEvent::ShiftUpdated {
                        member: sender.id.clone(),
                        shift_ref: shift_ref.clone(),
                    });
                }
            }
            MessageBody::CheckIn => {
                // A sender's clock may run ahead; never record a future check-in.
                self.inner
                    .check_ins
                    .lock()
                    .await
                    .check_in(&sender.id, message.timestamp.min(now));
            }
        }
    }

    async fn record_location(&self, member: &MemberId, location: Coordinate) {
        if let Err(e) = self.inner.presence.lock().await.update_location(member, location) {
            debug!(member = %member, error = %e, "Location update skipped");
        }
    }

    async fn on_ack(&self, ack: AckFrame) {
        let ours = self
            .inner
            .log
            .lock()
            .await
            .get(&ack.message_id)
            .map_or(false, |m| m.from == self.inner.config.local.id);
        if !ours {
            return;
        }
        debug!(msg_id = %ack.message_id, from = %ack.from, "Ack received");
        if !self.inner.delivery.acknowledge(&ack.message_id).await {
            self.inner
                .delivery
                .apply(&ack.message_id, DeliveryStatus::Delivered)
                .await;
        }
    }

    /// Fire-and-forget frame that is not logged (acks, read receipts).
    fn send_control(&self, to: Recipient, wire: WireMessage) {
        let payload = match wire.to_bytes() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "Cannot encode control frame");
                return;
            }
        };
        let transport = self.inner.transport.clone();
        tokio::spawn(async move {
            let outcome = transport.send(to, payload).await;
            debug!(outcome = ?outcome, "Control frame sent");
        });
    }

    // -- Periodic sweep -----------------------------------------------------

    /// Re-evaluate everything that depends on the clock.
    pub async fn tick(&self) {
        let now = self.now();

        let statuses = self.inner.presence.lock().await.statuses(now);
        {
            let mut last = self.inner.last_statuses.lock().await;
            for (member, status) in statuses {
                let previous = last.insert(member.clone(), status);
                let changed = match previous {
                    Some(previous) => previous != status,
                    None => status != ConnectionStatus::Offline,
                };
                if changed {
                    debug!(member = %member, status = ?status, "Presence changed");
                    self.emit(EngineEvent::PresenceChanged { member, status });
                }
            }
        }

        let (overdue, reminders, due_at) = {
            let mut check_ins = self.inner.check_ins.lock().await;
            let overdue = check_ins.newly_overdue(now);
            let reminders = check_ins.due_reminders(now);
            let due_at = check_ins.next_due(&self.inner.config.local.id);
            (overdue, reminders, due_at)
        };
        let overdue: Vec<MemberId> = {
            let presence = self.inner.presence.lock().await;
            overdue.into_iter().filter(|m| presence.is_active(m)).collect()
        };
        for member in overdue {
            warn!(member = %member, "Check-in overdue");
            self.emit(EngineEvent::OverdueCheckIn { member });
        }
        if let Some(due_at) = due_at {
            for percent in reminders {
                info!(percent, due_at = %due_at, "Check-in reminder");
                self.emit(EngineEvent::CheckInReminder { percent, due_at });
            }
        }

        let expired = self.inner.announcements.lock().await.sweep_expired(now);
        for id in expired {
            debug!(id = %id, "Announcement expired");
            self.emit(EngineEvent::AnnouncementExpired { id });
        }
    }

    // -- Persistence --------------------------------------------------------

    pub async fn snapshot(&self) -> Snapshot {
        let members = self.inner.presence.lock().await.members();
        let messages = self.inner.log.lock().await.all();
        let (announcements, dismissed_announcements) = {
            let board = self.inner.announcements.lock().await;
            (board.all(), board.dismissed())
        };
        let (check_ins, interval) = {
            let scheduler = self.inner.check_ins.lock().await;
            (scheduler.records(), scheduler.interval())
        };
        let active_emergency = self.inner.emergency.lock().await.active().cloned();
        Snapshot {
            taken_at: self.now(),
            local: self.inner.config.local.clone(),
            members,
            messages,
            announcements,
            dismissed_announcements,
            check_ins,
            check_in_interval_secs: interval.as_duration().as_secs(),
            active_emergency,
        }
    }

    /// Stop background tasks and cancel every in-flight delivery.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        let cancelled = self.inner.delivery.cancel_all().await;
        info!(cancelled, "Mesh engine stopped");
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn run_inbound(engine: MeshEngine, mut notifications: mpsc::Receiver<TransportNotification>) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            TransportNotification::Frame { from, payload } => engine.receive(&from, &payload).await,
            TransportNotification::Telemetry(telemetry) => engine.record_telemetry(telemetry).await,
        }
    }
    info!("Transport notification channel closed");
}

async fn run_ticker(engine: MeshEngine) {
    let mut interval = tokio::time::interval(engine.inner.config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        engine.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::clock::ManualClock;
    use crate::transport::{LoopbackMesh, TransportCommand};

    fn config(id: &str, role: Role) -> EngineConfig {
        EngineConfig::new(SenderInfo::new(id, id.to_uppercase(), role))
    }

    async fn solo(role: Role, clock: ManualClock) -> (MeshEngine, mpsc::Receiver<TransportCommand>) {
        let (handle, cmd_rx) = TransportHandle::channel(64);
        let (_notif_tx, notif_rx) = mpsc::channel(8);
        let engine = MeshEngine::builder(config("me", role))
            .clock(clock)
            .spawn(handle, notif_rx)
            .await;
        (engine, cmd_rx)
    }

    fn frame_from(sender: SenderInfo, sequence: u64, body: MessageBody, at: DateTime<Utc>) -> Vec<u8> {
        WireMessage::Message(MessageFrame {
            id: MessageId::new(),
            sender,
            conversation: Conversation::Camp,
            sequence,
            timestamp: at,
            content: "x".into(),
            body,
        })
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn test_non_lead_cannot_announce() {
        let (engine, _cmd_rx) = solo(Role::General, ManualClock::new(Utc::now())).await;
        let err = engine
            .send_announcement("t", "m", AnnouncementPriority::Normal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized { .. }));
        assert!(engine.messages(&Conversation::Camp).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_interval_rejected_without_change() {
        let (engine, _cmd_rx) = solo(Role::General, ManualClock::new(Utc::now())).await;
        let err = engine
            .set_check_in_interval(Duration::from_secs(2 * 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterval(_)));
        assert_eq!(engine.check_in_interval().await.hours(), 4);
    }

    #[tokio::test]
    async fn test_zero_expiry_rejected() {
        let (engine, _cmd_rx) = solo(Role::Lead, ManualClock::new(Utc::now())).await;
        let err = engine
            .send_announcement("t", "m", AnnouncementPriority::Normal, Some(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidExpiry(_)));
    }

    #[tokio::test]
    async fn test_sequences_increase_across_sends() {
        let (engine, _cmd_rx) = solo(Role::General, ManualClock::new(Utc::now())).await;
        let mut last = 0;
        for i in 0..10 {
            let m = engine.send_text(Conversation::Camp, format!("{i}")).await.unwrap();
            assert!(m.sequence > last);
            last = m.sequence;
        }
    }

    #[tokio::test]
    async fn test_concurrent_sends_get_unique_sequences() {
        let (engine, _cmd_rx) = solo(Role::General, ManualClock::new(Utc::now())).await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.send_text(Conversation::Camp, format!("{i}")).await.unwrap().sequence
            }));
        }
        let mut seqs = Vec::new();
        for h in handles {
            seqs.push(h.await.unwrap());
        }
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 20);
    }

    #[tokio::test]
    async fn test_receive_updates_presence_and_dedups() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let bob = SenderInfo::new("bob", "Bob", Role::Medical);
        let payload = frame_from(bob.clone(), 3, MessageBody::Text, clock.now());

        engine.receive(&bob.id, &payload).await;
        engine.receive(&bob.id, &payload).await;

        assert_eq!(engine.messages(&Conversation::Camp).await.len(), 1);
        assert_eq!(engine.connection_status(&bob.id).await, Some(ConnectionStatus::Connected));
        assert_eq!(engine.member(&bob.id).await.unwrap().member.role, Role::Medical);

        clock.advance(ChronoDuration::minutes(10));
        assert_eq!(engine.connection_status(&bob.id).await, Some(ConnectionStatus::Recent));
        clock.advance(ChronoDuration::minutes(25));
        assert_eq!(engine.connection_status(&bob.id).await, Some(ConnectionStatus::Offline));

        // Our next send goes above what we have seen.
        let mine = engine.send_text(Conversation::Camp, "hi").await.unwrap();
        assert_eq!(mine.sequence, 4);
    }

    #[tokio::test]
    async fn test_unauthorized_all_clear_ignored() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let bob = SenderInfo::new("bob", "Bob", Role::General);
        let sos = WireMessage::Message(MessageFrame {
            id: MessageId::new(),
            sender: bob.clone(),
            conversation: Conversation::Camp,
            sequence: 1,
            timestamp: clock.now(),
            content: "SOS".into(),
            body: MessageBody::Emergency {
                kind: EmergencyKind::Sos,
                location: None,
            },
        });
        let sos_id = match &sos {
            WireMessage::Message(f) => f.id,
            _ => unreachable!(),
        };
        engine.receive(&bob.id, &sos.to_bytes().unwrap()).await;
        assert_eq!(engine.emergency_state().await, EmergencyState::Active);

        let clear = frame_from(bob.clone(), 2, MessageBody::AllClear { emergency_id: sos_id }, clock.now());
        engine.receive(&bob.id, &clear).await;
        assert_eq!(engine.emergency_state().await, EmergencyState::Active);

        let lead = SenderInfo::new("lead", "Lead", Role::Lead);
        let clear = frame_from(lead.clone(), 3, MessageBody::AllClear { emergency_id: sos_id }, clock.now());
        engine.receive(&lead.id, &clear).await;
        assert_eq!(engine.emergency_state().await, EmergencyState::Idle);
    }

    #[tokio::test]
    async fn test_tick_reports_overdue_once() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let mut events = engine.subscribe();
        let bob = MemberId::new("bob");
        engine.add_member(bob.clone(), "Bob", Role::Bus).await;

        clock.advance(ChronoDuration::hours(4) + ChronoDuration::seconds(1));
        engine.tick().await;
        engine.tick().await;

        let mut overdue = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::OverdueCheckIn { member } = event {
                overdue.push(member);
            }
        }
        overdue.sort();
        assert_eq!(overdue, vec![bob.clone(), MemberId::new("me")]);

        engine.mark_inactive(&bob).await.unwrap();
        assert_eq!(engine.overdue_members().await, vec![MemberId::new("me")]);
    }

    #[tokio::test]
    async fn test_check_in_clears_own_overdue() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        clock.advance(ChronoDuration::hours(5));
        assert!(engine.is_overdue(&MemberId::new("me")).await);
        let msg = engine.check_in().await.unwrap();
        assert_eq!(msg.kind(), campmesh_shared::MessageKind::CheckIn);
        assert!(!engine.is_overdue(&MemberId::new("me")).await);
    }

    #[tokio::test]
    async fn test_snapshot_restore_keeps_state() {
        let clock = ManualClock::new(Utc::now());
        let mesh = LoopbackMesh::new();
        let (handle, rx) = mesh.join(MemberId::new("me"));
        let engine = MeshEngine::builder(config("me", Role::Lead))
            .clock(clock.clone())
            .spawn(handle, rx)
            .await;
        engine.set_check_in_interval(Duration::from_secs(3600)).await.unwrap();
        engine
            .send_announcement("Gate", "Closes at 10", AnnouncementPriority::Important, None)
            .await
            .unwrap();
        let snapshot = engine.snapshot().await;
        engine.shutdown().await;

        let mesh = LoopbackMesh::new();
        let (handle, rx) = mesh.join(MemberId::new("me"));
        let restored = MeshEngine::builder(config("me", Role::Lead))
            .clock(clock)
            .restore(snapshot.clone())
            .spawn(handle, rx)
            .await;
        assert_eq!(restored.check_in_interval().await.hours(), 1);
        assert_eq!(restored.active_announcements().await.len(), 1);
        assert_eq!(restored.messages(&Conversation::Camp).await.len(), 1);
        assert!(matches!(
            restored.send_text(Conversation::Camp, "x").await,
            Ok(_)
        ));
        restored.shutdown().await;
        assert!(matches!(
            restored.send_text(Conversation::Camp, "x").await,
            Err(EngineError::Stopped)
        ));
    }

    fn notice(from: &SenderInfo, at: DateTime<Utc>) -> MessageBody {
        MessageBody::Announcement(Announcement {
            id: Uuid::new_v4(),
            title: "Gate".into(),
            message: "Closed tonight".into(),
            priority: AnnouncementPriority::Urgent,
            from: from.id.clone(),
            from_name: from.name.clone(),
            created_at: at,
            expires_at: None,
            read_by: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_hostile_sequence_does_not_poison_sends() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let bob = SenderInfo::new("bob", "Bob", Role::General);

        engine
            .receive(&bob.id, &frame_from(bob.clone(), u64::MAX, MessageBody::Text, clock.now()))
            .await;
        assert!(engine.messages(&Conversation::Camp).await.is_empty());

        let mine = engine.send_text(Conversation::Camp, "still here").await.unwrap();
        assert_eq!(mine.sequence, 1);
    }

    #[tokio::test]
    async fn test_peer_check_in_recorded_at_receive_time() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let bob = SenderInfo::new("bob", "Bob", Role::General);
        let t0 = clock.now();

        let far_future: DateTime<Utc> = "9999-12-31T23:59:59Z".parse().unwrap();
        engine
            .receive(&bob.id, &frame_from(bob.clone(), 1, MessageBody::CheckIn, far_future))
            .await;
        assert_eq!(engine.next_check_in_due(&bob.id).await, Some(t0 + ChronoDuration::hours(4)));
        assert!(engine.overdue_members().await.is_empty());
        engine.tick().await;

        // A clock running a day ahead still only counts as "now".
        clock.advance(ChronoDuration::hours(1));
        let ahead = clock.now() + ChronoDuration::days(1);
        engine
            .receive(&bob.id, &frame_from(bob.clone(), 2, MessageBody::CheckIn, ahead))
            .await;
        let due = t0 + ChronoDuration::hours(5);
        assert_eq!(engine.next_check_in_due(&bob.id).await, Some(due));

        clock.advance(ChronoDuration::hours(4) + ChronoDuration::seconds(1));
        assert!(engine.is_overdue(&bob.id).await);
        engine
            .receive(&bob.id, &frame_from(bob.clone(), 3, MessageBody::CheckIn, clock.now()))
            .await;
        assert!(!engine.is_overdue(&bob.id).await);
        engine.tick().await;
    }

    #[tokio::test]
    async fn test_inbound_announcement_needs_lead() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;

        let carol = SenderInfo::new("carol", "Carol", Role::General);
        engine
            .receive(&carol.id, &frame_from(carol.clone(), 1, notice(&carol, clock.now()), clock.now()))
            .await;
        assert!(engine.active_announcements().await.is_empty());

        // Registered as general by hand, then claims to be a lead.
        engine.add_member(MemberId::new("bob"), "Bob", Role::General).await;
        let bob = SenderInfo::new("bob", "Bob", Role::Lead);
        engine
            .receive(&bob.id, &frame_from(bob.clone(), 2, notice(&bob, clock.now()), clock.now()))
            .await;
        assert!(engine.active_announcements().await.is_empty());
        assert_eq!(engine.member(&bob.id).await.unwrap().member.role, Role::General);

        let lead = SenderInfo::new("lead", "Lead", Role::Lead);
        engine
            .receive(&lead.id, &frame_from(lead.clone(), 3, notice(&lead, clock.now()), clock.now()))
            .await;
        assert_eq!(engine.active_announcements().await.len(), 1);
    }

    #[tokio::test]
    async fn test_evicted_local_message_is_resequenced() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let mut events = engine.subscribe();
        let mine = engine.send_text(Conversation::Camp, "mine").await.unwrap();

        let bob = SenderInfo::new("bob", "Bob", Role::General);
        let theirs = WireMessage::Message(MessageFrame {
            id: MessageId(Uuid::nil()),
            sender: bob.clone(),
            conversation: Conversation::Camp,
            sequence: mine.sequence,
            timestamp: clock.now(),
            content: "theirs".into(),
            body: MessageBody::Text,
        });
        engine.receive(&bob.id, &theirs.to_bytes().unwrap()).await;

        let log = engine.messages(&Conversation::Camp).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, MessageId(Uuid::nil()));
        assert_eq!(log[1].id, mine.id);
        assert_eq!(log[1].sequence, 2);
        assert!(engine.delivery_status(&mine.id).await.is_some());

        let mut resequenced = false;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::MessageResequenced { id, sequence } = event {
                resequenced = id == mine.id && sequence == 2;
            }
        }
        assert!(resequenced);
    }

    #[tokio::test]
    async fn test_location_share_updates_sender() {
        let clock = ManualClock::new(Utc::now());
        let (engine, _cmd_rx) = solo(Role::General, clock.clone()).await;
        let bob = SenderInfo::new("bob", "Bob", Role::Perimeter);
        let here = Coordinate {
            latitude: 40.786,
            longitude: -119.206,
            recorded_at: clock.now(),
        };

        engine
            .receive(&bob.id, &frame_from(bob.clone(), 1, MessageBody::LocationShare(here), clock.now()))
            .await;
        let member = engine.member(&bob.id).await.unwrap().member;
        assert_eq!(member.last_known_location, Some(here));
    }
}
