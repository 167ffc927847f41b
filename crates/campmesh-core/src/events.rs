//! Notifications emitted by the engine for external observers (UI, push
//! notifier). Delivered over a `tokio::sync::broadcast` channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use campmesh_shared::{
    AnnouncementPriority, ConnectionStatus, Conversation, DeliveryStatus, Emergency, MemberId,
    MessageId, MessageKind,
};

/// Capacity of the broadcast channel. Slow observers lag rather than block.
pub const EVENT_CHANNEL_CAPACITY: usize = 512;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    MessageReceived {
        id: MessageId,
        conversation: Conversation,
        kind: MessageKind,
        from: MemberId,
    },
    DeliveryStatusChanged {
        id: MessageId,
        status: DeliveryStatus,
        attempts: u32,
    },
    /// Removed from the outbox by the overflow policy.
    MessageDropped {
        id: MessageId,
    },
    /// Lost its sequence slot to a message with a lower id.
    MessageSuperseded {
        id: MessageId,
        by: MessageId,
    },
    /// A local message that lost its slot, logged again and re-sent.
    MessageResequenced {
        id: MessageId,
        sequence: u64,
    },
    PresenceChanged {
        member: MemberId,
        status: ConnectionStatus,
    },
    OverdueCheckIn {
        member: MemberId,
    },
    CheckInReminder {
        percent: u8,
        due_at: DateTime<Utc>,
    },
    EmergencyActive(Emergency),
    EmergencyCleared {
        id: MessageId,
    },
    AnnouncementReceived {
        id: Uuid,
        priority: AnnouncementPriority,
    },
    AnnouncementExpired {
        id: Uuid,
    },
    ShiftUpdated {
        member: MemberId,
        shift_ref: Option<String>,
    },
}
