//! Domain records shared by the engine, the wire protocol and the store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to persistence or to a UI layer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::SELF_SENTINEL;
use crate::types::{
    AnnouncementPriority, Conversation, Coordinate, DeliveryStatus, EmergencyKind, MemberId,
    MessageId, MessageKind, Role,
};

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// A known camp member.
///
/// Connection status is not a field: it is derived from `last_seen` at read
/// time by the presence tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub role: Role,
    /// Last time any radio activity was observed from this member.
    pub last_seen: Option<DateTime<Utc>>,
    /// Link quality from the last telemetry report (0-100).
    pub signal_quality: Option<u8>,
    pub last_known_location: Option<Coordinate>,
    /// Opaque reference owned by the shift subsystem.
    pub current_shift: Option<String>,
    /// Inactive members stay in the registry so message history still resolves.
    pub active: bool,
    pub added_at: DateTime<Utc>,
    /// Set for hand-added members: claimed roles in frames do not override it.
    #[serde(default)]
    pub role_pinned: bool,
}

impl Member {
    pub fn new(id: MemberId, name: String, role: Role, added_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            role,
            last_seen: None,
            signal_quality: None,
            last_known_location: None,
            current_shift: None,
            active: true,
            added_at,
            role_pinned: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Typed payload of a message. The variant determines the message kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageBody {
    Text,
    Announcement(Announcement),
    Emergency {
        kind: EmergencyKind,
        location: Option<Coordinate>,
    },
    /// Clears the emergency raised by `emergency_id` on every peer showing it.
    AllClear { emergency_id: MessageId },
    LocationShare(Coordinate),
    ShiftUpdate { shift_ref: Option<String> },
    CheckIn,
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text => MessageKind::Text,
            MessageBody::Announcement(_) => MessageKind::Announcement,
            MessageBody::Emergency { .. } | MessageBody::AllClear { .. } => MessageKind::Emergency,
            MessageBody::LocationShare(_) => MessageKind::LocationShare,
            MessageBody::ShiftUpdate { .. } => MessageKind::ShiftUpdate,
            MessageBody::CheckIn => MessageKind::CheckIn,
        }
    }

    /// Critical messages are never dropped by the outbox overflow policy.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            MessageBody::Emergency { .. } | MessageBody::AllClear { .. } | MessageBody::CheckIn
        )
    }
}

/// A single entry of a conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub from: MemberId,
    pub from_name: String,
    pub conversation: Conversation,
    pub content: String,
    pub body: MessageBody,
    /// When the message was created (as reported by the sender).
    pub timestamp: DateTime<Utc>,
    /// Position within the conversation; strictly increasing.
    pub sequence: u64,
    pub delivery_status: DeliveryStatus,
    /// Transport attempts made so far (outbound only).
    pub attempts: u32,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_critical(&self) -> bool {
        self.body.is_critical()
    }

    /// Sender id for display, with our own messages shown as the self sentinel.
    pub fn sender_label(&self, local: &MemberId) -> &str {
        if &self.from == local {
            SELF_SENTINEL
        } else {
            self.from.as_str()
        }
    }
}

// ---------------------------------------------------------------------------
// Announcement
// ---------------------------------------------------------------------------

/// A priority-tagged camp-wide notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub priority: AnnouncementPriority,
    pub from: MemberId,
    pub from_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Members who acknowledged; only ever grows.
    pub read_by: BTreeSet<MemberId>,
}

impl Announcement {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    pub fn is_read_by(&self, member: &MemberId) -> bool {
        self.read_by.contains(member)
    }
}

// ---------------------------------------------------------------------------
// Emergency
// ---------------------------------------------------------------------------

/// Occupant of the single active-emergency slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Emergency {
    /// Id of the emergency message that raised it.
    pub id: MessageId,
    pub originator_id: MemberId,
    pub originator_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EmergencyKind,
    pub location: Option<Coordinate>,
}

// ---------------------------------------------------------------------------
// Check-in
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckInRecord {
    pub member: MemberId,
    pub last_check_in: DateTime<Utc>,
}
