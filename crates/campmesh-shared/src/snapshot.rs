//! Serializable picture of the engine state handed to persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Announcement, CheckInRecord, Emergency, Member, Message};
use crate::types::SenderInfo;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub local: SenderInfo,
    pub members: Vec<Member>,
    /// All conversations, each in sequence order.
    pub messages: Vec<Message>,
    pub announcements: Vec<Announcement>,
    /// Announcements whose banner was dismissed locally.
    pub dismissed_announcements: Vec<Uuid>,
    pub check_ins: Vec<CheckInRecord>,
    pub check_in_interval_secs: u64,
    pub active_emergency: Option<Emergency>,
}
