use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;
use crate::models::{Message, MessageBody};
use crate::types::{Conversation, DeliveryStatus, MemberId, MessageId, SenderInfo};

/// All wire protocol frames exchanged between peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// A loggable message (text, announcement, emergency, check-in, ...)
    Message(MessageFrame),

    /// Receipt for a message, sent back to its author
    Ack(AckFrame),

    /// Announcement acknowledgement fan-out
    ReadReceipt(ReadReceipt),
}

/// A message as it travels over the radio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFrame {
    /// Message UUID for deduplication
    pub id: MessageId,
    pub sender: SenderInfo,
    /// Conversation as seen by the sender
    pub conversation: Conversation,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub body: MessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    pub message_id: MessageId,
    pub from: MemberId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub reader: MemberId,
    pub announcement_ids: BTreeSet<Uuid>,
}

impl MessageFrame {
    pub fn from_message(message: &Message, sender: &SenderInfo) -> Self {
        Self {
            id: message.id,
            sender: sender.clone(),
            conversation: message.conversation.clone(),
            sequence: message.sequence,
            timestamp: message.timestamp,
            content: message.content.clone(),
            body: message.body.clone(),
        }
    }

    /// Turn a received frame into a log entry from `local`'s point of view.
    ///
    /// A direct frame addressed to us belongs to the thread with its sender.
    pub fn into_message(self, local: &MemberId) -> Message {
        let conversation = match self.conversation {
            Conversation::Direct(ref to) if to == local => {
                Conversation::Direct(self.sender.id.clone())
            }
            other => other,
        };
        Message {
            id: self.id,
            from: self.sender.id,
            from_name: self.sender.name,
            conversation,
            content: self.content,
            body: self.body,
            timestamp: self.timestamp,
            sequence: self.sequence,
            delivery_status: DeliveryStatus::Delivered,
            attempts: 0,
        }
    }
}

impl WireMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = bincode::serialize(self).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        bincode::deserialize(data).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
