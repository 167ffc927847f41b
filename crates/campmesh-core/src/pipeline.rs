//! Ordered, deduplicated conversation log and outbox bookkeeping.
//!
//! Every conversation is kept sorted by `sequence`. Ids of logged messages
//! are remembered forever, also after their conversation is deleted, so a
//! repeated frame can never produce a second entry. A message that lost a
//! sequence tie is forgotten: its author re-sends it under a higher
//! sequence, and a repeat of the losing frame just loses again.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use campmesh_shared::constants::MAX_SEQUENCE_JUMP;
use campmesh_shared::{Conversation, DeliveryStatus, MemberId, Message, MessageId};

use crate::error::{EngineError, Result};

/// Result of offering a message to the log.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// Same id seen before; nothing changed.
    Duplicate,
    /// Another message already holds this sequence with a lower id.
    LostTie { winner: MessageId },
    /// The new message took the slot; the previous holder was evicted.
    Superseded(Message),
    /// Known id re-sent by its author under a higher sequence.
    Moved { from: u64 },
    /// Sequence zero, or too far above anything seen in the conversation.
    OutOfRange { high_water: u64 },
}

/// What to do with a new outbound message when the outbox is full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Admit after failing this older non-critical queued message.
    AdmitAfterDropping(MessageId),
    /// Only critical messages are pending; the new one cannot be queued.
    Reject,
}

#[derive(Debug, Default)]
pub struct MessageLog {
    conversations: HashMap<Conversation, Vec<Message>>,
    /// Highest sequence assigned or observed per conversation.
    high_water: HashMap<Conversation, u64>,
    seen: HashSet<MessageId>,
    index: HashMap<MessageId, Conversation>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence the next outbound message in `conversation` must carry.
    ///
    /// Always above anything seen in the conversation. Inserting the message
    /// raises the high-water mark, so callers holding the log lock across
    /// both steps never hand out the same sequence twice.
    pub fn next_sequence(&self, conversation: &Conversation) -> Result<u64> {
        self.high_water(conversation)
            .checked_add(1)
            .ok_or_else(|| EngineError::SequenceExhausted(conversation.clone()))
    }

    pub fn high_water(&self, conversation: &Conversation) -> u64 {
        self.high_water.get(conversation).copied().unwrap_or(0)
    }

    pub fn insert(&mut self, message: Message) -> InsertOutcome {
        let previous = self.get(&message.id).map(|m| m.sequence);
        match previous {
            Some(current) if message.sequence <= current => return InsertOutcome::Duplicate,
            None if self.seen.contains(&message.id) => return InsertOutcome::Duplicate,
            _ => {}
        }

        let high_water = self.high_water(&message.conversation);
        if message.sequence == 0 || message.sequence > high_water.saturating_add(MAX_SEQUENCE_JUMP) {
            warn!(
                msg_id = %message.id,
                sequence = message.sequence,
                high_water,
                "Sequence out of range, refusing frame"
            );
            return InsertOutcome::OutOfRange { high_water };
        }

        match previous {
            Some(from) => {
                self.take(&message.id);
                match self.place(message) {
                    InsertOutcome::Inserted => InsertOutcome::Moved { from },
                    other => other,
                }
            }
            None => self.place(message),
        }
    }

    /// Give an evicted local message a fresh sequence and log it again.
    pub fn resequence(&mut self, mut message: Message) -> Result<Message> {
        let from = message.sequence;
        message.sequence = self.next_sequence(&message.conversation)?;
        debug!(msg_id = %message.id, from, to = message.sequence, "Message re-sequenced");
        self.place(message.clone());
        Ok(message)
    }

    fn place(&mut self, message: Message) -> InsertOutcome {
        let high = self.high_water.entry(message.conversation.clone()).or_insert(0);
        *high = (*high).max(message.sequence);

        let entries = self
            .conversations
            .entry(message.conversation.clone())
            .or_default();

        match entries.binary_search_by_key(&message.sequence, |m| m.sequence) {
            Ok(pos) if entries[pos].id < message.id => {
                debug!(
                    msg_id = %message.id,
                    winner = %entries[pos].id,
                    sequence = message.sequence,
                    "Sequence tie lost, discarding"
                );
                InsertOutcome::LostTie {
                    winner: entries[pos].id,
                }
            }
            Ok(pos) => {
                self.seen.insert(message.id);
                self.index.insert(message.id, message.conversation.clone());
                let evicted = std::mem::replace(&mut entries[pos], message);
                self.index.remove(&evicted.id);
                self.seen.remove(&evicted.id);
                warn!(
                    evicted = %evicted.id,
                    sequence = evicted.sequence,
                    "Sequence tie won by lower id, evicting previous entry"
                );
                InsertOutcome::Superseded(evicted)
            }
            Err(pos) => {
                self.seen.insert(message.id);
                self.index.insert(message.id, message.conversation.clone());
                entries.insert(pos, message);
                InsertOutcome::Inserted
            }
        }
    }

    /// Unlog a message so it can be placed again.
    fn take(&mut self, id: &MessageId) -> Option<Message> {
        let conversation = self.index.remove(id)?;
        self.seen.remove(id);
        let entries = self.conversations.get_mut(&conversation)?;
        let pos = entries.iter().position(|m| &m.id == id)?;
        Some(entries.remove(pos))
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let conversation = self.index.get(id)?;
        self.conversations
            .get(conversation)?
            .iter()
            .find(|m| &m.id == id)
    }

    /// Move a message's delivery status forward.
    ///
    /// Returns the new status if the transition happened. Backward or
    /// sideways transitions and unknown ids are ignored.
    pub fn advance(&mut self, id: &MessageId, next: DeliveryStatus) -> Option<DeliveryStatus> {
        let message = self.get_mut(id)?;
        if !message.delivery_status.can_advance_to(next) {
            return None;
        }
        message.delivery_status = next;
        Some(next)
    }

    /// Count a transport attempt. Returns the new total.
    pub fn record_attempt(&mut self, id: &MessageId) -> Option<u32> {
        let message = self.get_mut(id)?;
        message.attempts += 1;
        Some(message.attempts)
    }

    /// Messages of one conversation in sequence order.
    pub fn conversation(&self, conversation: &Conversation) -> Vec<Message> {
        self.conversations
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    pub fn conversation_ids(&self) -> Vec<Conversation> {
        let mut ids: Vec<Conversation> = self.conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove a whole conversation. Ids stay remembered.
    pub fn remove_conversation(&mut self, conversation: &Conversation) -> Vec<Message> {
        let removed = self.conversations.remove(conversation).unwrap_or_default();
        for message in &removed {
            self.index.remove(&message.id);
        }
        removed
    }

    /// Outbound messages from `local` still in flight, oldest first.
    pub fn in_flight(&self, local: &MemberId) -> Vec<&Message> {
        let mut pending: Vec<&Message> = self
            .conversations
            .values()
            .flatten()
            .filter(|m| &m.from == local && !m.delivery_status.is_terminal())
            .collect();
        pending.sort_by_key(|m| (m.timestamp, m.sequence));
        pending
    }

    /// Decide whether a new outbound message fits in the outbox.
    pub fn admission(&self, local: &MemberId, capacity: usize, critical: bool) -> Admission {
        let pending = self.in_flight(local);
        if critical || pending.len() < capacity {
            return Admission::Admit;
        }
        match pending
            .iter()
            .find(|m| !m.is_critical() && m.delivery_status == DeliveryStatus::Queued)
        {
            Some(victim) => Admission::AdmitAfterDropping(victim.id),
            None => Admission::Reject,
        }
    }

    /// Every message, conversation by conversation, each in sequence order.
    pub fn all(&self) -> Vec<Message> {
        self.conversation_ids()
            .iter()
            .flat_map(|c| self.conversation(c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Reload persisted messages. They were accepted once, so the sequence
    /// range check does not apply.
    pub fn restore(&mut self, messages: Vec<Message>) {
        for message in messages {
            if !self.seen.contains(&message.id) {
                self.place(message);
            }
        }
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let conversation = self.index.get(id)?;
        self.conversations
            .get_mut(conversation)?
            .iter_mut()
            .find(|m| &m.id == id)
    }
}
