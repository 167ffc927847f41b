use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use campmesh_shared::{Conversation, MemberId, ProtocolError, Role};

/// Errors produced by the engine at its call boundary.
///
/// Transport failures are not errors: they surface as
/// `DeliveryStatus::Failed` on the affected message.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Role {role} is not allowed to {action}")]
    Unauthorized { role: Role, action: &'static str },

    #[error("Invalid check-in interval {0:?}: expected one of 1h, 4h, 8h, 12h")]
    InvalidInterval(Duration),

    #[error("Invalid announcement expiry: {0}")]
    InvalidExpiry(String),

    #[error("Unknown member: {0}")]
    UnknownMember(MemberId),

    #[error("Unknown announcement: {0}")]
    UnknownAnnouncement(Uuid),

    #[error("Sequence space exhausted in {0}")]
    SequenceExhausted(Conversation),

    #[error("Engine has been shut down")]
    Stopped,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
