//! Column encodings shared by the table modules.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use campmesh_shared::{AnnouncementPriority, Conversation, DeliveryStatus, MemberId};

/// Wrap a parse failure of column `idx` as a rusqlite conversion error.
pub(crate) fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

#[derive(Debug)]
pub(crate) struct BadTag(pub String);

impl std::fmt::Display for BadTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognised tag {:?}", self.0)
    }
}

impl std::error::Error for BadTag {}

pub(crate) fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

/// `camp` or `dm:<member>`.
pub(crate) fn conversation_to_sql(conversation: &Conversation) -> String {
    conversation.to_string()
}

pub(crate) fn conversation_from_sql(idx: usize, s: &str) -> rusqlite::Result<Conversation> {
    match s {
        "camp" => Ok(Conversation::Camp),
        other => match other.strip_prefix("dm:") {
            Some(peer) if !peer.is_empty() => Ok(Conversation::Direct(MemberId::new(peer))),
            _ => Err(conversion_err(idx, BadTag(other.to_string()))),
        },
    }
}

pub(crate) fn status_from_sql(idx: usize, s: &str) -> rusqlite::Result<DeliveryStatus> {
    match s {
        "queued" => Ok(DeliveryStatus::Queued),
        "sent" => Ok(DeliveryStatus::Sent),
        "delivered" => Ok(DeliveryStatus::Delivered),
        "failed" => Ok(DeliveryStatus::Failed),
        other => Err(conversion_err(idx, BadTag(other.to_string()))),
    }
}

pub(crate) fn priority_to_sql(priority: AnnouncementPriority) -> &'static str {
    match priority {
        AnnouncementPriority::Normal => "normal",
        AnnouncementPriority::Important => "important",
        AnnouncementPriority::Urgent => "urgent",
    }
}

pub(crate) fn priority_from_sql(idx: usize, s: &str) -> rusqlite::Result<AnnouncementPriority> {
    match s {
        "normal" => Ok(AnnouncementPriority::Normal),
        "important" => Ok(AnnouncementPriority::Important),
        "urgent" => Ok(AnnouncementPriority::Urgent),
        other => Err(conversion_err(idx, BadTag(other.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_tags() {
        let dm = Conversation::Direct(MemberId::new("bob"));
        assert_eq!(conversation_to_sql(&dm), "dm:bob");
        assert_eq!(conversation_from_sql(0, "dm:bob").unwrap(), dm);
        assert_eq!(conversation_from_sql(0, "camp").unwrap(), Conversation::Camp);
        assert!(conversation_from_sql(0, "dm:").is_err());
        assert!(conversation_from_sql(0, "lobby").is_err());
    }

    #[test]
    fn status_and_priority_tags() {
        for status in [
            DeliveryStatus::Queued,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(status_from_sql(0, status.as_str()).unwrap(), status);
        }
        assert!(status_from_sql(0, "lost").is_err());
        assert_eq!(
            priority_from_sql(0, priority_to_sql(AnnouncementPriority::Urgent)).unwrap(),
            AnnouncementPriority::Urgent
        );
    }
}
