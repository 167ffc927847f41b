//! Whole-engine snapshot persistence.
//!
//! A save replaces every table inside one transaction, so a crash mid-write
//! leaves the previous snapshot intact.

use rusqlite::params;
use tracing::{debug, info};

use campmesh_shared::{Emergency, SenderInfo, Snapshot};

use crate::announcements::{read_announcements, write_announcement};
use crate::check_ins::{
    read_check_ins, read_interval, read_setting, write_check_in, write_setting, INTERVAL_KEY,
};
use crate::codec::parse_ts;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::members::{read_members, write_member};
use crate::messages::{read_messages, write_message};

const LOCAL_KEY: &str = "local_identity";
const TAKEN_AT_KEY: &str = "snapshot_taken_at";

impl Database {
    pub fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        tx.execute_batch(
            "DELETE FROM members;
             DELETE FROM messages;
             DELETE FROM announcements;
             DELETE FROM check_ins;
             DELETE FROM emergency;",
        )?;

        for member in &snapshot.members {
            write_member(&tx, member)?;
        }
        for message in &snapshot.messages {
            write_message(&tx, message)?;
        }
        for announcement in &snapshot.announcements {
            let dismissed = snapshot.dismissed_announcements.contains(&announcement.id);
            write_announcement(&tx, announcement, dismissed)?;
        }
        for record in &snapshot.check_ins {
            write_check_in(&tx, record)?;
        }
        if let Some(emergency) = &snapshot.active_emergency {
            tx.execute(
                "INSERT INTO emergency (slot, emergency) VALUES (1, ?1)",
                params![serde_json::to_string(emergency)?],
            )?;
        }
        write_setting(&tx, LOCAL_KEY, &serde_json::to_string(&snapshot.local)?)?;
        write_setting(&tx, TAKEN_AT_KEY, &snapshot.taken_at.to_rfc3339())?;
        write_setting(&tx, INTERVAL_KEY, &snapshot.check_in_interval_secs.to_string())?;

        tx.commit()?;
        debug!(
            members = snapshot.members.len(),
            messages = snapshot.messages.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Load the last saved snapshot, or `None` on a fresh database.
    pub fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        let conn = self.conn();
        let Some(local_json) = read_setting(conn, LOCAL_KEY)? else {
            return Ok(None);
        };
        let local: SenderInfo = serde_json::from_str(&local_json)?;
        let taken_at = match read_setting(conn, TAKEN_AT_KEY)? {
            Some(ts) => parse_ts(0, &ts)?,
            None => return Err(StoreError::Invalid(format!("missing {TAKEN_AT_KEY}"))),
        };
        let check_in_interval_secs = read_interval(conn)?
            .ok_or_else(|| StoreError::Invalid("missing check-in interval".into()))?;

        let (announcements, dismissed_announcements) = read_announcements(conn)?.into_iter().fold(
            (Vec::new(), Vec::new()),
            |(mut all, mut dismissed), (announcement, is_dismissed)| {
                if is_dismissed {
                    dismissed.push(announcement.id);
                }
                all.push(announcement);
                (all, dismissed)
            },
        );

        let active_emergency = {
            let mut stmt = conn.prepare("SELECT emergency FROM emergency WHERE slot = 1")?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => {
                    let json: String = row.get(0)?;
                    Some(serde_json::from_str::<Emergency>(&json)?)
                }
                None => None,
            }
        };

        let snapshot = Snapshot {
            taken_at,
            local,
            members: read_members(conn)?,
            messages: read_messages(conn)?,
            announcements,
            dismissed_announcements,
            check_ins: read_check_ins(conn)?,
            check_in_interval_secs,
            active_emergency,
        };
        info!(
            members = snapshot.members.len(),
            messages = snapshot.messages.len(),
            taken_at = %snapshot.taken_at,
            "snapshot loaded"
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use campmesh_shared::{
        Announcement, AnnouncementPriority, CheckInRecord, Conversation, DeliveryStatus,
        EmergencyKind, Member, MemberId, Message, MessageBody, MessageId, Role,
    };
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn sample() -> Snapshot {
        let at = Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap();
        let local = SenderInfo::new("me", "Me", Role::Lead);
        let sos_id = MessageId::new();
        let announcement = Announcement {
            id: Uuid::new_v4(),
            title: "Exodus".into(),
            message: "Gate opens at 6".into(),
            priority: AnnouncementPriority::Normal,
            from: local.id.clone(),
            from_name: local.name.clone(),
            created_at: at,
            expires_at: None,
            read_by: BTreeSet::new(),
        };
        let mut bob = Member::new(MemberId::new("bob"), "Bob".into(), Role::Bus, at);
        bob.last_seen = Some(at);
        Snapshot {
            taken_at: at,
            local: local.clone(),
            members: vec![bob, Member::new(local.id.clone(), "Me".into(), Role::Lead, at)],
            messages: vec![Message {
                id: sos_id,
                from: MemberId::new("bob"),
                from_name: "Bob".into(),
                conversation: Conversation::Camp,
                content: "SOS".into(),
                body: MessageBody::Emergency {
                    kind: EmergencyKind::Sos,
                    location: None,
                },
                timestamp: at,
                sequence: 1,
                delivery_status: DeliveryStatus::Delivered,
                attempts: 0,
            }],
            announcements: vec![announcement.clone()],
            dismissed_announcements: vec![announcement.id],
            check_ins: vec![CheckInRecord {
                member: MemberId::new("bob"),
                last_check_in: at - Duration::hours(1),
            }],
            check_in_interval_secs: 8 * 3600,
            active_emergency: Some(Emergency {
                id: sos_id,
                originator_id: MemberId::new("bob"),
                originator_name: "Bob".into(),
                timestamp: at,
                kind: EmergencyKind::Sos,
                location: None,
            }),
        }
    }

    #[test]
    fn fresh_database_has_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("snap.db")).unwrap();
        assert!(db.load_snapshot().unwrap().is_none());
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.db");
        let snapshot = sample();
        {
            let mut db = Database::open_at(&path).unwrap();
            db.save_snapshot(&snapshot).unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        let loaded = db.load_snapshot().unwrap().unwrap();

        assert_eq!(loaded.local, snapshot.local);
        assert_eq!(loaded.messages, snapshot.messages);
        assert_eq!(loaded.announcements, snapshot.announcements);
        assert_eq!(loaded.dismissed_announcements, snapshot.dismissed_announcements);
        assert_eq!(loaded.check_ins, snapshot.check_ins);
        assert_eq!(loaded.check_in_interval_secs, 8 * 3600);
        assert_eq!(loaded.active_emergency, snapshot.active_emergency);
        assert_eq!(loaded.members.len(), 2);
    }

    #[test]
    fn save_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("snap.db")).unwrap();
        let mut snapshot = sample();
        db.save_snapshot(&snapshot).unwrap();

        snapshot.messages.clear();
        snapshot.active_emergency = None;
        db.save_snapshot(&snapshot).unwrap();

        let loaded = db.load_snapshot().unwrap().unwrap();
        assert!(loaded.messages.is_empty());
        assert!(loaded.active_emergency.is_none());
    }
}
