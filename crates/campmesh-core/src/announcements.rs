//! Announcement board: priority-tagged notices with expiry, per-reader
//! acknowledgement and a locally dismissable banner.
//!
//! Dismissing and reading are independent: dismissing only hides the banner,
//! reading records an acknowledgement that is shared with the camp.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use campmesh_shared::{Announcement, MemberId};

use crate::error::{EngineError, Result};

#[derive(Debug)]
pub struct AnnouncementBoard {
    local: MemberId,
    items: HashMap<Uuid, Announcement>,
    dismissed: HashSet<Uuid>,
    expired_notified: HashSet<Uuid>,
}

impl AnnouncementBoard {
    pub fn new(local: MemberId) -> Self {
        Self {
            local,
            items: HashMap::new(),
            dismissed: HashSet::new(),
            expired_notified: HashSet::new(),
        }
    }

    /// Store an announcement. A repeat only contributes its readers.
    ///
    /// Returns `true` if the announcement was new.
    pub fn insert(&mut self, announcement: Announcement) -> bool {
        match self.items.get_mut(&announcement.id) {
            Some(existing) => {
                existing.read_by.extend(announcement.read_by);
                false
            }
            None => {
                debug!(id = %announcement.id, priority = ?announcement.priority, "Announcement stored");
                self.items.insert(announcement.id, announcement);
                true
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&Announcement> {
        self.items.get(id)
    }

    /// Record that the local member read `id`. Idempotent.
    ///
    /// Returns `true` if this changed anything.
    pub fn mark_as_read(&mut self, id: &Uuid) -> Result<bool> {
        let item = self
            .items
            .get_mut(id)
            .ok_or(EngineError::UnknownAnnouncement(*id))?;
        Ok(item.read_by.insert(self.local.clone()))
    }

    /// Mark every active announcement read. Returns the ids that changed.
    pub fn mark_all_as_read(&mut self, now: DateTime<Utc>) -> BTreeSet<Uuid> {
        let local = self.local.clone();
        self.items
            .values_mut()
            .filter(|a| !a.is_expired(now))
            .filter_map(|a| a.read_by.insert(local.clone()).then_some(a.id))
            .collect()
    }

    /// Merge a remote reader's acknowledgements. Unknown ids are skipped.
    pub fn apply_read_receipt(&mut self, reader: &MemberId, ids: &BTreeSet<Uuid>) -> usize {
        let mut merged = 0;
        for id in ids {
            if let Some(announcement) = self.items.get_mut(id) {
                if announcement.read_by.insert(reader.clone()) {
                    merged += 1;
                }
            }
        }
        merged
    }

    /// Unexpired announcements, newest first.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Announcement> {
        let mut active: Vec<Announcement> = self
            .items
            .values()
            .filter(|a| !a.is_expired(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        active
    }

    pub fn unread_count(&self, now: DateTime<Utc>) -> usize {
        self.items
            .values()
            .filter(|a| !a.is_expired(now) && !a.is_read_by(&self.local))
            .count()
    }

    /// The banner: newest active announcement not dismissed locally.
    pub fn latest(&self, now: DateTime<Utc>) -> Option<Announcement> {
        self.active(now)
            .into_iter()
            .find(|a| !self.dismissed.contains(&a.id))
    }

    /// Hide the current banner. Returns the id hidden, if any.
    pub fn dismiss_latest(&mut self, now: DateTime<Utc>) -> Option<Uuid> {
        let id = self.latest(now)?.id;
        self.dismissed.insert(id);
        Some(id)
    }

    /// Announcements that expired since the previous sweep.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut expired: Vec<Uuid> = self
            .items
            .values()
            .filter(|a| a.is_expired(now) && !self.expired_notified.contains(&a.id))
            .map(|a| a.id)
            .collect();
        expired.sort();
        self.expired_notified.extend(expired.iter().copied());
        expired
    }

    pub fn all(&self) -> Vec<Announcement> {
        let mut all: Vec<Announcement> = self.items.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn dismissed(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.dismissed.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn restore(&mut self, announcements: Vec<Announcement>, dismissed: Vec<Uuid>, now: DateTime<Utc>) {
        for announcement in announcements {
            if announcement.is_expired(now) {
                self.expired_notified.insert(announcement.id);
            }
            self.insert(announcement);
        }
        self.dismissed.extend(dismissed);
    }
}
