//! Member presence tracking.
//!
//! Maintains the member registry: identity, role, last radio activity,
//! link quality, location and shift reference. Connection status is never
//! stored; it is computed from `last_seen` and the current time on every read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use campmesh_shared::{ConnectionStatus, Coordinate, Member, MemberId, Role, SenderInfo};

use crate::config::PresenceWindows;
use crate::error::{EngineError, Result};

/// Map `last_seen` to a connection status at `now`.
///
/// Members heard "in the future" (clock skew between devices) count as
/// connected.
pub fn connection_status(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    windows: &PresenceWindows,
) -> ConnectionStatus {
    let Some(seen) = last_seen else {
        return ConnectionStatus::Offline;
    };
    let age = now - seen;
    if age <= windows.connected {
        ConnectionStatus::Connected
    } else if age <= windows.recent {
        ConnectionStatus::Recent
    } else {
        ConnectionStatus::Offline
    }
}

/// Link report from the transport driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTelemetry {
    pub peer: MemberId,
    pub last_heard_at: DateTime<Utc>,
    /// 0-100
    pub signal_quality: u8,
}

/// A member together with its status at read time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    #[serde(flatten)]
    pub member: Member,
    pub connection_status: ConnectionStatus,
    pub is_online: bool,
}

/// The member registry.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    members: HashMap<MemberId, Member>,
    windows: PresenceWindows,
}

impl PresenceTracker {
    pub fn new(windows: PresenceWindows) -> Self {
        Self {
            members: HashMap::new(),
            windows,
        }
    }

    /// Register a member by hand (QR exchange, roster import).
    ///
    /// Returns `true` if the member was not known before. Re-adding a known
    /// member refreshes its name and role and reactivates it, but does not
    /// touch `last_seen`: only radio activity does that. The role is pinned:
    /// later frames from the member cannot change it.
    pub fn add_member(&mut self, id: MemberId, name: String, role: Role, now: DateTime<Utc>) -> bool {
        match self.members.get_mut(&id) {
            Some(existing) => {
                existing.name = name;
                existing.role = role;
                existing.role_pinned = true;
                existing.active = true;
                false
            }
            None => {
                debug!(member = %id, role = %role, "Member added");
                let mut member = Member::new(id.clone(), name, role, now);
                member.role_pinned = true;
                self.members.insert(id, member);
                true
            }
        }
    }

    /// Record a frame authored by `sender` and heard at `at`.
    ///
    /// Creates the member on first contact. Returns `true` if it was new.
    pub fn observe_sender(&mut self, sender: &SenderInfo, at: DateTime<Utc>) -> bool {
        let created = !self.members.contains_key(&sender.id);
        let member = self
            .members
            .entry(sender.id.clone())
            .or_insert_with(|| Member::new(sender.id.clone(), sender.name.clone(), sender.role, at));
        member.name = sender.name.clone();
        if !member.role_pinned {
            member.role = sender.role;
        } else if member.role != sender.role {
            debug!(member = %sender.id, claimed = %sender.role, registered = %member.role, "Ignoring claimed role");
        }
        member.active = true;
        bump(&mut member.last_seen, at);
        if created {
            debug!(member = %sender.id, name = %sender.name, "First contact");
        }
        created
    }

    /// Record bare radio activity from `peer` (e.g. a relayed hop or an ack).
    ///
    /// Returns `true` if the peer was unknown and a placeholder was created.
    pub fn record_activity(&mut self, peer: &MemberId, at: DateTime<Utc>) -> bool {
        let created = !self.members.contains_key(peer);
        let member = self
            .members
            .entry(peer.clone())
            .or_insert_with(|| placeholder(peer, at));
        bump(&mut member.last_seen, at);
        created
    }

    /// Apply a telemetry report. Returns `true` if the peer was new.
    pub fn record_telemetry(&mut self, telemetry: &LinkTelemetry) -> bool {
        let created = self.record_activity(&telemetry.peer, telemetry.last_heard_at);
        if let Some(member) = self.members.get_mut(&telemetry.peer) {
            member.signal_quality = Some(telemetry.signal_quality.min(100));
        }
        created
    }

    pub fn update_location(&mut self, id: &MemberId, location: Coordinate) -> Result<()> {
        let member = self.get_mut(id)?;
        let newer = member
            .last_known_location
            .map_or(true, |prev| prev.recorded_at <= location.recorded_at);
        if newer {
            member.last_known_location = Some(location);
        }
        Ok(())
    }

    pub fn update_shift(&mut self, id: &MemberId, shift_ref: Option<String>) -> Result<()> {
        self.get_mut(id)?.current_shift = shift_ref;
        Ok(())
    }

    /// Members are never hard-deleted; history may still reference them.
    pub fn mark_inactive(&mut self, id: &MemberId) -> Result<()> {
        self.get_mut(id)?.active = false;
        debug!(member = %id, "Member marked inactive");
        Ok(())
    }

    pub fn status(&self, id: &MemberId, now: DateTime<Utc>) -> Option<ConnectionStatus> {
        self.members
            .get(id)
            .map(|m| connection_status(m.last_seen, now, &self.windows))
    }

    pub fn is_online(&self, id: &MemberId, now: DateTime<Utc>) -> bool {
        self.status(id, now) == Some(ConnectionStatus::Connected)
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn is_active(&self, id: &MemberId) -> bool {
        self.members.get(id).map_or(false, |m| m.active)
    }

    pub fn view(&self, id: &MemberId, now: DateTime<Utc>) -> Option<MemberView> {
        self.members.get(id).map(|m| self.to_view(m, now))
    }

    /// All members sorted by name.
    pub fn views(&self, now: DateTime<Utc>) -> Vec<MemberView> {
        let mut views: Vec<MemberView> = self.members.values().map(|m| self.to_view(m, now)).collect();
        views.sort_by(|a, b| a.member.name.cmp(&b.member.name).then(a.member.id.cmp(&b.member.id)));
        views
    }

    pub fn online_members(&self, now: DateTime<Utc>) -> Vec<MemberId> {
        let mut ids: Vec<MemberId> = self
            .members
            .values()
            .filter(|m| m.active && connection_status(m.last_seen, now, &self.windows) == ConnectionStatus::Connected)
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Status of every active member at `now`.
    pub fn statuses(&self, now: DateTime<Utc>) -> Vec<(MemberId, ConnectionStatus)> {
        self.members
            .values()
            .filter(|m| m.active)
            .map(|m| (m.id.clone(), connection_status(m.last_seen, now, &self.windows)))
            .collect()
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn restore(&mut self, members: Vec<Member>) {
        for member in members {
            self.members.insert(member.id.clone(), member);
        }
    }

    fn to_view(&self, member: &Member, now: DateTime<Utc>) -> MemberView {
        let status = connection_status(member.last_seen, now, &self.windows);
        MemberView {
            member: member.clone(),
            connection_status: status,
            is_online: status == ConnectionStatus::Connected,
        }
    }

    fn get_mut(&mut self, id: &MemberId) -> Result<&mut Member> {
        self.members
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownMember(id.clone()))
    }
}

/// `last_seen` only moves forward.
fn bump(last_seen: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) {
    if last_seen.map_or(true, |prev| prev < at) {
        *last_seen = Some(at);
    }
}

fn placeholder(peer: &MemberId, at: DateTime<Utc>) -> Member {
    Member::new(peer.clone(), peer.short().to_string(), Role::General, at)
}
