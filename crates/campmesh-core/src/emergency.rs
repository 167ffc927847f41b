//! The single active-emergency slot.
//!
//! Lifecycle: created idle, becomes active when an SOS is raised locally or
//! received, returns to idle on acknowledgement or all-clear.
//! When a second emergency arrives while one is active, the one with the
//! later timestamp occupies the slot (ties go to the lower message id).

use std::collections::HashSet;

use tracing::{info, warn};

use campmesh_shared::{Emergency, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyState {
    Idle,
    Active,
}

/// What an incoming emergency did to the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotChange {
    Activated,
    Replaced { previous: Emergency },
    Ignored,
}

#[derive(Debug, Default)]
pub struct EmergencyController {
    active: Option<Emergency>,
    /// Emergencies already acknowledged or cleared; never re-displayed.
    closed: HashSet<MessageId>,
}

impl EmergencyController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EmergencyState {
        if self.active.is_some() {
            EmergencyState::Active
        } else {
            EmergencyState::Idle
        }
    }

    pub fn active(&self) -> Option<&Emergency> {
        self.active.as_ref()
    }

    /// Show our own SOS. Always occupies the slot, whatever the transport does.
    pub fn raise_local(&mut self, emergency: Emergency) -> Option<Emergency> {
        info!(emergency = %emergency.id, "Local SOS raised");
        self.active.replace(emergency)
    }

    pub fn on_received(&mut self, emergency: Emergency) -> SlotChange {
        if self.closed.contains(&emergency.id) {
            return SlotChange::Ignored;
        }
        match self.active.take() {
            None => {
                warn!(
                    emergency = %emergency.id,
                    originator = %emergency.originator_id,
                    "Emergency active"
                );
                self.active = Some(emergency);
                SlotChange::Activated
            }
            Some(current) if current.id == emergency.id => {
                self.active = Some(current);
                SlotChange::Ignored
            }
            Some(current) => {
                let newer = emergency.timestamp > current.timestamp
                    || (emergency.timestamp == current.timestamp && emergency.id < current.id);
                if newer {
                    warn!(
                        emergency = %emergency.id,
                        displaced = %current.id,
                        "Newer emergency displaces active one"
                    );
                    self.active = Some(emergency);
                    SlotChange::Replaced { previous: current }
                } else {
                    self.active = Some(current);
                    SlotChange::Ignored
                }
            }
        }
    }

    /// Local acknowledgement. Clears the slot; the message itself stays sent.
    pub fn acknowledge(&mut self) -> Option<Emergency> {
        let cleared = self.active.take()?;
        self.closed.insert(cleared.id);
        info!(emergency = %cleared.id, "Emergency acknowledged");
        Some(cleared)
    }

    /// All-clear for `id`. Clears the slot only if that emergency is showing.
    pub fn clear(&mut self, id: &MessageId) -> Option<Emergency> {
        self.closed.insert(*id);
        if self.active.as_ref().map_or(false, |e| &e.id == id) {
            info!(emergency = %id, "Emergency cleared");
            self.active.take()
        } else {
            None
        }
    }

    pub fn restore(&mut self, active: Option<Emergency>) {
        self.active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campmesh_shared::{EmergencyKind, MemberId};
    use chrono::{DateTime, Duration, Utc};

    fn sos(from: &str, at: DateTime<Utc>) -> Emergency {
        Emergency {
            id: MessageId::new(),
            originator_id: MemberId::new(from),
            originator_name: from.to_uppercase(),
            timestamp: at,
            kind: EmergencyKind::Sos,
            location: None,
        }
    }

    #[test]
    fn test_idle_to_active_to_idle() {
        let mut ctl = EmergencyController::new();
        assert_eq!(ctl.state(), EmergencyState::Idle);
        assert_eq!(ctl.on_received(sos("a", Utc::now())), SlotChange::Activated);
        assert_eq!(ctl.state(), EmergencyState::Active);
        assert!(ctl.acknowledge().is_some());
        assert_eq!(ctl.state(), EmergencyState::Idle);
        assert!(ctl.acknowledge().is_none());
    }

    #[test]
    fn test_newest_wins_regardless_of_arrival_order() {
        let now = Utc::now();
        let older = sos("a", now);
        let newer = sos("b", now + Duration::seconds(3));

        let mut ctl = EmergencyController::new();
        ctl.on_received(older.clone());
        assert!(matches!(ctl.on_received(newer.clone()), SlotChange::Replaced { .. }));
        assert_eq!(ctl.active().unwrap().id, newer.id);

        let mut ctl = EmergencyController::new();
        ctl.on_received(newer.clone());
        assert_eq!(ctl.on_received(older), SlotChange::Ignored);
        assert_eq!(ctl.active().unwrap().id, newer.id);
    }

    #[test]
    fn test_acknowledged_emergency_does_not_return() {
        let mut ctl = EmergencyController::new();
        let e = sos("a", Utc::now());
        ctl.on_received(e.clone());
        ctl.acknowledge();
        assert_eq!(ctl.on_received(e), SlotChange::Ignored);
        assert_eq!(ctl.state(), EmergencyState::Idle);
    }

    #[test]
    fn test_all_clear_only_clears_matching() {
        let mut ctl = EmergencyController::new();
        let e = sos("a", Utc::now());
        ctl.on_received(e.clone());
        assert!(ctl.clear(&MessageId::new()).is_none());
        assert_eq!(ctl.state(), EmergencyState::Active);
        assert_eq!(ctl.clear(&e.id).unwrap().id, e.id);
    }

    #[test]
    fn test_local_sos_always_shows() {
        let mut ctl = EmergencyController::new();
        let later = sos("b", Utc::now() + Duration::minutes(1));
        ctl.on_received(later);
        let mine = sos("me", Utc::now());
        ctl.raise_local(mine.clone());
        assert_eq!(ctl.active().unwrap().id, mine.id);

        assert_eq!(ctl.acknowledge().unwrap().id, mine.id);
        assert_eq!(ctl.state(), EmergencyState::Idle);
    }
}
