//! Check-in deadlines.
//!
//! One timestamp per member plus a single camp-wide interval. Overdue state
//! is never stored: it is recomputed from the timestamps every time it is
//! asked for, so an interval change takes effect on the very next read.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use campmesh_shared::constants::{
    CHECK_IN_INTERVAL_OPTIONS_HOURS, DEFAULT_CHECK_IN_INTERVAL_HOURS,
};
use campmesh_shared::{CheckInRecord, MemberId};

use crate::error::{EngineError, Result};

const SECS_PER_HOUR: u64 = 3600;

/// A check-in interval from the fixed set of options (1h, 4h, 8h, 12h).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInInterval(Duration);

impl CheckInInterval {
    pub fn from_duration(duration: Duration) -> Result<Self> {
        let secs = duration.as_secs();
        let valid = duration.subsec_nanos() == 0
            && secs % SECS_PER_HOUR == 0
            && CHECK_IN_INTERVAL_OPTIONS_HOURS.contains(&(secs / SECS_PER_HOUR));
        if valid {
            Ok(Self(duration))
        } else {
            Err(EngineError::InvalidInterval(duration))
        }
    }

    pub fn from_hours(hours: u64) -> Result<Self> {
        Self::from_duration(Duration::from_secs(hours.saturating_mul(SECS_PER_HOUR)))
    }

    pub fn hours(&self) -> u64 {
        self.0.as_secs() / SECS_PER_HOUR
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.0.as_secs() as i64)
    }
}

impl Default for CheckInInterval {
    fn default() -> Self {
        Self(Duration::from_secs(DEFAULT_CHECK_IN_INTERVAL_HOURS * SECS_PER_HOUR))
    }
}

#[derive(Debug)]
pub struct CheckInScheduler {
    local: MemberId,
    interval: CheckInInterval,
    /// Countdown fractions at which the local member is reminded.
    thresholds: Vec<f64>,
    last_check_in: HashMap<MemberId, DateTime<Utc>>,
    /// Reminder percentages already fired in the current local countdown.
    fired: BTreeSet<u8>,
    /// Members already reported overdue since their last check-in.
    overdue_notified: HashSet<MemberId>,
}

impl CheckInScheduler {
    pub fn new(local: MemberId, interval: CheckInInterval, thresholds: Vec<f64>) -> Self {
        Self {
            local,
            interval,
            thresholds,
            last_check_in: HashMap::new(),
            fired: BTreeSet::new(),
            overdue_notified: HashSet::new(),
        }
    }

    pub fn interval(&self) -> CheckInInterval {
        self.interval
    }

    /// Record a check-in. Older check-ins than the one on file are ignored.
    ///
    /// Returns `true` if the record moved.
    pub fn check_in(&mut self, member: &MemberId, at: DateTime<Utc>) -> bool {
        if self.last_check_in.get(member).map_or(false, |prev| *prev >= at) {
            return false;
        }
        self.last_check_in.insert(member.clone(), at);
        self.overdue_notified.remove(member);
        if member == &self.local {
            self.fired.clear();
        }
        debug!(member = %member, at = %at, "Check-in recorded");
        true
    }

    /// Start a countdown for a member never seen checking in.
    pub fn ensure_baseline(&mut self, member: &MemberId, at: DateTime<Utc>) {
        self.last_check_in.entry(member.clone()).or_insert(at);
    }

    /// Applies to every later computation; past check-ins are untouched.
    pub fn set_interval(&mut self, interval: CheckInInterval) {
        if interval == self.interval {
            return;
        }
        info!(
            from_hours = self.interval.hours(),
            to_hours = interval.hours(),
            "Check-in interval changed"
        );
        self.interval = interval;
        self.fired.clear();
        self.overdue_notified.clear();
    }

    pub fn last_check_in(&self, member: &MemberId) -> Option<DateTime<Utc>> {
        self.last_check_in.get(member).copied()
    }

    /// `None` for unknown members and for check-ins too close to the end of
    /// representable time to carry a deadline.
    pub fn next_due(&self, member: &MemberId) -> Option<DateTime<Utc>> {
        self.last_check_in
            .get(member)
            .and_then(|last| last.checked_add_signed(self.interval.as_chrono()))
    }

    pub fn is_overdue(&self, member: &MemberId, now: DateTime<Utc>) -> bool {
        self.next_due(member).map_or(false, |due| now > due)
    }

    /// Time left before `member` becomes overdue, zero once past due.
    pub fn time_remaining(&self, member: &MemberId, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.next_due(member)
            .map(|due| (due - now).max(chrono::Duration::zero()))
    }

    pub fn overdue_members(&self, now: DateTime<Utc>) -> Vec<MemberId> {
        let mut overdue: Vec<MemberId> = self
            .last_check_in
            .keys()
            .filter(|m| self.is_overdue(m, now))
            .cloned()
            .collect();
        overdue.sort();
        overdue
    }

    /// Members that became overdue since the last sweep.
    pub fn newly_overdue(&mut self, now: DateTime<Utc>) -> Vec<MemberId> {
        let overdue = self.overdue_members(now);
        self.overdue_notified.retain(|m| overdue.contains(m));
        overdue
            .into_iter()
            .filter(|m| self.overdue_notified.insert(m.clone()))
            .collect()
    }

    /// Reminder thresholds the local countdown crossed since the last call,
    /// as whole percentages.
    pub fn due_reminders(&mut self, now: DateTime<Utc>) -> Vec<u8> {
        let Some(last) = self.last_check_in.get(&self.local).copied() else {
            return Vec::new();
        };
        let total = self.interval.as_chrono().num_milliseconds() as f64;
        if total <= 0.0 {
            return Vec::new();
        }
        let elapsed = (now - last).num_milliseconds() as f64 / total;

        let mut due = Vec::new();
        for threshold in &self.thresholds {
            let percent = (threshold * 100.0).round().clamp(0.0, 255.0) as u8;
            if elapsed >= *threshold && self.fired.insert(percent) {
                due.push(percent);
            }
        }
        due.sort_unstable();
        due
    }

    pub fn records(&self) -> Vec<CheckInRecord> {
        let mut records: Vec<CheckInRecord> = self
            .last_check_in
            .iter()
            .map(|(member, at)| CheckInRecord {
                member: member.clone(),
                last_check_in: *at,
            })
            .collect();
        records.sort_by(|a, b| a.member.cmp(&b.member));
        records
    }

    pub fn restore(&mut self, records: Vec<CheckInRecord>) {
        for record in records {
            self.check_in(&record.member, record.last_check_in);
        }
    }
}
