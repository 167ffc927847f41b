//! Engine configuration.
//!
//! All settings have sensible defaults; only the local identity must be
//! supplied.

use std::time::Duration;

use campmesh_shared::constants::{
    CHECK_IN_REMINDER_THRESHOLDS, CONNECTED_WINDOW_SECS, RECENT_WINDOW_SECS,
};
use campmesh_shared::SenderInfo;

use crate::checkin::CheckInInterval;

/// Freshness windows for the presence state machine.
#[derive(Debug, Clone, Copy)]
pub struct PresenceWindows {
    /// Heard within this window => `connected`.
    pub connected: chrono::Duration,
    /// Heard within this window => `recent`; older => `offline`.
    pub recent: chrono::Duration,
}

impl Default for PresenceWindows {
    fn default() -> Self {
        Self {
            connected: chrono::Duration::seconds(CONNECTED_WINDOW_SECS),
            recent: chrono::Duration::seconds(RECENT_WINDOW_SECS),
        }
    }
}

/// Retry and timeout policy for outbound messages.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    /// Attempt ceiling for ordinary messages. Emergencies ignore it.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub initial_backoff: Duration,
    /// Backoff ceiling for ordinary messages.
    pub max_backoff: Duration,
    /// Backoff ceiling for emergencies, which retry forever.
    pub emergency_max_backoff: Duration,
    /// How long a `sent` message waits for an acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            emergency_max_backoff: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

impl DeliveryPolicy {
    /// Delay before retrying after `failures` consecutive failed attempts.
    pub fn backoff(&self, failures: u32, unbounded: bool) -> Duration {
        let ceiling = if unbounded {
            self.emergency_max_backoff
        } else {
            self.max_backoff
        };
        let exp = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(ceiling)
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Who this device speaks for.
    pub local: SenderInfo,
    pub presence: PresenceWindows,
    pub delivery: DeliveryPolicy,
    /// Initial process-wide check-in interval.
    pub check_in_interval: CheckInInterval,
    /// Countdown fractions that trigger a local reminder.
    pub reminder_thresholds: Vec<f64>,
    /// Period of the presence / overdue / expiry sweep.
    pub tick_interval: Duration,
    /// In-flight outbound messages before the overflow policy kicks in.
    pub outbox_capacity: usize,
}

impl EngineConfig {
    pub fn new(local: SenderInfo) -> Self {
        Self {
            local,
            presence: PresenceWindows::default(),
            delivery: DeliveryPolicy::default(),
            check_in_interval: CheckInInterval::default(),
            reminder_thresholds: CHECK_IN_REMINDER_THRESHOLDS.to_vec(),
            tick_interval: Duration::from_secs(15),
            outbox_capacity: 256,
        }
    }
}
