/// Maximum encoded frame size in bytes. The radio link is low-bandwidth.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Sentinel sender id used for rendering outbound-from-me messages
pub const SELF_SENTINEL: &str = "self";

/// Presence windows in seconds
pub const CONNECTED_WINDOW_SECS: i64 = 5 * 60;
pub const RECENT_WINDOW_SECS: i64 = 30 * 60;

/// Check-in intervals selectable by the camp, in hours
pub const CHECK_IN_INTERVAL_OPTIONS_HOURS: [u64; 4] = [1, 4, 8, 12];

/// Default check-in interval in hours
pub const DEFAULT_CHECK_IN_INTERVAL_HOURS: u64 = 4;

/// Countdown fractions at which the local member is reminded to check in
pub const CHECK_IN_REMINDER_THRESHOLDS: [f64; 2] = [0.75, 1.0];

/// Default UDP port of the reference node
pub const DEFAULT_UDP_PORT: u16 = 47_100;

/// Largest forward jump an inbound frame may make over the highest sequence
/// seen in its conversation. Frames beyond it are refused.
pub const MAX_SEQUENCE_JUMP: u64 = 1 << 32;
