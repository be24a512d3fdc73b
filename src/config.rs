//! Tunables for the handshake, the presence loops and the round rules.
//!
//! | Config | Purpose | Presets |
//! |--------|---------|---------|
//! | [`HandshakeConfig`] | Seed exchange and input exchange | `lan()`, `lossy()` |
//! | [`PresenceConfig`] | Heartbeat publish / liveness polling | `lenient()` |
//! | [`RoundRules`] | Signal timing and lives | - |
//!
//! All three follow the same shape: public fields, `Default`, `new()`,
//! presets, and `validate()`. Construct with struct-update syntax so new
//! fields don't break callers:
//!
//! ```
//! use quickdraw_sync::HandshakeConfig;
//! use web_time::Duration;
//!
//! let config = HandshakeConfig {
//!     handshake_timeout: Duration::from_secs(10),
//!     ..HandshakeConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use web_time::Duration;

use crate::QuickdrawError;

fn out_of_range(field: &'static str, reason: impl Into<String>) -> QuickdrawError {
    QuickdrawError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

/// Seed exchange and input exchange settings for a [`PeerLink`](crate::PeerLink).
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "HandshakeConfig has no effect unless passed to PeerLink::new()"]
pub struct HandshakeConfig {
    /// Channel name both peers bind to.
    ///
    /// Default: `"GAME"`
    pub channel_name: String,

    /// Deadline for the seed exchange, measured once from `start_connect`.
    /// Progress does not extend it.
    ///
    /// Default: 6000ms
    pub handshake_timeout: Duration,

    /// How often the initiator resends its `Seed` until acknowledged.
    ///
    /// Default: 3s
    pub seed_retry_interval: Duration,

    /// Maximum datagrams drained per `receive_pump` call.
    ///
    /// Default: 8
    pub receive_batch: usize,

    /// Slots per input ring. Must be a non-zero power of two.
    ///
    /// Default: 128
    pub ring_capacity: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            channel_name: "GAME".to_owned(),
            handshake_timeout: Duration::from_millis(6000),
            seed_retry_interval: Duration::from_secs(3),
            receive_batch: 8,
            ring_capacity: 128,
        }
    }
}

impl HandshakeConfig {
    /// Same as `default()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Local network play: retry quickly, give up quickly.
    pub fn lan() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(3),
            seed_retry_interval: Duration::from_millis(250),
            ..Self::default()
        }
    }

    /// Lossy links: frequent seed retries, a longer deadline and a bigger
    /// receive batch to catch up after bursts.
    pub fn lossy() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(12),
            seed_retry_interval: Duration::from_millis(500),
            receive_batch: 16,
            ..Self::default()
        }
    }

    /// Checks every field.
    pub fn validate(&self) -> Result<(), QuickdrawError> {
        if self.channel_name.is_empty() {
            return Err(out_of_range("channel_name", "must not be empty"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(out_of_range("handshake_timeout", "must be greater than zero"));
        }
        if self.seed_retry_interval.is_zero() {
            return Err(out_of_range(
                "seed_retry_interval",
                "must be greater than zero",
            ));
        }
        if self.receive_batch == 0 || self.receive_batch > 1024 {
            return Err(out_of_range(
                "receive_batch",
                format!("must be in 1..=1024, got {}", self.receive_batch),
            ));
        }
        if !self.ring_capacity.is_power_of_two() {
            return Err(out_of_range(
                "ring_capacity",
                format!("must be a non-zero power of two, got {}", self.ring_capacity),
            ));
        }
        Ok(())
    }
}

/// Heartbeat and liveness settings for the presence tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PresenceConfig has no effect unless passed to a PresenceTracker"]
pub struct PresenceConfig {
    /// How often the local heartbeat attribute is written.
    ///
    /// Default: 1s
    pub heartbeat_interval: Duration,

    /// How often peers' heartbeats are checked for staleness.
    ///
    /// Default: 1s
    pub liveness_interval: Duration,

    /// A peer is dead once `now - last_heartbeat >= dead_threshold_secs`.
    ///
    /// Default: 5
    pub dead_threshold_secs: i64,

    /// How often [`PresenceService`](crate::PresenceService) re-reads the member
    /// list. `None` leaves membership updates to the caller.
    ///
    /// Default: `Some(2s)`
    pub membership_poll_interval: Option<Duration>,

    /// Member attribute holding the heartbeat timestamp.
    ///
    /// Default: `"HB"`
    pub heartbeat_key: String,

    /// Member attribute holding the ready flag (`"1"` / `"0"`).
    ///
    /// Default: `"READY"`
    pub ready_key: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            liveness_interval: Duration::from_secs(1),
            dead_threshold_secs: 5,
            membership_poll_interval: Some(Duration::from_secs(2)),
            heartbeat_key: "HB".to_owned(),
            ready_key: "READY".to_owned(),
        }
    }
}

impl PresenceConfig {
    /// Same as `default()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tolerates slower attribute propagation before declaring a peer dead.
    pub fn lenient() -> Self {
        Self {
            dead_threshold_secs: 8,
            ..Self::default()
        }
    }

    /// Checks every field.
    pub fn validate(&self) -> Result<(), QuickdrawError> {
        if self.heartbeat_interval.is_zero() {
            return Err(out_of_range("heartbeat_interval", "must be greater than zero"));
        }
        if self.liveness_interval.is_zero() {
            return Err(out_of_range("liveness_interval", "must be greater than zero"));
        }
        if self.dead_threshold_secs < 1 {
            return Err(out_of_range(
                "dead_threshold_secs",
                format!("must be at least 1, got {}", self.dead_threshold_secs),
            ));
        }
        if matches!(self.membership_poll_interval, Some(d) if d.is_zero()) {
            return Err(out_of_range(
                "membership_poll_interval",
                "must be greater than zero when set",
            ));
        }
        if self.heartbeat_key.is_empty() || self.ready_key.is_empty() {
            return Err(out_of_range("heartbeat_key", "attribute keys must not be empty"));
        }
        if self.heartbeat_key == self.ready_key {
            return Err(out_of_range(
                "ready_key",
                "must differ from heartbeat_key",
            ));
        }
        Ok(())
    }
}

/// Timing and scoring rules for a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "RoundRules has no effect unless passed to a MatchEngine"]
pub struct RoundRules {
    /// Earliest frame the signal can fire on.
    ///
    /// Default: 120
    pub min_signal_frame: i32,

    /// The signal fires at `min_signal_frame + offset`, offset drawn from
    /// `0..signal_offset_range`.
    ///
    /// Default: 180
    pub signal_offset_range: u32,

    /// Frames after the signal until the round times out.
    ///
    /// Default: 90
    pub after_signal_duration: i32,

    /// Lives each side starts a match with.
    ///
    /// Default: 3
    pub max_lives: u8,

    /// Frames to keep exchanging input after the first press before settling.
    ///
    /// Default: 30
    pub settle_frames: i32,
}

impl Default for RoundRules {
    fn default() -> Self {
        Self {
            min_signal_frame: 120,
            signal_offset_range: 180,
            after_signal_duration: 90,
            max_lives: 3,
            settle_frames: 30,
        }
    }
}

impl RoundRules {
    /// Same as `default()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every field.
    pub fn validate(&self) -> Result<(), QuickdrawError> {
        if self.min_signal_frame < 0 {
            return Err(out_of_range("min_signal_frame", "must not be negative"));
        }
        if self.signal_offset_range == 0 {
            return Err(out_of_range("signal_offset_range", "must be at least 1"));
        }
        if self.after_signal_duration < 1 {
            return Err(out_of_range(
                "after_signal_duration",
                "must be at least 1",
            ));
        }
        if self.max_lives == 0 {
            return Err(out_of_range("max_lives", "must be at least 1"));
        }
        if self.settle_frames < 0 {
            return Err(out_of_range("settle_frames", "must not be negative"));
        }
        let latest = i64::from(self.min_signal_frame)
            + i64::from(self.signal_offset_range)
            + i64::from(self.after_signal_duration);
        if latest > i64::from(i32::MAX) {
            return Err(out_of_range(
                "signal_offset_range",
                "latest time-up frame overflows i32",
            ));
        }
        Ok(())
    }
}
