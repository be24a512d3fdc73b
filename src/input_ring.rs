//! Fixed-size per-frame input history for one side of a link.
//!
//! A record for frame `f` lives in slot `f & (capacity - 1)`. Storing a later
//! frame that maps to the same slot overwrites the older one; a lookup only
//! succeeds when the slot still holds the requested frame.

use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::{Frame, QuickdrawError};

/// Default number of slots per ring; about two seconds at 60 Hz.
pub const DEFAULT_RING_CAPACITY: usize = 128;

/// One frame of button state as sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputRecord {
    /// Frame this record belongs to.
    pub frame: Frame,
    /// Latest remote frame the sender had seen when it produced this record.
    pub last_acknowledged_remote_frame: Frame,
    /// Whether this frame carries the (single) press.
    pub pressed: bool,
}

impl InputRecord {
    const EMPTY: Self = Self {
        frame: Frame::NULL,
        last_acknowledged_remote_frame: Frame::NULL,
        pressed: false,
    };
}

/// Power-of-two ring of [`InputRecord`]s.
#[derive(Debug, Clone)]
pub struct InputRing {
    slots: Vec<InputRecord>,
    mask: usize,
}

impl Default for InputRing {
    fn default() -> Self {
        Self {
            slots: vec![InputRecord::EMPTY; DEFAULT_RING_CAPACITY],
            mask: DEFAULT_RING_CAPACITY - 1,
        }
    }
}

impl InputRing {
    /// A ring with [`DEFAULT_RING_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A ring with `capacity` slots. `capacity` must be a non-zero power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self, QuickdrawError> {
        if !capacity.is_power_of_two() {
            return Err(QuickdrawError::InvalidConfig {
                field: "ring_capacity",
                reason: format!("must be a non-zero power of two, got {capacity}"),
            });
        }
        Ok(Self {
            slots: vec![InputRecord::EMPTY; capacity],
            mask: capacity - 1,
        })
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, frame: Frame) -> usize {
        (frame.as_i32() as usize) & self.mask
    }

    /// Writes a record, overwriting whatever shared its slot.
    ///
    /// Negative frames are rejected and reported; returns whether the record
    /// was stored.
    pub fn store(
        &mut self,
        frame: Frame,
        last_acknowledged_remote_frame: Frame,
        pressed: bool,
    ) -> bool {
        if !frame.is_valid() {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::InputRing,
                "refusing to store input for negative frame {}",
                frame
            );
            return false;
        }
        let idx = self.slot(frame);
        if let Some(slot) = self.slots.get_mut(idx) {
            *slot = InputRecord {
                frame,
                last_acknowledged_remote_frame,
                pressed,
            };
            true
        } else {
            false
        }
    }

    /// The record for `frame`, if its slot has not been overwritten since.
    #[must_use]
    pub fn try_get(&self, frame: Frame) -> Option<InputRecord> {
        if !frame.is_valid() {
            return None;
        }
        self.slots
            .get(self.slot(frame))
            .copied()
            .filter(|record| record.frame == frame)
    }

    /// Empties every slot.
    pub fn clear(&mut self) {
        self.slots.fill(InputRecord::EMPTY);
    }
}

/// First frame a side pressed on, [`Frame::NULL`] until then.
///
/// Once set it never changes until [`reset`](Self::reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PressedFrame(Option<Frame>);

impl PressedFrame {
    /// Records `frame` if nothing was recorded yet. Returns `true` if this call set it.
    pub fn record(&mut self, frame: Frame) -> bool {
        if self.0.is_some() || !frame.is_valid() {
            return false;
        }
        self.0 = Some(frame);
        true
    }

    /// The recorded frame, or [`Frame::NULL`].
    #[must_use]
    pub fn get(&self) -> Frame {
        self.0.unwrap_or(Frame::NULL)
    }

    /// `true` once a press was recorded.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Forgets the press.
    pub fn reset(&mut self) {
        self.0 = None;
    }
}

/// Local and remote rings plus both press trackers, owned by one link.
#[derive(Debug, Clone, Default)]
pub struct InputHistory {
    /// Records this side sent.
    pub local: InputRing,
    /// Records received from the peer.
    pub remote: InputRing,
    /// First local press.
    pub local_pressed: PressedFrame,
    /// First remote press.
    pub remote_pressed: PressedFrame,
}

impl InputHistory {
    /// Both rings with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Result<Self, QuickdrawError> {
        Ok(Self {
            local: InputRing::with_capacity(capacity)?,
            remote: InputRing::with_capacity(capacity)?,
            local_pressed: PressedFrame::default(),
            remote_pressed: PressedFrame::default(),
        })
    }

    /// Clears both rings and both press trackers.
    pub fn clear(&mut self) {
        self.local.clear();
        self.remote.clear();
        self.local_pressed.reset();
        self.remote_pressed.reset();
    }
}
