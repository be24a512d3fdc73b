//! Deterministic round resolution.
//!
//! Nothing here touches the network. A round is decided from three frame
//! numbers (the signal frame and each side's first press), so the same engine
//! serves networked play, local two-player play and play against a scripted
//! opponent.
//!
//! ```
//! use quickdraw_sync::round::{resolve, RoundOutcome};
//! use quickdraw_sync::Frame;
//!
//! let signal = Frame::new(150);
//! // Pressed before the signal: a false start loses even though it was earlier.
//! assert_eq!(resolve(signal, Frame::new(140), Frame::new(160)), RoundOutcome::FlyingLocal);
//! assert_eq!(resolve(signal, Frame::new(200), Frame::new(200)), RoundOutcome::DoubleKo);
//! ```

use tracing::debug;

use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::{Frame, QuickdrawError, RoundRules};

/// How a round ended, from the local side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundOutcome {
    /// Nobody pressed before time-up.
    TimeUp,
    /// Local pressed first after the signal.
    WinLocal,
    /// Remote pressed first after the signal.
    WinRemote,
    /// Both pressed on the same frame after the signal.
    DoubleKo,
    /// Local pressed before the signal.
    FlyingLocal,
    /// Remote pressed before the signal.
    FlyingRemote,
    /// Both pressed before the signal.
    FlyingBoth,
}

impl RoundOutcome {
    /// The same outcome seen from the other side.
    #[must_use]
    pub const fn mirrored(self) -> Self {
        match self {
            Self::WinLocal => Self::WinRemote,
            Self::WinRemote => Self::WinLocal,
            Self::FlyingLocal => Self::FlyingRemote,
            Self::FlyingRemote => Self::FlyingLocal,
            other => other,
        }
    }

    /// Which sides lose a life: `(local, remote)`.
    #[must_use]
    pub const fn life_loss(self) -> (bool, bool) {
        match self {
            Self::WinLocal | Self::FlyingRemote => (false, true),
            Self::WinRemote | Self::FlyingLocal => (true, false),
            Self::TimeUp | Self::DoubleKo | Self::FlyingBoth => (true, true),
        }
    }

    /// Label for logs and UIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeUp => "TIME_UP",
            Self::WinLocal => "WIN_LOCAL",
            Self::WinRemote => "WIN_REMOTE",
            Self::DoubleKo => "DOUBLE_KO",
            Self::FlyingLocal => "FLYING_LOCAL",
            Self::FlyingRemote => "FLYING_REMOTE",
            Self::FlyingBoth => "FLYING_BOTH",
        }
    }
}

impl std::fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `true` if `pressed` is a real press that came before `signal`.
#[inline]
#[must_use]
pub fn is_flying(signal: Frame, pressed: Frame) -> bool {
    !pressed.is_null() && pressed < signal
}

/// Decides a round.
///
/// Precedence: nobody pressed, then false starts, then a single press, then
/// the earlier press (equal frames are a double KO).
#[must_use]
pub fn resolve(signal: Frame, local: Frame, remote: Frame) -> RoundOutcome {
    if local.is_null() && remote.is_null() {
        return RoundOutcome::TimeUp;
    }
    match (is_flying(signal, local), is_flying(signal, remote)) {
        (true, true) => return RoundOutcome::FlyingBoth,
        (true, false) => return RoundOutcome::FlyingLocal,
        (false, true) => return RoundOutcome::FlyingRemote,
        (false, false) => {},
    }
    if remote.is_null() {
        return RoundOutcome::WinLocal;
    }
    if local.is_null() {
        return RoundOutcome::WinRemote;
    }
    match local.cmp(&remote) {
        std::cmp::Ordering::Less => RoundOutcome::WinLocal,
        std::cmp::Ordering::Greater => RoundOutcome::WinRemote,
        std::cmp::Ordering::Equal => RoundOutcome::DoubleKo,
    }
}

/// One side's press as shown on the result screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PressReport {
    /// Never pressed.
    NotPressed,
    /// Pressed before the signal.
    FalseStart(Frame),
    /// Pressed on or after the signal.
    Pressed(Frame),
}

impl PressReport {
    /// Classifies `pressed` against `signal`.
    #[must_use]
    pub fn classify(signal: Frame, pressed: Frame) -> Self {
        if pressed.is_null() {
            Self::NotPressed
        } else if is_flying(signal, pressed) {
            Self::FalseStart(pressed)
        } else {
            Self::Pressed(pressed)
        }
    }

    /// Frames between the signal and the press, for valid presses.
    #[must_use]
    pub fn reaction_frames(self, signal: Frame) -> Option<i32> {
        match self {
            Self::Pressed(frame) => Some(frame - signal),
            Self::NotPressed | Self::FalseStart(_) => None,
        }
    }
}

/// Everything known about a finished round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoundResult {
    /// The decision.
    pub outcome: RoundOutcome,
    /// Frame the round was settled on.
    pub finish_frame: Frame,
    /// Signal frame of the round.
    pub signal_frame: Frame,
    /// Local press.
    pub local: PressReport,
    /// Remote press.
    pub remote: PressReport,
}

/// Per-round signal frames drawn from the shared seed.
///
/// Two schedules built from the same seed and rules produce the same frames
/// in the same order.
#[derive(Debug, Clone)]
pub struct SignalSchedule {
    rng: Pcg32,
    min_signal_frame: i32,
    offset_range: u32,
}

impl SignalSchedule {
    /// A schedule for `seed`.
    #[must_use]
    pub fn new(seed: u32, rules: &RoundRules) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(u64::from(seed)),
            min_signal_frame: rules.min_signal_frame,
            offset_range: rules.signal_offset_range,
        }
    }

    /// Signal frame of the next round.
    pub fn next_signal_frame(&mut self) -> Frame {
        let offset = if self.offset_range == 0 {
            0
        } else {
            self.rng.gen_range(0..self.offset_range)
        };
        Frame::new(self.min_signal_frame) + i32::try_from(offset).unwrap_or(i32::MAX)
    }
}

/// What [`MatchEngine::tick`] says about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundPhase {
    /// Before the signal.
    Waiting,
    /// Exactly the signal frame.
    Signal,
    /// After the signal, before time-up.
    Open,
    /// At or past time-up; the round must be settled.
    TimeUp,
}

/// Overall winner once a match is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchWinner {
    /// Remote ran out of lives.
    Local,
    /// Local ran out of lives.
    Remote,
    /// Both ran out together.
    Draw,
}

/// Whether another round follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    /// Both sides have lives left.
    Continue,
    /// Someone reached zero.
    Finished(MatchWinner),
}

/// Remaining lives per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lives {
    /// Local lives.
    pub local: u8,
    /// Remote lives.
    pub remote: u8,
}

/// Signal timing, lives and round counting for one match.
///
/// Call [`setup_round`](Self::setup_round) before every round, the first
/// included. Both peers do so the same number of times with the same seed, so
/// they agree on every signal frame.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    rules: RoundRules,
    schedule: SignalSchedule,
    signal_frame: Frame,
    time_up_frame: Frame,
    lives: Lives,
    round_count: u32,
}

impl MatchEngine {
    /// A fresh match seeded with the shared seed.
    ///
    /// # Errors
    /// [`QuickdrawError::InvalidConfig`] if `rules` does not validate.
    pub fn new(rules: RoundRules, seed: u32) -> Result<Self, QuickdrawError> {
        rules.validate()?;
        Ok(Self {
            schedule: SignalSchedule::new(seed, &rules),
            signal_frame: Frame::NULL,
            time_up_frame: Frame::NULL,
            lives: Lives {
                local: rules.max_lives,
                remote: rules.max_lives,
            },
            round_count: 0,
            rules,
        })
    }

    /// Rules in use.
    #[must_use]
    pub fn rules(&self) -> &RoundRules {
        &self.rules
    }

    /// Draws the next signal frame and returns it.
    pub fn setup_round(&mut self) -> Frame {
        self.signal_frame = self.schedule.next_signal_frame();
        self.time_up_frame = self.signal_frame + self.rules.after_signal_duration;
        debug!(
            "round {}: signal at {}, time-up at {}",
            self.round_count + 1,
            self.signal_frame,
            self.time_up_frame
        );
        self.signal_frame
    }

    /// Signal frame of the current round, [`Frame::NULL`] before the first setup.
    #[must_use]
    pub fn signal_frame(&self) -> Frame {
        self.signal_frame
    }

    /// Time-up frame of the current round.
    #[must_use]
    pub fn time_up_frame(&self) -> Frame {
        self.time_up_frame
    }

    /// Phase of `frame` in the current round.
    #[must_use]
    pub fn tick(&self, frame: Frame) -> RoundPhase {
        if self.signal_frame.is_null() {
            return RoundPhase::Waiting;
        }
        if frame >= self.time_up_frame {
            RoundPhase::TimeUp
        } else if frame == self.signal_frame {
            RoundPhase::Signal
        } else if frame > self.signal_frame {
            RoundPhase::Open
        } else {
            RoundPhase::Waiting
        }
    }

    /// Resolves the current round without touching lives.
    #[must_use]
    pub fn check_result(&self, finish_frame: Frame, local: Frame, remote: Frame) -> RoundResult {
        RoundResult {
            outcome: resolve(self.signal_frame, local, remote),
            finish_frame,
            signal_frame: self.signal_frame,
            local: PressReport::classify(self.signal_frame, local),
            remote: PressReport::classify(self.signal_frame, remote),
        }
    }

    /// Deducts lives for `result`, counts the round and reports whether the
    /// match goes on.
    pub fn apply_result(&mut self, result: &RoundResult) -> MatchStatus {
        let (local_loses, remote_loses) = result.outcome.life_loss();
        if local_loses {
            self.lives.local = self.lives.local.saturating_sub(1);
        }
        if remote_loses {
            self.lives.remote = self.lives.remote.saturating_sub(1);
        }
        self.round_count += 1;
        debug!(
            "round {} {}: lives {}/{}",
            self.round_count, result.outcome, self.lives.local, self.lives.remote
        );
        self.check_match_result()
    }

    /// Match status from the current lives.
    #[must_use]
    pub fn check_match_result(&self) -> MatchStatus {
        match (self.lives.local == 0, self.lives.remote == 0) {
            (true, true) => MatchStatus::Finished(MatchWinner::Draw),
            (true, false) => MatchStatus::Finished(MatchWinner::Remote),
            (false, true) => MatchStatus::Finished(MatchWinner::Local),
            (false, false) => MatchStatus::Continue,
        }
    }

    /// Remaining lives.
    #[must_use]
    pub fn lives(&self) -> Lives {
        self.lives
    }

    /// Rounds resolved so far.
    #[must_use]
    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    /// Full lives, zero rounds and a new schedule from `seed`.
    pub fn rematch(&mut self, seed: u32) {
        self.schedule = SignalSchedule::new(seed, &self.rules);
        self.signal_frame = Frame::NULL;
        self.time_up_frame = Frame::NULL;
        self.lives = Lives {
            local: self.rules.max_lives,
            remote: self.rules.max_lives,
        };
        self.round_count = 0;
    }
}
