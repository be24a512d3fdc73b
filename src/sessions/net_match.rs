//! Per-tick glue between a synchronized [`PeerLink`] and a [`MatchEngine`].
//!
//! Each 60 Hz tick: sample the button, `send_input`, `receive_pump`, check
//! the round phase. A round settles at time-up, once both sides have pressed,
//! or `settle_frames` after the first press so a near-simultaneous press from
//! the peer still has time to arrive.
//!
//! Every round after the first starts behind a `Ready` barrier. Until the
//! peer's `Ready` for the round arrives, `tick` only announces this side and
//! pumps the channel; inputs still in flight from the previous round are
//! dropped by the link. The first round needs no barrier because the seed
//! exchange already lined both sides up.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::network::peer_link::{LinkEvent, PeerLink};
use crate::round::{MatchEngine, MatchStatus, MatchWinner, RoundPhase, RoundResult};
use crate::sessions::event_drain::EventDrain;
use crate::{Config, DatagramChannel, Frame, QuickdrawError, RoundRules};

/// Things the game layer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchEvent {
    /// The signal frame was reached.
    Signal {
        /// The signal frame.
        frame: Frame,
    },
    /// The peer's `Ready` arrived and the round's frames started.
    RoundOpened {
        /// Round number, counted from 0 since the seed was shared.
        round: u32,
    },
    /// The peer's press arrived.
    RemotePressed {
        /// Frame the peer pressed on.
        frame: Frame,
    },
    /// The round was decided and lives were updated.
    RoundSettled(RoundResult),
    /// A side ran out of lives.
    MatchFinished(MatchWinner),
}

/// What one [`NetMatch::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickReport {
    /// Frame this tick simulated.
    pub frame: Frame,
    /// Phase of that frame.
    pub phase: RoundPhase,
    /// `true` if this tick carried the local press.
    pub local_pressed: bool,
    /// Datagrams pulled off the channel.
    pub received: usize,
    /// Set on the tick that settled the round.
    pub settled: Option<RoundResult>,
    /// `true` if this tick only waited for the peer's `Ready`; no frame was
    /// simulated and `frame` did not advance.
    pub awaiting_peer: bool,
}

/// A networked match over one link.
pub struct NetMatch<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    link: PeerLink<T, C>,
    engine: MatchEngine,
    seed: u32,
    frame: Frame,
    first_press_at: Option<Frame>,
    settled: Option<RoundResult>,
    status: MatchStatus,
    event_queue: VecDeque<MatchEvent>,
}

impl<T, C> std::fmt::Debug for NetMatch<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetMatch")
            .field("link", &self.link)
            .field("engine", &self.engine)
            .field("frame", &self.frame)
            .field("settled", &self.settled)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<T, C> NetMatch<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    /// Starts a match on a link that finished its handshake. The first round
    /// is set up immediately.
    ///
    /// # Errors
    /// - [`QuickdrawError::NotConnected`] if the link has no shared seed.
    /// - [`QuickdrawError::InvalidConfig`] if `rules` does not validate.
    pub fn new(link: PeerLink<T, C>, rules: RoundRules) -> Result<Self, QuickdrawError> {
        let seed = match (link.is_synchronized(), link.seed()) {
            (true, Some(seed)) => seed,
            _ => return Err(QuickdrawError::NotConnected),
        };
        let mut engine = MatchEngine::new(rules, seed)?;
        engine.setup_round();
        info!("match started with seed {}", seed);
        Ok(Self {
            link,
            engine,
            seed,
            frame: Frame::new(0),
            first_press_at: None,
            settled: None,
            status: MatchStatus::Continue,
            event_queue: VecDeque::new(),
        })
    }

    /// The link.
    pub fn link(&self) -> &PeerLink<T, C> {
        &self.link
    }

    /// The engine.
    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Next frame `tick` will simulate.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    /// Ends the match and hands the link back.
    pub fn into_link(self) -> PeerLink<T, C> {
        self.link
    }

    /// Drains queued [`MatchEvent`]s.
    pub fn events(&mut self) -> EventDrain<'_, MatchEvent> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// Runs one frame with the sampled button state.
    ///
    /// While the round waits for the peer's `Ready` the press is ignored and
    /// the report has `awaiting_peer` set.
    ///
    /// # Errors
    /// - [`QuickdrawError::InvalidRequest`] once the round is settled and
    ///   [`on_round_reset`](Self::on_round_reset) has not been called.
    /// - [`QuickdrawError::NotConnected`] if the link was closed.
    pub fn tick(&mut self, pressed: bool) -> Result<TickReport, QuickdrawError> {
        if self.settled.is_some() {
            return Err(QuickdrawError::InvalidRequest {
                info: "round already settled; call on_round_reset first".to_owned(),
            });
        }
        if !self.link.is_round_open() {
            return self.await_peer();
        }

        let frame = self.frame;
        // Keep announcing until the peer is seen ticking this round.
        if self.link.round() > 0 && !self.link.last_remote_frame().is_valid() {
            self.link.send_ready()?;
        }
        let local_pressed = self.link.send_input(frame, pressed)?;
        let received = self.link.receive_pump();
        self.forward_link_events();

        let phase = self.engine.tick(frame);
        if phase == RoundPhase::Signal {
            self.event_queue.push_back(MatchEvent::Signal { frame });
        }

        let local = self.link.local_pressed_frame();
        let remote = self.link.remote_pressed_frame();
        if self.first_press_at.is_none() && (local.is_valid() || remote.is_valid()) {
            self.first_press_at = Some(frame);
        }

        let both_pressed = local.is_valid() && remote.is_valid();
        let settle_window_over = self
            .first_press_at
            .is_some_and(|first| frame - first >= self.engine.rules().settle_frames);
        let settled = if phase == RoundPhase::TimeUp || both_pressed || settle_window_over {
            Some(self.settle(frame, local, remote))
        } else {
            None
        };

        self.frame += 1;
        Ok(TickReport {
            frame,
            phase,
            local_pressed,
            received,
            settled,
            awaiting_peer: false,
        })
    }

    fn await_peer(&mut self) -> Result<TickReport, QuickdrawError> {
        self.link.send_ready()?;
        let received = self.link.receive_pump();
        self.forward_link_events();
        // Opening after the pump drops anything that came in with the Ready.
        if self.link.open_round() {
            let round = self.link.round();
            debug!("round {} opened", round);
            self.event_queue.push_back(MatchEvent::RoundOpened { round });
        }
        Ok(TickReport {
            frame: self.frame,
            phase: RoundPhase::Waiting,
            local_pressed: false,
            received,
            settled: None,
            awaiting_peer: true,
        })
    }

    fn forward_link_events(&mut self) {
        for event in self.link.events() {
            if let LinkEvent::RemotePressed { frame } = event {
                self.event_queue.push_back(MatchEvent::RemotePressed { frame });
            }
        }
    }

    fn settle(&mut self, frame: Frame, local: Frame, remote: Frame) -> RoundResult {
        let result = self.engine.check_result(frame, local, remote);
        self.status = self.engine.apply_result(&result);
        debug!(
            "round settled on frame {}: {} (local {:?}, remote {:?})",
            frame, result.outcome, result.local, result.remote
        );
        self.settled = Some(result);
        self.event_queue.push_back(MatchEvent::RoundSettled(result));
        if let MatchStatus::Finished(winner) = self.status {
            info!("match finished: {:?}", winner);
            self.event_queue.push_back(MatchEvent::MatchFinished(winner));
        }
        result
    }

    /// The settled result of the current round, if any.
    pub fn check_result(&self) -> Option<RoundResult> {
        self.settled
    }

    /// Match status after the last settled round.
    pub fn check_match_result(&self) -> MatchStatus {
        self.status
    }

    /// Starts the next round: clears the link's rings, closes the round until
    /// the peer's `Ready` arrives and draws the next signal frame.
    ///
    /// # Errors
    /// [`QuickdrawError::InvalidRequest`] if the match is already finished.
    pub fn on_round_reset(&mut self) -> Result<(), QuickdrawError> {
        if let MatchStatus::Finished(winner) = self.status {
            return Err(QuickdrawError::InvalidRequest {
                info: format!("match already finished ({winner:?}); call rematch"),
            });
        }
        self.begin_round();
        Ok(())
    }

    /// Restores full lives and replays the signal schedule from the shared seed.
    pub fn rematch(&mut self) {
        self.engine.rematch(self.seed);
        self.status = MatchStatus::Continue;
        self.begin_round();
    }

    fn begin_round(&mut self) {
        self.link.on_round_reset();
        self.engine.setup_round();
        self.frame = Frame::new(0);
        self.first_press_at = None;
        self.settled = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::round::{Lives, RoundOutcome};
    use crate::{HandshakeConfig, HandshakeStatus, LoopbackChannel, Role};

    struct TestConfig;

    impl Config for TestConfig {
        type Identity = u32;
    }

    type Match = NetMatch<TestConfig, LoopbackChannel<u32>>;

    fn rules() -> RoundRules {
        RoundRules {
            min_signal_frame: 20,
            signal_offset_range: 1,
            after_signal_duration: 30,
            settle_frames: 5,
            ..RoundRules::default()
        }
    }

    fn matches() -> (Match, Match) {
        let (a, b) = LoopbackChannel::pair();
        let mut host = PeerLink::<TestConfig, _>::new(1, a, HandshakeConfig::default()).unwrap();
        let mut guest = PeerLink::<TestConfig, _>::new(2, b, HandshakeConfig::default()).unwrap();
        host.start_connect(Role::Initiator, 2).unwrap();
        guest.start_connect(Role::Responder, 1).unwrap();
        guest.poll_handshake();
        assert!(matches!(host.poll_handshake(), HandshakeStatus::Shared(_)));
        (
            NetMatch::new(host, rules()).unwrap(),
            NetMatch::new(guest, rules()).unwrap(),
        )
    }

    #[test]
    fn unsynchronized_link_is_rejected() {
        let channel = LoopbackChannel::<u32>::new();
        let link = PeerLink::<TestConfig, _>::new(1, channel, HandshakeConfig::default()).unwrap();
        assert!(matches!(
            NetMatch::new(link, rules()),
            Err(QuickdrawError::NotConnected)
        ));
    }

    #[test]
    fn both_peers_agree_on_signal_frame() {
        let (host, guest) = matches();
        assert_eq!(host.engine().signal_frame(), guest.engine().signal_frame());
        assert_eq!(host.engine().signal_frame(), Frame::new(20));
    }

    #[test]
    fn faster_press_wins_on_both_sides() {
        let (mut host, mut guest) = matches();
        let mut host_result = None;
        let mut guest_result = None;
        for f in 0..60 {
            if host_result.is_none() {
                host_result = host.tick(f == 22).unwrap().settled;
            }
            if guest_result.is_none() {
                guest_result = guest.tick(f == 25).unwrap().settled;
            }
            if host_result.is_some() && guest_result.is_some() {
                break;
            }
        }
        assert_eq!(host_result.unwrap().outcome, RoundOutcome::WinLocal);
        assert_eq!(guest_result.unwrap().outcome, RoundOutcome::WinRemote);
        assert_eq!(host.engine().lives(), Lives { local: 3, remote: 2 });
        let events: Vec<_> = host.events().collect();
        assert!(events.contains(&MatchEvent::Signal {
            frame: Frame::new(20)
        }));
        assert!(events.contains(&MatchEvent::RemotePressed {
            frame: Frame::new(25)
        }));
    }

    #[test]
    fn time_up_settles_without_presses() {
        let (mut host, _guest) = matches();
        let mut settled = None;
        for _ in 0..60 {
            settled = host.tick(false).unwrap().settled;
            if settled.is_some() {
                break;
            }
        }
        let result = settled.unwrap();
        assert_eq!(result.outcome, RoundOutcome::TimeUp);
        assert_eq!(result.finish_frame, Frame::new(50));
        assert!(host.tick(false).is_err());
    }

    #[test]
    fn settle_window_closes_after_single_press() {
        let (mut host, _guest) = matches();
        let mut last = None;
        for f in 0..40 {
            let report = host.tick(f == 21).unwrap();
            if report.settled.is_some() {
                last = Some(report);
                break;
            }
        }
        let report = last.unwrap();
        assert_eq!(report.frame, Frame::new(26));
        assert_eq!(report.settled.unwrap().outcome, RoundOutcome::WinLocal);
    }

    /// Ticks both sides until each has settled, pressing on the given frames.
    fn play(host: &mut Match, guest: &mut Match, host_press: i32, guest_press: i32) {
        for _ in 0..500 {
            if host.check_result().is_none() {
                let press = host.frame() == Frame::new(host_press);
                host.tick(press).unwrap();
            }
            if guest.check_result().is_none() {
                let press = guest.frame() == Frame::new(guest_press);
                guest.tick(press).unwrap();
            }
            if host.check_result().is_some() && guest.check_result().is_some() {
                return;
            }
        }
        panic!("round never settled");
    }

    #[test]
    fn late_press_from_previous_round_does_not_leak() {
        let (mut host, mut guest) = matches();
        play(&mut host, &mut guest, 21, 26);
        let h = host.check_result().unwrap();
        let g = guest.check_result().unwrap();
        assert_eq!(h.outcome, RoundOutcome::WinLocal);
        assert_eq!(h.finish_frame, Frame::new(26));
        assert_eq!(g.outcome, RoundOutcome::WinRemote);

        // The guest's press on frame 26 is still queued for the host.
        host.on_round_reset().unwrap();
        guest.on_round_reset().unwrap();
        play(&mut host, &mut guest, -1, -1);

        let h = host.check_result().unwrap();
        let g = guest.check_result().unwrap();
        assert_eq!(h.outcome, RoundOutcome::TimeUp);
        assert_eq!(g.outcome, RoundOutcome::TimeUp);
        assert_eq!(host.link().remote_pressed_frame(), Frame::NULL);
        assert!(host.link().stats().inputs_before_ready >= 1);
        assert_eq!(host.engine().lives(), Lives { local: 2, remote: 1 });
        assert_eq!(guest.engine().lives(), Lives { local: 1, remote: 2 });
    }

    #[test]
    fn tick_waits_for_peer_ready_after_reset() {
        let (mut host, mut guest) = matches();
        play(&mut host, &mut guest, 22, 25);
        host.on_round_reset().unwrap();
        guest.on_round_reset().unwrap();
        host.events().for_each(drop);

        let report = host.tick(true).unwrap();
        assert!(report.awaiting_peer);
        assert!(!report.local_pressed);
        assert_eq!(report.phase, RoundPhase::Waiting);
        assert_eq!(host.frame(), Frame::new(0));
        assert!(host.tick(false).unwrap().awaiting_peer);

        // The guest already has the host's Ready; it opens on its first tick.
        assert!(guest.tick(false).unwrap().awaiting_peer);
        assert!(guest.link().is_round_open());
        assert!(!guest.tick(false).unwrap().awaiting_peer);

        assert!(host.tick(false).unwrap().awaiting_peer);
        assert_eq!(
            host.events().collect::<Vec<_>>(),
            vec![MatchEvent::RoundOpened { round: 1 }]
        );
        let report = host.tick(false).unwrap();
        assert!(!report.awaiting_peer);
        assert_eq!(report.frame, Frame::new(0));
        assert_eq!(host.frame(), Frame::new(1));
    }

    #[test]
    fn round_reset_and_match_end() {
        let (mut host, mut guest) = matches();
        for round in 0..3 {
            // false start every round
            play(&mut host, &mut guest, 5, -1);
            if round < 2 {
                host.on_round_reset().unwrap();
                guest.on_round_reset().unwrap();
                assert_eq!(host.frame(), Frame::new(0));
            }
        }
        assert_eq!(
            host.check_match_result(),
            MatchStatus::Finished(MatchWinner::Remote)
        );
        assert_eq!(
            guest.check_match_result(),
            MatchStatus::Finished(MatchWinner::Local)
        );
        assert!(host.on_round_reset().is_err());
        host.rematch();
        assert_eq!(host.check_match_result(), MatchStatus::Continue);
        assert_eq!(host.engine().lives(), Lives { local: 3, remote: 3 });
        assert_eq!(host.check_result(), None);
    }
}
