//! The peer handshake state machine.
//!
//! A [`PeerLink`] owns one [`DatagramChannel`] and both input rings for a
//! match. It agrees on a shared seed with the remote peer and then carries one
//! [`Packet::Input`] per simulation frame in each direction.
//!
//! The link is sans-IO with respect to time: every time-dependent method has an
//! `_at(now)` twin taking an explicit [`Instant`], and the plain variants call
//! it with `Instant::now()`.
//!
//! ```
//! use quickdraw_sync::{Config, HandshakeConfig, HandshakeStatus, LoopbackChannel, PeerLink, Role};
//!
//! struct Play;
//! impl Config for Play {
//!     type Identity = &'static str;
//! }
//!
//! let (a, b) = LoopbackChannel::pair();
//! let mut host = PeerLink::<Play, _>::new("host", a, HandshakeConfig::default())?;
//! let mut guest = PeerLink::<Play, _>::new("guest", b, HandshakeConfig::default())?;
//!
//! host.start_connect(Role::Initiator, "guest")?;
//! guest.start_connect(Role::Responder, "host")?;
//!
//! guest.poll_handshake();
//! let HandshakeStatus::Shared(seed) = host.poll_handshake() else { unreachable!() };
//! assert_eq!(guest.seed(), Some(seed));
//! # Ok::<(), quickdraw_sync::QuickdrawError>(())
//! ```

mod event;
mod state;

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, trace};
use web_time::Instant;

pub use event::{HandshakeStatus, LinkEvent};
pub use state::{PeerState, Role};

use crate::input_ring::{InputHistory, InputRecord};
use crate::network::codec;
use crate::network::messages::Packet;
use crate::report_violation_to;
use crate::rng::{Pcg32, Rng, SeedableRng};
use crate::sessions::event_drain::EventDrain;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    ChannelEndpoint, Config, DatagramChannel, Frame, HandshakeConfig, QuickdrawError,
    RECEIVE_BUFFER_SIZE,
};

const SEND_BUFFER_SIZE: usize = 16;

/// Traffic counters for one link. Reset by `close_connection`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Datagrams the channel accepted for sending.
    pub packets_sent: u64,
    /// Datagrams pulled off the channel, rejected ones included.
    pub packets_received: u64,
    /// Datagrams dropped as empty, foreign, truncated or undecodable.
    pub packets_rejected: u64,
    /// `Seed` packets sent, retries included.
    pub seed_sends: u64,
    /// `SeedAck` packets sent.
    pub seed_acks_sent: u64,
    /// `Ready` packets sent.
    pub ready_sent: u64,
    /// Inputs dropped because the round was not open yet.
    pub inputs_before_ready: u64,
    /// Sends the channel refused.
    pub send_failures: u64,
    /// Receive calls the channel failed.
    pub receive_failures: u64,
}

/// One side of a two-peer match.
///
/// See the [module docs](self) for a full handshake.
pub struct PeerLink<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    local: T::Identity,
    channel: C,
    config: HandshakeConfig,
    state: PeerState,
    role: Option<Role>,
    endpoint: Option<ChannelEndpoint<T::Identity>>,
    proposed_seed: Option<u32>,
    shared_seed: Option<u32>,
    connect_started: Option<Instant>,
    last_seed_send: Option<Instant>,
    history: InputHistory,
    last_remote_frame: Frame,
    round: u32,
    round_open: bool,
    peer_ready_round: Option<u32>,
    recv_buffer: Box<[u8]>,
    send_buffer: [u8; SEND_BUFFER_SIZE],
    seed_rng: Pcg32,
    event_queue: VecDeque<LinkEvent>,
    stats: LinkStats,
    observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T, C> std::fmt::Debug for PeerLink<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("local", &self.local)
            .field("remote", &self.endpoint.as_ref().map(|e| &e.remote))
            .field("state", &self.state)
            .field("role", &self.role)
            .field("seed", &self.shared_seed)
            .field("round", &self.round)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T, C> PeerLink<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    /// Creates a sleeping link for `local` over `channel`.
    ///
    /// # Errors
    /// [`QuickdrawError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        local: T::Identity,
        channel: C,
        config: HandshakeConfig,
    ) -> Result<Self, QuickdrawError> {
        config.validate()?;
        let history = InputHistory::with_capacity(config.ring_capacity)?;
        Ok(Self {
            local,
            channel,
            config,
            state: PeerState::Sleeping,
            role: None,
            endpoint: None,
            proposed_seed: None,
            shared_seed: None,
            connect_started: None,
            last_seed_send: None,
            history,
            last_remote_frame: Frame::NULL,
            round: 0,
            round_open: true,
            peer_ready_round: None,
            recv_buffer: vec![0u8; RECEIVE_BUFFER_SIZE].into_boxed_slice(),
            send_buffer: [0u8; SEND_BUFFER_SIZE],
            seed_rng: Pcg32::from_entropy(),
            event_queue: VecDeque::new(),
            stats: LinkStats::default(),
            observer: None,
        })
    }

    /// Routes violations to `observer` instead of the tracing default.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Makes the initiator's seed draws reproducible.
    #[must_use]
    pub fn with_seed_rng(mut self, seed: u64) -> Self {
        self.seed_rng = Pcg32::seed_from_u64(seed);
        self
    }

    // ---------------------------------------------------------------------
    // accessors
    // ---------------------------------------------------------------------

    /// This side's identity.
    pub fn local(&self) -> &T::Identity {
        &self.local
    }

    /// The bound remote, if `start_connect` was called.
    pub fn remote(&self) -> Option<&T::Identity> {
        self.endpoint.as_ref().map(|e| &e.remote)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Role passed to the last `start_connect`.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The agreed seed, once shared.
    pub fn seed(&self) -> Option<u32> {
        self.shared_seed
    }

    /// `true` in `SeedShared` and `GameLoop`.
    pub fn is_synchronized(&self) -> bool {
        self.state.is_synchronized()
    }

    /// Settings this link was built with.
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// The underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Traffic counters.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// First local press of the round, or [`Frame::NULL`].
    pub fn local_pressed_frame(&self) -> Frame {
        self.history.local_pressed.get()
    }

    /// First remote press of the round, or [`Frame::NULL`].
    pub fn remote_pressed_frame(&self) -> Frame {
        self.history.remote_pressed.get()
    }

    /// Highest remote frame received this round, or [`Frame::NULL`].
    pub fn last_remote_frame(&self) -> Frame {
        self.last_remote_frame
    }

    /// Rounds started since the seed was shared; the first round is 0.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// `true` while remote inputs are accepted for the current round.
    pub fn is_round_open(&self) -> bool {
        self.round_open
    }

    /// `true` once the peer announced `Ready` for the current round or later.
    pub fn is_peer_ready(&self) -> bool {
        self.peer_ready_round.is_some_and(|r| r >= self.round)
    }

    /// The local record for `frame`, if still in the ring.
    pub fn try_get_local_input(&self, frame: Frame) -> Option<InputRecord> {
        self.history.local.try_get(frame)
    }

    /// The remote record for `frame`, if received and still in the ring.
    pub fn try_get_remote_input(&self, frame: Frame) -> Option<InputRecord> {
        self.history.remote.try_get(frame)
    }

    /// Drains queued [`LinkEvent`]s.
    pub fn events(&mut self) -> EventDrain<'_, LinkEvent> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    // ---------------------------------------------------------------------
    // handshake
    // ---------------------------------------------------------------------

    /// Binds `remote` and starts the seed exchange.
    ///
    /// # Errors
    /// - [`QuickdrawError::InvalidRequest`] unless the link is `Sleeping`.
    /// - Whatever the channel returns from `accept_incoming`; the link stays
    ///   `Sleeping` in that case.
    pub fn start_connect(&mut self, role: Role, remote: T::Identity) -> Result<(), QuickdrawError> {
        self.start_connect_at(role, remote, Instant::now())
    }

    /// [`start_connect`](Self::start_connect) with an explicit clock.
    pub fn start_connect_at(
        &mut self,
        role: Role,
        remote: T::Identity,
        now: Instant,
    ) -> Result<(), QuickdrawError> {
        if self.state != PeerState::Sleeping {
            return Err(QuickdrawError::InvalidRequest {
                info: format!("start_connect called in state {}", self.state),
            });
        }
        let endpoint =
            ChannelEndpoint::new(self.local.clone(), remote, self.config.channel_name.clone());
        self.channel.accept_incoming(&endpoint)?;

        debug!(
            "{:?} -> {:?}: Sleeping -> SharingSeed as {:?}",
            endpoint.local, endpoint.remote, role
        );
        self.endpoint = Some(endpoint);
        self.role = Some(role);
        self.state = PeerState::SharingSeed;
        self.connect_started = Some(now);

        if role.is_initiator() {
            let seed = self.seed_rng.gen_range(1..i32::MAX as u32);
            self.proposed_seed = Some(seed);
            self.send_seed(now);
        }
        Ok(())
    }

    /// One non-blocking handshake step: deadline check, seed retry, receive pump.
    pub fn poll_handshake(&mut self) -> HandshakeStatus {
        self.poll_handshake_at(Instant::now())
    }

    /// [`poll_handshake`](Self::poll_handshake) with an explicit clock.
    pub fn poll_handshake_at(&mut self, now: Instant) -> HandshakeStatus {
        match self.state {
            PeerState::Sleeping => return HandshakeStatus::Idle,
            PeerState::HandshakeTimedOut => {
                return HandshakeStatus::TimedOut {
                    elapsed_ms: self.elapsed_ms(now),
                }
            },
            PeerState::SeedShared | PeerState::GameLoop => return self.status(),
            PeerState::SharingSeed => {},
        }

        let elapsed_ms = self.elapsed_ms(now);
        if elapsed_ms >= self.config.handshake_timeout.as_millis() {
            report_violation_to!(
                self.observer,
                ViolationSeverity::Warning,
                ViolationKind::Handshake,
                "handshake with {:?} timed out after {} ms",
                self.remote(),
                elapsed_ms
            );
            self.state = PeerState::HandshakeTimedOut;
            self.event_queue
                .push_back(LinkEvent::HandshakeTimedOut { elapsed_ms });
            return HandshakeStatus::TimedOut { elapsed_ms };
        }

        if self.role.is_some_and(Role::is_initiator) {
            let retry = self.config.seed_retry_interval;
            let retry_due = self
                .last_seed_send
                .is_none_or(|last| now.saturating_duration_since(last) >= retry);
            if retry_due {
                self.send_seed(now);
            }
        }

        self.receive_pump();
        self.status()
    }

    fn status(&self) -> HandshakeStatus {
        match (self.state, self.shared_seed) {
            (PeerState::Sleeping, _) => HandshakeStatus::Idle,
            (PeerState::SeedShared | PeerState::GameLoop, Some(seed)) => {
                HandshakeStatus::Shared(seed)
            },
            _ => HandshakeStatus::Pending,
        }
    }

    fn elapsed_ms(&self, now: Instant) -> u128 {
        self.connect_started
            .map_or(0, |start| now.saturating_duration_since(start).as_millis())
    }

    /// Waits for the seed exchange, polling every `poll_interval`.
    ///
    /// Returns the agreed seed. On cancellation the connection is closed
    /// before returning [`QuickdrawError::Cancelled`], so no listener stays
    /// registered.
    ///
    /// # Errors
    /// - Anything [`start_connect`](Self::start_connect) returns.
    /// - [`QuickdrawError::HandshakeTimedOut`] once the deadline passes.
    /// - [`QuickdrawError::Cancelled`] if `cancel` fires first.
    #[cfg(feature = "tokio")]
    pub async fn connect(
        &mut self,
        role: Role,
        remote: T::Identity,
        poll_interval: web_time::Duration,
        cancel: &crate::CancelSignal,
    ) -> Result<u32, QuickdrawError> {
        if cancel.is_cancelled() {
            return Err(QuickdrawError::Cancelled);
        }
        // tokio's clock so paused-time tests drive the deadline.
        self.start_connect_at(role, remote, tokio::time::Instant::now().into_std())?;

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            match self.poll_handshake_at(tokio::time::Instant::now().into_std()) {
                HandshakeStatus::Shared(seed) => return Ok(seed),
                HandshakeStatus::TimedOut { elapsed_ms } => {
                    return Err(QuickdrawError::HandshakeTimedOut { elapsed_ms })
                },
                HandshakeStatus::Idle => return Err(QuickdrawError::NotConnected),
                HandshakeStatus::Pending => {},
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("handshake with {:?} cancelled", self.remote());
                    self.close_connection();
                    return Err(QuickdrawError::Cancelled);
                }
                _ = ticker.tick() => {}
            }
        }
    }

    /// Unbinds the remote, clears both rings and returns to `Sleeping`.
    ///
    /// Valid in every state and idempotent. Also runs on drop.
    pub fn close_connection(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            debug!(
                "{:?} -> {:?}: {} -> Sleeping",
                endpoint.local, endpoint.remote, self.state
            );
            self.channel.close(&endpoint);
        }
        self.history.clear();
        self.state = PeerState::Sleeping;
        self.role = None;
        self.proposed_seed = None;
        self.shared_seed = None;
        self.connect_started = None;
        self.last_seed_send = None;
        self.last_remote_frame = Frame::NULL;
        self.round = 0;
        self.round_open = true;
        self.peer_ready_round = None;
        self.event_queue.clear();
        self.stats = LinkStats::default();
    }

    /// Clears rings and press trackers and moves to the next round.
    ///
    /// The new round starts closed: remote inputs are dropped until the peer's
    /// `Ready` for it has arrived and [`open_round`](Self::open_round) is called.
    pub fn on_round_reset(&mut self) {
        self.history.clear();
        self.last_remote_frame = Frame::NULL;
        self.round = self.round.wrapping_add(1);
        self.round_open = false;
        trace!("link to {:?} reset to round {}", self.remote(), self.round);
    }

    /// Announces that this side is waiting to start the current round.
    ///
    /// Delivery is unreliable; call it again on every poll until the peer's
    /// first input of the round arrives.
    ///
    /// # Errors
    /// [`QuickdrawError::NotConnected`] without a bound remote and shared seed.
    pub fn send_ready(&mut self) -> Result<(), QuickdrawError> {
        if self.endpoint.is_none() || !self.state.is_synchronized() {
            return Err(QuickdrawError::NotConnected);
        }
        if self.try_send(&Packet::Ready { round: self.round }) {
            self.stats.ready_sent += 1;
        }
        Ok(())
    }

    /// Starts accepting remote inputs for the current round. Returns `false`,
    /// leaving the round closed, until the peer is ready.
    pub fn open_round(&mut self) -> bool {
        if !self.round_open && self.is_peer_ready() {
            debug!("round {} opened with {:?}", self.round, self.remote());
            self.round_open = true;
        }
        self.round_open
    }

    // ---------------------------------------------------------------------
    // input exchange
    // ---------------------------------------------------------------------

    /// Records and sends this side's input for `frame`.
    ///
    /// Only the first press of a round goes out as `pressed = true`; the
    /// return value says whether this call was that press. Channel failures
    /// are reported and counted, not returned.
    ///
    /// # Errors
    /// - [`QuickdrawError::NotConnected`] without a bound remote and shared seed.
    /// - [`QuickdrawError::InvalidRequest`] for negative frames.
    pub fn send_input(&mut self, frame: Frame, pressed: bool) -> Result<bool, QuickdrawError> {
        if self.endpoint.is_none() || !self.state.is_synchronized() {
            return Err(QuickdrawError::NotConnected);
        }
        if !frame.is_valid() {
            return Err(QuickdrawError::InvalidRequest {
                info: format!("cannot send input for frame {frame}"),
            });
        }

        let first_press = pressed && self.history.local_pressed.record(frame);
        let last_ack = self.last_remote_frame;
        self.history.local.store(frame, last_ack, first_press);

        if self.state == PeerState::SeedShared {
            debug!("SeedShared -> GameLoop on first input (frame {})", frame);
            self.state = PeerState::GameLoop;
        }

        self.try_send(&Packet::Input {
            frame,
            last_ack,
            pressed: first_press,
        });
        Ok(first_press)
    }

    /// Handles up to `receive_batch` queued datagrams and returns how many
    /// were pulled off the channel.
    ///
    /// Never fails; malformed or foreign datagrams are dropped and counted.
    pub fn receive_pump(&mut self) -> usize {
        let Some(channel_name) = self.endpoint.as_ref().map(|e| e.channel.clone()) else {
            return 0;
        };

        let mut pulled = 0;
        while pulled < self.config.receive_batch {
            let received = self
                .channel
                .try_receive(&self.local, &channel_name, &mut self.recv_buffer);
            match received {
                Ok(Some((from, len))) => {
                    pulled += 1;
                    self.stats.packets_received += 1;
                    self.handle_datagram(&from, len);
                },
                Ok(None) => break,
                Err(err) => {
                    self.stats.receive_failures += 1;
                    report_violation_to!(
                        self.observer,
                        ViolationSeverity::Warning,
                        ViolationKind::NetworkProtocol,
                        "receive on {} failed: {}",
                        channel_name,
                        err
                    );
                    break;
                },
            }
        }
        pulled
    }

    fn handle_datagram(&mut self, from: &T::Identity, len: usize) {
        if len == 0 {
            self.reject(format_args!("empty datagram from {from:?}"));
            return;
        }
        if self.remote() != Some(from) {
            self.stats.packets_rejected += 1;
            trace!("dropping datagram from unexpected sender {:?}", from);
            return;
        }
        let bytes = self.recv_buffer.get(..len).unwrap_or_default();
        match codec::decode(bytes) {
            Ok(packet) => {
                trace!("received {:?} from {:?}", packet, from);
                self.on_packet(packet);
            },
            Err(err) => self.reject(format_args!("dropping datagram from {from:?}: {err}")),
        }
    }

    fn reject(&mut self, reason: std::fmt::Arguments<'_>) {
        self.stats.packets_rejected += 1;
        report_violation_to!(
            self.observer,
            ViolationSeverity::Warning,
            ViolationKind::NetworkProtocol,
            "{}",
            reason
        );
    }

    fn on_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Seed { seed } => self.on_seed(seed),
            Packet::SeedAck { seed } => self.on_seed_ack(seed),
            Packet::Input {
                frame,
                last_ack,
                pressed,
            } => self.on_input(frame, last_ack, pressed),
            Packet::Ready { round } => self.on_ready(round),
        }
    }

    fn on_seed(&mut self, seed: u32) {
        if self.state != PeerState::SharingSeed || self.role != Some(Role::Responder) {
            trace!("ignoring Seed {} in state {}", seed, self.state);
            return;
        }
        if !self.try_send(&Packet::SeedAck { seed }) {
            // Stay in SharingSeed; the initiator's next retry gets another try.
            return;
        }
        self.stats.seed_acks_sent += 1;
        self.accept_seed(seed);
    }

    fn on_seed_ack(&mut self, seed: u32) {
        if self.state != PeerState::SharingSeed || self.role != Some(Role::Initiator) {
            trace!("ignoring SeedAck {} in state {}", seed, self.state);
            return;
        }
        let proposed = self.proposed_seed;
        if proposed != Some(seed) {
            self.stats.packets_rejected += 1;
            report_violation_to!(
                self.observer,
                ViolationSeverity::Warning,
                ViolationKind::Handshake,
                "SeedAck {} does not match proposed seed {:?}",
                seed,
                proposed
            );
            return;
        }
        self.accept_seed(seed);
    }

    fn accept_seed(&mut self, seed: u32) {
        info!(
            "seed {} shared with {:?} as {:?}",
            seed,
            self.remote(),
            self.role
        );
        self.shared_seed = Some(seed);
        self.state = PeerState::SeedShared;
        self.event_queue.push_back(LinkEvent::SeedShared { seed });
    }

    fn on_input(&mut self, frame: Frame, last_ack: Frame, pressed: bool) {
        if !self.state.is_synchronized() {
            trace!("dropping Input for frame {} in state {}", frame, self.state);
            return;
        }
        if !self.round_open {
            trace!("dropping Input for frame {} before round {} opened", frame, self.round);
            self.stats.inputs_before_ready += 1;
            return;
        }
        if !self.history.remote.store(frame, last_ack, pressed) {
            self.stats.packets_rejected += 1;
            return;
        }
        if frame > self.last_remote_frame {
            self.last_remote_frame = frame;
        }
        if pressed && self.history.remote_pressed.record(frame) {
            debug!("remote pressed on frame {}", frame);
            self.event_queue.push_back(LinkEvent::RemotePressed { frame });
        }
    }

    fn on_ready(&mut self, round: u32) {
        if !self.state.is_synchronized() {
            trace!("dropping Ready {} in state {}", round, self.state);
            return;
        }
        if self.peer_ready_round.is_some_and(|r| r >= round) {
            return;
        }
        if round < self.round {
            trace!("ignoring Ready for past round {}", round);
            return;
        }
        debug!("{:?} ready for round {}", self.remote(), round);
        self.peer_ready_round = Some(round);
        self.event_queue.push_back(LinkEvent::PeerReady { round });
    }

    fn send_seed(&mut self, now: Instant) {
        let Some(seed) = self.proposed_seed else {
            return;
        };
        self.last_seed_send = Some(now);
        if self.try_send(&Packet::Seed { seed }) {
            self.stats.seed_sends += 1;
        }
    }

    /// Sends `packet`, reporting and counting failures instead of returning them.
    fn try_send(&mut self, packet: &Packet) -> bool {
        let remote = self.remote().cloned();
        match self.send_packet(packet) {
            Ok(()) => {
                trace!("sent {:?} to {:?}", packet, remote);
                self.stats.packets_sent += 1;
                true
            },
            Err(err @ QuickdrawError::Codec(_)) => {
                report_violation_to!(
                    self.observer,
                    ViolationSeverity::Error,
                    ViolationKind::InternalError,
                    "failed to encode {:?}: {}",
                    packet,
                    err
                );
                false
            },
            Err(err) => {
                self.stats.send_failures += 1;
                report_violation_to!(
                    self.observer,
                    ViolationSeverity::Warning,
                    ViolationKind::NetworkProtocol,
                    "send of {} to {:?} failed: {}",
                    packet.kind(),
                    remote,
                    err
                );
                false
            },
        }
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), QuickdrawError> {
        let endpoint = self.endpoint.as_ref().ok_or(QuickdrawError::NotConnected)?;
        let len = codec::encode_into(packet, &mut self.send_buffer)?;
        let payload = self.send_buffer.get(..len).unwrap_or_default();
        self.channel.send_to(endpoint, payload)
    }
}

impl<T, C> Drop for PeerLink<T, C>
where
    T: Config,
    C: DatagramChannel<T::Identity>,
{
    fn drop(&mut self) {
        self.close_connection();
    }
}
