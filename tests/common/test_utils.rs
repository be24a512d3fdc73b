//! Shared constants and helpers for integration tests.

use quickdraw_sync::{
    ChaosChannel, ChaosConfig, Config, DatagramChannel, HandshakeConfig, HandshakeStatus,
    LoopbackChannel, NetMatch, PeerLink, Role, RoundResult,
};
use web_time::{Duration, Instant};

/// Upper bound on handshake polls before a helper gives up.
#[allow(dead_code)]
pub const MAX_HANDSHAKE_POLLS: usize = 500;

/// Identities are plain integers in tests.
pub struct TestConfig;

impl Config for TestConfig {
    type Identity = u32;
}

/// A link over the in-memory hub.
#[allow(dead_code)]
pub type TestLink = PeerLink<TestConfig, LoopbackChannel<u32>>;

/// Polls both links with a synthetic clock stepping `step` per round until
/// both report a shared seed or one of them gives up.
///
/// Returns the final statuses `(initiator, responder)`.
#[allow(dead_code)]
pub fn handshake<C>(
    initiator: &mut PeerLink<TestConfig, C>,
    responder: &mut PeerLink<TestConfig, C>,
    start: Instant,
    step: Duration,
) -> (HandshakeStatus, HandshakeStatus)
where
    C: DatagramChannel<u32>,
{
    let mut now = start;
    let mut statuses = (HandshakeStatus::Pending, HandshakeStatus::Pending);
    for _ in 0..MAX_HANDSHAKE_POLLS {
        statuses = (
            initiator.poll_handshake_at(now),
            responder.poll_handshake_at(now),
        );
        match statuses {
            (HandshakeStatus::Shared(_), HandshakeStatus::Shared(_)) => break,
            (HandshakeStatus::TimedOut { .. }, _) | (_, HandshakeStatus::TimedOut { .. }) => break,
            _ => {},
        }
        now += step;
    }
    statuses
}

/// Two links on one hub, already synchronized. Peer 1 initiates.
#[allow(dead_code)]
pub fn handshake_pair(config: HandshakeConfig) -> (TestLink, TestLink) {
    let (a, b) = LoopbackChannel::pair();
    let start = Instant::now();
    let mut host = TestLink::new(1, a, config.clone())
        .unwrap()
        .with_seed_rng(7);
    let mut guest = TestLink::new(2, b, config).unwrap();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();
    let statuses = handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    assert!(
        matches!(statuses, (HandshakeStatus::Shared(a), HandshakeStatus::Shared(b)) if a == b),
        "handshake failed: {statuses:?}"
    );
    (host, guest)
}

/// Two links on one hub, each behind its own fault injector, not yet connected.
#[allow(dead_code)]
pub fn lossy_pair(
    config: HandshakeConfig,
    host_chaos: ChaosConfig,
    guest_chaos: ChaosConfig,
) -> (
    PeerLink<TestConfig, ChaosChannel<u32, LoopbackChannel<u32>>>,
    PeerLink<TestConfig, ChaosChannel<u32, LoopbackChannel<u32>>>,
) {
    let (a, b) = LoopbackChannel::pair();
    let host = PeerLink::<TestConfig, _>::new(1, ChaosChannel::new(a, host_chaos), config.clone())
        .unwrap()
        .with_seed_rng(11);
    let guest =
        PeerLink::<TestConfig, _>::new(2, ChaosChannel::new(b, guest_chaos), config).unwrap();
    (host, guest)
}

/// Ticks both matches in lockstep, pressing on the given frames, until both
/// have settled. Returns `(host result, guest result)`.
#[allow(dead_code)]
pub fn play_round<C>(
    host: &mut NetMatch<TestConfig, C>,
    guest: &mut NetMatch<TestConfig, C>,
    host_press: Option<i32>,
    guest_press: Option<i32>,
) -> (RoundResult, RoundResult)
where
    C: DatagramChannel<u32>,
{
    let mut host_result = None;
    let mut guest_result = None;
    for _ in 0..10_000 {
        if host_result.is_none() {
            let press = host_press == Some(host.frame().as_i32());
            host_result = host.tick(press).unwrap().settled;
        }
        if guest_result.is_none() {
            let press = guest_press == Some(guest.frame().as_i32());
            guest_result = guest.tick(press).unwrap().settled;
        }
        if let (Some(h), Some(g)) = (host_result, guest_result) {
            return (h, g);
        }
    }
    panic!("round never settled");
}
