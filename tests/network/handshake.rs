//! Seed exchange between two links on one loopback hub.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use quickdraw_sync::telemetry::{CollectingObserver, ViolationKind};
use quickdraw_sync::{
    ChaosChannel, ChaosConfig, HandshakeConfig, HandshakeStatus, LinkEvent, LoopbackChannel,
    Packet, PeerLink, PeerState, QuickdrawError, Role,
};
use web_time::{Duration, Instant};

use crate::common::{handshake, handshake_pair, TestConfig, TestLink};

#[test]
fn both_sides_agree_on_seed() {
    let (mut host, mut guest) = handshake_pair(HandshakeConfig::default());
    assert_eq!(host.seed(), guest.seed());
    assert!(host.seed().unwrap() >= 1);
    assert_eq!(host.state(), PeerState::SeedShared);
    assert_eq!(guest.state(), PeerState::SeedShared);

    let seed = host.seed().unwrap();
    assert_eq!(
        host.events().collect::<Vec<_>>(),
        vec![LinkEvent::SeedShared { seed }]
    );
    assert_eq!(
        guest.events().collect::<Vec<_>>(),
        vec![LinkEvent::SeedShared { seed }]
    );
    assert_eq!(guest.stats().seed_acks_sent, 1);
}

#[test]
fn duplicated_seed_is_acknowledged_once() {
    let chaos = ChaosConfig::builder().duplication_rate(1.0).seed(3).build();
    let (a, b) = LoopbackChannel::pair();
    let start = Instant::now();
    let mut host = PeerLink::<TestConfig, _>::new(
        1,
        ChaosChannel::new(a, chaos.clone()),
        HandshakeConfig::default(),
    )
    .unwrap();
    let mut guest =
        PeerLink::<TestConfig, _>::new(2, ChaosChannel::new(b, chaos), HandshakeConfig::default())
            .unwrap();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();

    let statuses = handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    assert!(matches!(
        statuses,
        (HandshakeStatus::Shared(_), HandshakeStatus::Shared(_))
    ));
    assert_eq!(host.seed(), guest.seed());
    assert_eq!(guest.stats().seed_acks_sent, 1);
    assert_eq!(host.channel().stats().duplicated, 1);
    assert_eq!(guest.channel().stats().duplicated, 1);
}

#[test]
fn lone_responder_times_out_on_the_deadline() {
    let start = Instant::now();
    let mut guest = TestLink::new(2, LoopbackChannel::new(), HandshakeConfig::default()).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();

    assert_eq!(
        guest.poll_handshake_at(start + Duration::from_millis(5999)),
        HandshakeStatus::Pending
    );
    assert_eq!(
        guest.poll_handshake_at(start + Duration::from_millis(6000)),
        HandshakeStatus::TimedOut { elapsed_ms: 6000 }
    );
    assert_eq!(guest.state(), PeerState::HandshakeTimedOut);
    assert_eq!(
        guest.events().collect::<Vec<_>>(),
        vec![LinkEvent::HandshakeTimedOut { elapsed_ms: 6000 }]
    );
    assert!(matches!(
        guest.send_input(quickdraw_sync::Frame::new(0), false),
        Err(QuickdrawError::NotConnected)
    ));
}

#[test]
fn reconnect_after_close() {
    let (mut host, mut guest) = handshake_pair(HandshakeConfig::default());
    let first = host.seed().unwrap();
    host.close_connection();
    guest.close_connection();
    assert_eq!(host.state(), PeerState::Sleeping);

    let start = Instant::now();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();
    let statuses = handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    let (HandshakeStatus::Shared(a), HandshakeStatus::Shared(b)) = statuses else {
        panic!("reconnect failed: {statuses:?}");
    };
    assert_eq!(a, b);
    assert_ne!(a, first);
}

#[test]
fn forged_ack_from_stranger_is_ignored() {
    let observer = Arc::new(CollectingObserver::new());
    let hub = LoopbackChannel::new();
    let start = Instant::now();
    let mut host = TestLink::new(1, hub.clone(), HandshakeConfig::default())
        .unwrap()
        .with_observer(observer.clone());
    host.start_connect_at(Role::Initiator, 2, start).unwrap();

    let ack = quickdraw_sync::network::codec::encode(&Packet::SeedAck { seed: 99 }).unwrap();
    hub.inject(3, 1, "GAME", &ack);
    assert_eq!(host.poll_handshake_at(start), HandshakeStatus::Pending);
    assert_eq!(host.stats().packets_rejected, 1);
    assert!(observer.is_empty());

    // Right sender, wrong seed.
    hub.inject(2, 1, "GAME", &ack);
    assert_eq!(host.poll_handshake_at(start), HandshakeStatus::Pending);
    assert!(observer.has_violation(ViolationKind::Handshake));
}

#[tokio::test(start_paused = true)]
async fn async_connect_agrees_on_seed() {
    let (a, b) = LoopbackChannel::pair();
    let mut host = TestLink::new(1, a, HandshakeConfig::default()).unwrap();
    let mut guest = TestLink::new(2, b, HandshakeConfig::default()).unwrap();
    let cancel = quickdraw_sync::CancelSignal::new();
    let poll = Duration::from_millis(16);

    let (host_seed, guest_seed) = tokio::join!(
        host.connect(Role::Initiator, 2, poll, &cancel),
        guest.connect(Role::Responder, 1, poll, &cancel),
    );
    assert_eq!(host_seed.unwrap(), guest_seed.unwrap());
}

#[tokio::test(start_paused = true)]
async fn async_connect_times_out_without_peer() {
    let mut guest = TestLink::new(2, LoopbackChannel::new(), HandshakeConfig::default()).unwrap();
    let cancel = quickdraw_sync::CancelSignal::new();
    let result = guest
        .connect(Role::Responder, 1, Duration::from_millis(100), &cancel)
        .await;
    match result {
        Err(QuickdrawError::HandshakeTimedOut { elapsed_ms }) => assert!(elapsed_ms >= 6000),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_connect_unregisters_listener() {
    let hub = LoopbackChannel::new();
    let mut guest = TestLink::new(2, hub.clone(), HandshakeConfig::default()).unwrap();
    let cancel = quickdraw_sync::CancelSignal::new();
    let canceller = cancel.clone();

    let (result, ()) = tokio::join!(
        guest.connect(Role::Responder, 1, Duration::from_millis(16), &cancel),
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            canceller.cancel();
        },
    );
    assert!(matches!(result, Err(QuickdrawError::Cancelled)));
    assert_eq!(guest.state(), PeerState::Sleeping);
    assert!(!hub.is_accepting(&2, &1, "GAME"));
}

#[tokio::test]
async fn connect_with_cancelled_signal_does_nothing() {
    let hub = LoopbackChannel::new();
    let mut guest = TestLink::new(2, hub.clone(), HandshakeConfig::default()).unwrap();
    let cancel = quickdraw_sync::CancelSignal::new();
    cancel.cancel();
    let result = guest
        .connect(Role::Responder, 1, Duration::from_millis(16), &cancel)
        .await;
    assert!(matches!(result, Err(QuickdrawError::Cancelled)));
    assert!(!hub.is_accepting(&2, &1, "GAME"));
}
