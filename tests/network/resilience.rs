//! Handshake and input exchange through `ChaosChannel`.

#![allow(clippy::unwrap_used)]

use quickdraw_sync::{
    ChaosConfig, Frame, HandshakeConfig, HandshakeStatus, LinkEvent, PeerState, Role,
};
use web_time::{Duration, Instant};

use crate::common::{handshake, lossy_pair};

#[test]
fn seed_retries_get_through_lossy_initiator() {
    // Only the host's sends are lossy; the single SeedAck path is clean.
    let host_chaos = ChaosConfig::builder().send_loss_rate(0.5).seed(21).build();
    let (mut host, mut guest) =
        lossy_pair(HandshakeConfig::lossy(), host_chaos, ChaosConfig::passthrough());
    let start = Instant::now();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();

    let statuses = handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    assert!(matches!(
        statuses,
        (HandshakeStatus::Shared(a), HandshakeStatus::Shared(b)) if a == b
    ));
    let sends = host.stats().seed_sends;
    let dropped = host.channel().stats().dropped_send + host.channel().stats().dropped_burst;
    assert_eq!(sends, dropped + 1, "exactly one Seed should have landed");
    assert_eq!(guest.stats().seed_acks_sent, 1);
}

#[test]
fn lost_seed_ack_ends_in_timeout() {
    // The responder acknowledges once; if that ack is lost the initiator's
    // retries are ignored and the deadline wins.
    let guest_chaos = ChaosConfig::builder().send_loss_rate(1.0).seed(5).build();
    let (mut host, mut guest) =
        lossy_pair(HandshakeConfig::lan(), ChaosConfig::passthrough(), guest_chaos);
    let start = Instant::now();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();

    let (h, g) = handshake(&mut host, &mut guest, start, Duration::from_millis(50));
    assert!(matches!(h, HandshakeStatus::TimedOut { .. }));
    assert!(matches!(g, HandshakeStatus::Shared(_)));
    assert_eq!(guest.state(), PeerState::SeedShared);
    assert_eq!(guest.stats().seed_acks_sent, 1);
    assert!(host.stats().seed_sends > 1);
}

#[test]
fn presses_survive_duplication_and_reordering() {
    let chaos = |seed| {
        ChaosConfig::builder()
            .duplication_rate(0.3)
            .reorder_rate(0.5)
            .seed(seed)
            .build()
    };
    let (mut host, mut guest) = lossy_pair(HandshakeConfig::default(), chaos(1), chaos(2));
    let start = Instant::now();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();
    let statuses = handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    assert!(matches!(
        statuses,
        (HandshakeStatus::Shared(_), HandshakeStatus::Shared(_))
    ));
    host.events().for_each(drop);
    guest.events().for_each(drop);

    for f in 0..60 {
        let frame = Frame::new(f);
        host.send_input(frame, f >= 30).unwrap();
        guest.send_input(frame, f >= 41).unwrap();
        host.receive_pump();
        guest.receive_pump();
    }
    for _ in 0..8 {
        host.receive_pump();
        guest.receive_pump();
    }

    assert_eq!(host.local_pressed_frame(), Frame::new(30));
    assert_eq!(host.remote_pressed_frame(), Frame::new(41));
    assert_eq!(guest.remote_pressed_frame(), Frame::new(30));
    assert_eq!(host.last_remote_frame(), Frame::new(59));
    assert_eq!(guest.last_remote_frame(), Frame::new(59));
    assert_eq!(
        host.events().collect::<Vec<_>>(),
        vec![LinkEvent::RemotePressed {
            frame: Frame::new(41)
        }]
    );
    assert_eq!(host.state(), PeerState::GameLoop);
    assert!(host.channel().stats().duplicated > 0);
    assert!(guest.channel().stats().reordered > 0);
}

#[test]
fn only_the_first_press_is_flagged() {
    let (mut host, mut guest) = lossy_pair(
        HandshakeConfig::default(),
        ChaosConfig::passthrough(),
        ChaosConfig::passthrough(),
    );
    let start = Instant::now();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();
    handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    assert!(host.is_synchronized() && guest.is_synchronized());

    assert!(host.send_input(Frame::new(0), true).unwrap());
    assert!(!host.send_input(Frame::new(1), true).unwrap());
    assert_eq!(guest.receive_pump(), 2);
    assert_eq!(guest.remote_pressed_frame(), Frame::new(0));
    assert_eq!(
        guest.try_get_remote_input(Frame::new(1)).map(|r| r.pressed),
        Some(false)
    );
}
