//! Whole matches between two `NetMatch`es on one hub.

#![allow(clippy::unwrap_used)]

use quickdraw_sync::{
    ChaosConfig, HandshakeConfig, HandshakeStatus, MatchEvent, MatchStatus, MatchWinner, NetMatch,
    RoundOutcome, RoundRules, Role,
};
use web_time::{Duration, Instant};

use crate::common::{handshake, handshake_pair, lossy_pair, play_round};

fn rules() -> RoundRules {
    RoundRules {
        min_signal_frame: 30,
        signal_offset_range: 40,
        after_signal_duration: 60,
        max_lives: 3,
        settle_frames: 10,
    }
}

#[test]
fn faster_side_wins_the_match() {
    let (host, guest) = handshake_pair(HandshakeConfig::default());
    let mut host = NetMatch::new(host, rules()).unwrap();
    let mut guest = NetMatch::new(guest, rules()).unwrap();
    let first_signal = host.engine().signal_frame();

    for round in 0..3 {
        let signal = host.engine().signal_frame();
        assert_eq!(signal, guest.engine().signal_frame(), "round {round}");
        let (h, g) = play_round(
            &mut host,
            &mut guest,
            Some(signal.as_i32() + 3),
            Some(signal.as_i32() + 8),
        );
        assert_eq!(h.outcome, RoundOutcome::WinLocal);
        assert_eq!(g.outcome, h.outcome.mirrored());
        if round < 2 {
            assert_eq!(host.check_match_result(), MatchStatus::Continue);
            host.on_round_reset().unwrap();
            guest.on_round_reset().unwrap();
        }
    }

    assert_eq!(
        host.check_match_result(),
        MatchStatus::Finished(MatchWinner::Local)
    );
    assert_eq!(
        guest.check_match_result(),
        MatchStatus::Finished(MatchWinner::Remote)
    );
    assert!(host
        .events()
        .any(|e| e == MatchEvent::MatchFinished(MatchWinner::Local)));

    host.rematch();
    guest.rematch();
    assert_eq!(host.engine().signal_frame(), first_signal);
    assert_eq!(guest.engine().signal_frame(), first_signal);
}

#[test]
fn false_start_and_double_ko_cost_lives() {
    let (host, guest) = handshake_pair(HandshakeConfig::default());
    let mut host = NetMatch::new(host, rules()).unwrap();
    let mut guest = NetMatch::new(guest, rules()).unwrap();

    let (h, g) = play_round(&mut host, &mut guest, Some(5), None);
    assert_eq!(h.outcome, RoundOutcome::FlyingLocal);
    assert_eq!(g.outcome, RoundOutcome::FlyingRemote);
    assert_eq!(host.engine().lives().local, 2);
    assert_eq!(guest.engine().lives().remote, 2);

    host.on_round_reset().unwrap();
    guest.on_round_reset().unwrap();
    let signal = host.engine().signal_frame().as_i32();
    let (h, g) = play_round(&mut host, &mut guest, Some(signal + 4), Some(signal + 4));
    assert_eq!(h.outcome, RoundOutcome::DoubleKo);
    assert_eq!(g.outcome, RoundOutcome::DoubleKo);
    assert_eq!(host.engine().lives().local, 1);
    assert_eq!(host.engine().lives().remote, 2);
}

#[test]
fn nobody_pressing_times_out() {
    let (host, guest) = handshake_pair(HandshakeConfig::default());
    let mut host = NetMatch::new(host, rules()).unwrap();
    let mut guest = NetMatch::new(guest, rules()).unwrap();
    let (h, g) = play_round(&mut host, &mut guest, None, None);
    assert_eq!(h.outcome, RoundOutcome::TimeUp);
    assert_eq!(g.outcome, RoundOutcome::TimeUp);
    assert_eq!(h.finish_frame, host.engine().time_up_frame());
}

#[test]
fn press_after_the_peer_settled_stays_in_its_round() {
    let (host, guest) = handshake_pair(HandshakeConfig::default());
    let mut host = NetMatch::new(host, rules()).unwrap();
    let mut guest = NetMatch::new(guest, rules()).unwrap();

    // The guest presses on the frame both settle windows close, after the
    // host has already settled.
    let signal = host.engine().signal_frame().as_i32();
    let (h, g) = play_round(&mut host, &mut guest, Some(signal + 3), Some(signal + 13));
    assert_eq!(h.outcome, RoundOutcome::WinLocal);
    assert_eq!(g.outcome, RoundOutcome::WinRemote);
    assert_eq!(h.finish_frame.as_i32(), signal + 13);

    host.on_round_reset().unwrap();
    guest.on_round_reset().unwrap();
    let (h, g) = play_round(&mut host, &mut guest, None, None);
    assert_eq!(h.outcome, RoundOutcome::TimeUp);
    assert_eq!(g.outcome, RoundOutcome::TimeUp);
    assert!(host.link().stats().inputs_before_ready > 0);
    assert!(host
        .events()
        .any(|e| e == MatchEvent::RoundOpened { round: 1 }));
}

#[test]
fn outcomes_mirror_over_a_noisy_channel() {
    let chaos = |seed| {
        ChaosConfig::builder()
            .duplication_rate(0.2)
            .reorder_rate(0.4)
            .seed(seed)
            .build()
    };
    let (mut host, mut guest) = lossy_pair(HandshakeConfig::default(), chaos(9), chaos(10));
    let start = Instant::now();
    host.start_connect_at(Role::Initiator, 2, start).unwrap();
    guest.start_connect_at(Role::Responder, 1, start).unwrap();
    let statuses = handshake(&mut host, &mut guest, start, Duration::from_millis(16));
    assert!(matches!(
        statuses,
        (HandshakeStatus::Shared(_), HandshakeStatus::Shared(_))
    ));

    let mut host = NetMatch::new(host, rules()).unwrap();
    let mut guest = NetMatch::new(guest, rules()).unwrap();
    for _ in 0..3 {
        let signal = host.engine().signal_frame().as_i32();
        let (h, g) = play_round(&mut host, &mut guest, Some(signal + 6), Some(signal + 2));
        assert_eq!(h.outcome, RoundOutcome::WinRemote);
        assert_eq!(g.outcome, h.outcome.mirrored());
        if host.check_match_result() != MatchStatus::Continue {
            break;
        }
        host.on_round_reset().unwrap();
        guest.on_round_reset().unwrap();
    }
    assert_eq!(
        host.check_match_result(),
        MatchStatus::Finished(MatchWinner::Remote)
    );
}
