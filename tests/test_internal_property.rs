//! Property-based tests for the input ring, the codec and round resolution.
//!
//! # Properties
//!
//! ## InputRing
//! - Only the newest frame mapping to a slot is retrievable
//! - Lookups never return a record for a different frame
//!
//! ## Codec
//! - Decoding arbitrary bytes returns an error instead of panicking
//! - Trailing bytes after a well-formed packet are ignored
//!
//! ## Round resolution
//! - Swapping the sides mirrors the outcome
//! - Exactly the sides named by the outcome lose a life
//! - Equal seeds replay equal signal schedules

use std::collections::HashMap;

use proptest::prelude::*;
use quickdraw_sync::network::codec::{decode, encode};
use quickdraw_sync::round::{resolve, SignalSchedule};
use quickdraw_sync::{Frame, InputRing, Packet, PressedFrame, RoundOutcome, RoundRules};

// ============================================================================
// Strategies
// ============================================================================

fn capacity_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(8usize), Just(32), Just(128)]
}

/// A press frame or "never pressed".
fn press_strategy() -> impl Strategy<Value = Frame> {
    prop_oneof![
        1 => Just(Frame::NULL),
        4 => (0i32..400).prop_map(Frame::new),
    ]
}

fn packet_strategy() -> impl Strategy<Value = Packet> {
    prop_oneof![
        any::<u32>().prop_map(|seed| Packet::Seed { seed }),
        any::<u32>().prop_map(|seed| Packet::SeedAck { seed }),
        any::<u32>().prop_map(|round| Packet::Ready { round }),
        (0i32..100_000, -1i32..100_000, any::<bool>()).prop_map(|(f, a, pressed)| {
            Packet::Input {
                frame: Frame::new(f),
                last_ack: Frame::new(a),
                pressed,
            }
        }),
    ]
}

// ============================================================================
// InputRing
// ============================================================================

proptest! {
    #[test]
    fn prop_ring_keeps_newest_per_slot(
        capacity in capacity_strategy(),
        frames in prop::collection::vec(0i32..1_000, 1..200),
    ) {
        let mut ring = InputRing::with_capacity(capacity).unwrap();
        let mut newest: HashMap<usize, i32> = HashMap::new();
        for &f in &frames {
            prop_assert!(ring.store(Frame::new(f), Frame::NULL, f % 7 == 0));
            newest.insert(f as usize % capacity, f);
        }
        for &f in &frames {
            let got = ring.try_get(Frame::new(f));
            if newest.get(&(f as usize % capacity)) == Some(&f) {
                let record = got.unwrap();
                prop_assert_eq!(record.frame, Frame::new(f));
                prop_assert_eq!(record.pressed, f % 7 == 0);
            } else {
                prop_assert!(got.is_none(), "stale frame {} still readable", f);
            }
        }
    }

    #[test]
    fn prop_pressed_frame_keeps_first(presses in prop::collection::vec(0i32..500, 1..20)) {
        let mut pressed = PressedFrame::default();
        for &p in &presses {
            pressed.record(Frame::new(p));
        }
        prop_assert_eq!(pressed.get(), Frame::new(presses[0]));
    }
}

// ============================================================================
// Codec
// ============================================================================

proptest! {
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
        let _ = decode(&bytes);
    }

    #[test]
    fn prop_trailing_bytes_ignored(
        packet in packet_strategy(),
        tail in prop::collection::vec(any::<u8>(), 0..8),
    ) {
        let mut bytes = encode(&packet).unwrap();
        prop_assert_eq!(bytes.len(), packet.kind().wire_len());
        bytes.extend_from_slice(&tail);
        prop_assert_eq!(decode(&bytes).unwrap(), packet);
    }
}

// ============================================================================
// Round resolution
// ============================================================================

proptest! {
    #[test]
    fn prop_resolution_is_symmetric(
        signal in 0i32..300,
        local in press_strategy(),
        remote in press_strategy(),
    ) {
        let signal = Frame::new(signal);
        prop_assert_eq!(
            resolve(signal, local, remote).mirrored(),
            resolve(signal, remote, local)
        );
    }

    #[test]
    fn prop_life_loss_matches_outcome(
        signal in 0i32..300,
        local in press_strategy(),
        remote in press_strategy(),
    ) {
        let outcome = resolve(Frame::new(signal), local, remote);
        let (local_loses, remote_loses) = outcome.life_loss();
        prop_assert!(local_loses || remote_loses);
        if outcome == RoundOutcome::WinLocal {
            prop_assert!(!local_loses && remote_loses);
        }
        if local.is_valid() && local < signal && remote.is_valid() && remote < signal {
            prop_assert_eq!(outcome, RoundOutcome::FlyingBoth);
        }
    }

    #[test]
    fn prop_schedule_replays_from_seed(
        seed in 1u32..u32::MAX,
        rounds in 1usize..20,
    ) {
        let rules = RoundRules::default();
        let mut a = SignalSchedule::new(seed, &rules);
        let mut b = SignalSchedule::new(seed, &rules);
        for _ in 0..rounds {
            let frame = a.next_signal_frame();
            prop_assert_eq!(frame, b.next_signal_frame());
            prop_assert!(frame >= rules.min_signal_frame);
            prop_assert!(frame < rules.min_signal_frame + rules.signal_offset_range as i32);
        }
    }
}
