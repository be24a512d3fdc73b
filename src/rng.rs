//! PCG32 (PCG-XSH-RR, 64-bit state) random number generation.
//!
//! Two consumers need this: the handshake initiator draws a fresh seed, and
//! both peers derive the per-round signal offsets from that shared seed, so
//! the generator must produce the same sequence on every platform.
//! [`ChaosChannel`](crate::ChaosChannel) also uses it for reproducible fault
//! injection.
//!
//! ```rust
//! use quickdraw_sync::rng::{Pcg32, Rng, SeedableRng};
//!
//! let mut a = Pcg32::seed_from_u64(7);
//! let mut b = Pcg32::seed_from_u64(7);
//! assert_eq!(a.gen_range(0..180), b.gen_range(0..180));
//! ```

use crate::{
    report_violation,
    telemetry::{ViolationKind, ViolationSeverity},
};
use std::cell::RefCell;

const MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const DEFAULT_STREAM: u64 = 1_442_695_040_888_963_407;

/// PCG32 generator. Not cryptographically secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    /// Creates a generator from an initial state and a stream selector.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        let inc = (stream << 1) | 1;
        let mut s = 0u64.wrapping_mul(MULTIPLIER).wrapping_add(inc);
        s = s.wrapping_add(state);
        s = s.wrapping_mul(MULTIPLIER).wrapping_add(inc);
        Self { state: s, inc }
    }

    /// Next 32 random bits.
    #[inline]
    #[must_use]
    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(MULTIPLIER).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        xorshifted.rotate_right((old >> 59) as u32)
    }
}

/// Construction from a seed or from ambient entropy.
pub trait SeedableRng: Sized {
    /// Deterministic construction; equal seeds give equal sequences.
    #[must_use]
    fn seed_from_u64(seed: u64) -> Self;

    /// Non-deterministic construction for identifiers and handshake seeds.
    #[must_use]
    fn from_entropy() -> Self;
}

impl SeedableRng for Pcg32 {
    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed, DEFAULT_STREAM)
    }

    fn from_entropy() -> Self {
        Self::seed_from_u64(entropy_seed())
    }
}

/// Value generation on top of a 32-bit source.
pub trait Rng {
    /// Next 32 random bits.
    fn next_u32(&mut self) -> u32;

    /// Uniform `u32` in `[range.start, range.end)`, unbiased.
    ///
    /// An empty range reports a configuration violation and returns `range.start`.
    fn gen_range(&mut self, range: std::ops::Range<u32>) -> u32 {
        let span = range.end.wrapping_sub(range.start);
        if range.end <= range.start {
            report_violation!(
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                "gen_range called with empty range [{}..{})",
                range.start,
                range.end
            );
            return range.start;
        }
        let zone = span.wrapping_neg() % span;
        loop {
            let value = self.next_u32();
            if value >= zone {
                return range.start + value % span;
            }
        }
    }

    /// `true` with probability `p` (clamped to `[0, 1]`).
    fn gen_bool(&mut self, p: f64) -> bool {
        let p = p.clamp(0.0, 1.0);
        if p >= 1.0 {
            return true;
        }
        let threshold = (p * f64::from(u32::MAX)) as u32;
        self.next_u32() < threshold
    }
}

impl Rng for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        Self::next_u32(self)
    }
}

thread_local! {
    static THREAD_RNG: RefCell<Pcg32> = RefCell::new(Pcg32::from_entropy());
}

/// Draws a `u32` from the thread-local generator.
#[must_use]
pub fn random_u32() -> u32 {
    THREAD_RNG.with(|rng| rng.borrow_mut().next_u32())
}

/// Handle to the thread-local generator.
#[must_use]
pub fn thread_rng() -> ThreadRng {
    ThreadRng { _private: () }
}

/// Zero-sized handle returned by [`thread_rng`].
#[derive(Debug)]
pub struct ThreadRng {
    _private: (),
}

impl Rng for ThreadRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        random_u32()
    }
}

// RandomState is randomly keyed per process; hashing the thread id and the
// wall clock through it gives distinct seeds across threads and runs.
fn entropy_seed() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    std::thread::current().id().hash(&mut hasher);
    if let Ok(since_epoch) = web_time::SystemTime::now().duration_since(web_time::UNIX_EPOCH) {
        since_epoch.as_nanos().hash(&mut hasher);
    }
    hasher.finish()
}
