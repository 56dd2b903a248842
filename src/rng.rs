//! Per-match random streams.
//!
//! Each side of a match owns exactly one [`RngStream`] for the whole match. It is the only
//! entropy a strategy ever gets: strategies see it through the [`Entropy`] capability and
//! have no other way to obtain randomness from the engine.
//!
//! Streams are derived from the ordered pair of identities and a global salt:
//!
//! 1. `SHA-256("{name_a}|{name_b}|{salt}")`
//! 2. the low 64 bits of the digest (last 8 bytes, big endian) form the base seed
//! 3. side A is seeded with `base ^ 0xA5A5_A5A5_A5A5_A5A5`, side B with
//!    `base ^ 0x5A5A_5A5A_5A5A_5A5A`
//!
//! The generator is PCG-64 MCG, whose output sequence is fixed by its algorithm. Indices are
//! sampled as `u64` whatever the width of `usize`, so a stream gives the same values on every
//! platform.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use sha2::{Digest, Sha256};

const SIDE_A_MASK: u64 = 0xA5A5_A5A5_A5A5_A5A5;
const SIDE_B_MASK: u64 = 0x5A5A_5A5A_5A5A_5A5A;

/// The randomness a strategy is allowed to use.
pub trait Entropy {
    /// Uniform index in `0..n`. Returns `0` when `n == 0`.
    fn choose_index(&mut self, n: usize) -> usize;

    /// Uniform real in `[0, 1)`.
    fn unit(&mut self) -> f64;
}

impl dyn Entropy + '_ {
    /// Pick one element of `items` uniformly. `None` if `items` is empty.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.choose_index(items.len()))
    }
}

/// A reproducible uniform generator owned by one side of a match.
#[derive(Debug, Clone)]
pub struct RngStream {
    rng: Pcg64Mcg,
    draws: u64,
}

impl RngStream {
    /// Stream seeded directly from `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Pcg64Mcg::seed_from_u64(seed),
            draws: 0,
        }
    }

    /// Number of values drawn so far, all kinds together.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl Entropy for RngStream {
    fn choose_index(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.draws += 1;
        self.rng.gen_range(0..n as u64) as usize
    }

    fn unit(&mut self) -> f64 {
        self.draws += 1;
        self.rng.gen::<f64>()
    }
}

/// Base seed shared by both sides of the match `name_a` vs `name_b`.
pub fn match_seed(name_a: &str, name_b: &str, salt: &str) -> u64 {
    let digest = Sha256::digest(format!("{name_a}|{name_b}|{salt}").as_bytes());
    let mut low = [0u8; 8];
    low.copy_from_slice(&digest[24..32]);
    u64::from_be_bytes(low)
}

/// Derive the streams of side A and side B.
///
/// Swapping the names generally changes both streams.
pub fn derive_streams(name_a: &str, name_b: &str, salt: &str) -> (RngStream, RngStream) {
    let base = match_seed(name_a, name_b, salt);
    (
        RngStream::from_seed(base ^ SIDE_A_MASK),
        RngStream::from_seed(base ^ SIDE_B_MASK),
    )
}
