//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ for fast, seedable randomness.
//! Every random decision of a match (turn order shuffle, energy assignment,
//! pre-charged boards) goes through this generator, so a match is reproducible
//! from its seed.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use chain_reaction::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a match seed from the server seed, the match id and the roster.
///
/// `player_names` MUST be sorted; the server passes its registry order.
pub fn derive_match_seed(server_seed: u64, match_id: &[u8; 16], player_names: &[&str]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"CHAIN_REACTION_SEED_V1");
    hasher.update(server_seed.to_le_bytes());
    hasher.update(match_id);

    for name in player_names {
        hasher.update((name.len() as u32).to_le_bytes());
        hasher.update(name.as_bytes());
    }

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_int() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng1 = DeterministicRng::new(1111);
        let mut rng2 = DeterministicRng::new(1111);

        let mut arr1 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut arr2 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        rng1.shuffle(&mut arr1);
        rng2.shuffle(&mut arr2);
        assert_eq!(arr1, arr2);

        arr1.sort();
        assert_eq!(arr1, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_derive_match_seed() {
        let match_id = [1u8; 16];
        let seed1 = derive_match_seed(7, &match_id, &["alice", "bob"]);
        let seed2 = derive_match_seed(7, &match_id, &["alice", "bob"]);
        assert_eq!(seed1, seed2);

        let seed3 = derive_match_seed(7, &match_id, &["alice", "carol"]);
        assert_ne!(seed1, seed3);

        let seed4 = derive_match_seed(8, &match_id, &["alice", "bob"]);
        assert_ne!(seed1, seed4);
    }
}
