//! Round Random Number Generator
//!
//! Xorshift128+ generator used for every random decision the simulation
//! makes: obstacle seeding, item drops, environmental bomb ranges and map
//! selection. Rounds only need to be reproducible in distribution, but each
//! round seed is derived from a logged nonce so a layout can be replayed.

use sha2::{Digest, Sha256};

/// Xorshift128+ PRNG.
///
/// # Example
///
/// ```
/// use bomberbox::core::rng::GameRng;
///
/// let mut a = GameRng::new(12345);
/// let mut b = GameRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug)]
pub struct GameRng {
    state: [u64; 2],
}

impl Default for GameRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl GameRng {
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

    /// Create the RNG for a given round of a server run.
    pub fn for_round(server_nonce: &[u8; 16], round: u32) -> Self {
        Self::new(derive_round_seed(server_nonce, round))
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
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.next_int(max - min + 1)
    }

    /// Roll a percentage: true with `percent` in 100 odds.
    ///
    /// `percent >= 100` always succeeds, `0` never does.
    #[inline]
    pub fn percent_chance(&mut self, percent: u8) -> bool {
        self.next_int(100) < percent as u32
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
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

/// Derive the seed of a round from the server nonce and the round number.
pub fn derive_round_seed(server_nonce: &[u8; 16], round: u32) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"BOMBERBOX_ROUND_V1");
    hasher.update(server_nonce);
    hasher.update(round.to_le_bytes());

    let hash = hasher.finalize();

    // Take first 8 bytes as seed
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
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
        let mut rng1 = GameRng::new(12345);
        let mut rng2 = GameRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = GameRng::new(12345);
        let mut rng2 = GameRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_int() {
        let mut rng = GameRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_next_int_range_inclusive() {
        let mut rng = GameRng::new(5678);
        let mut seen = [false; 3];

        for _ in 0..1000 {
            let val = rng.next_int_range(2, 4);
            assert!((2..=4).contains(&val));
            seen[(val - 2) as usize] = true;
        }

        assert!(seen.iter().all(|s| *s), "every range value should appear");
        assert_eq!(rng.next_int_range(5, 5), 5);
    }

    #[test]
    fn test_percent_chance_bounds() {
        let mut rng = GameRng::new(42);

        for _ in 0..500 {
            assert!(!rng.percent_chance(0));
            assert!(rng.percent_chance(100));
        }
    }

    #[test]
    fn test_percent_chance_distribution() {
        let mut rng = GameRng::new(31337);
        let hits = (0..10_000).filter(|_| rng.percent_chance(35)).count();

        // 35% of 10k with a generous tolerance
        assert!((3_000..4_000).contains(&hits), "got {hits} hits");
    }

    #[test]
    fn test_choose() {
        let mut rng = GameRng::new(7);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert_eq!(rng.choose(&[9]), Some(&9));
    }

    #[test]
    fn test_derive_round_seed() {
        let nonce = [1u8; 16];

        assert_eq!(derive_round_seed(&nonce, 3), derive_round_seed(&nonce, 3));
        assert_ne!(derive_round_seed(&nonce, 3), derive_round_seed(&nonce, 4));
        assert_ne!(derive_round_seed(&nonce, 3), derive_round_seed(&[2u8; 16], 3));
    }
}
