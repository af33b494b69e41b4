//! Time and entropy sources fed into the signer.
//!
//! The signer never reads the wall clock or a global RNG itself; callers pass
//! these sources so identical inputs always produce identical payloads.

use rand::Rng;

// =============================================================================
// Clock
// =============================================================================

/// Source of the second-resolution timestamp (`ct`).
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn unix_secs(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock frozen at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix_secs(&self) -> i64 {
        self.0
    }
}

// =============================================================================
// Nonce
// =============================================================================

/// Largest request-sequence number and millisecond jitter.
pub const NONCE_MAX: u32 = 1000;

/// Per-request random values mixed into the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce {
    /// Request-sequence number sent as `rn` (0..=1000)
    pub sequence: u32,
    /// Milliseconds added to `ct * 1000` to form `ts` (0..=1000)
    pub jitter_ms: u32,
}

impl Nonce {
    /// Create a nonce, clamping both parts to [`NONCE_MAX`].
    pub fn new(sequence: u32, jitter_ms: u32) -> Self {
        Self {
            sequence: sequence.min(NONCE_MAX),
            jitter_ms: jitter_ms.min(NONCE_MAX),
        }
    }
}

/// Source of nonces.
pub trait NonceSource {
    /// Produce the nonce for the next request
    fn next_nonce(&mut self) -> Nonce;
}

/// Nonces drawn from an RNG.
#[derive(Debug)]
pub struct RandomNonce<R> {
    rng: R,
}

impl<R: Rng> RandomNonce<R> {
    /// Wrap an RNG
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> NonceSource for RandomNonce<R> {
    fn next_nonce(&mut self) -> Nonce {
        Nonce {
            jitter_ms: self.rng.gen_range(0..=NONCE_MAX),
            sequence: self.rng.gen_range(0..=NONCE_MAX),
        }
    }
}

/// Always returns the same nonce.
#[derive(Debug, Clone, Copy)]
pub struct FixedNonce(pub Nonce);

impl NonceSource for FixedNonce {
    fn next_nonce(&mut self) -> Nonce {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_nonce_in_range() {
        let mut source = RandomNonce::new(StdRng::seed_from_u64(11));
        for _ in 0..500 {
            let nonce = source.next_nonce();
            assert!(nonce.sequence <= NONCE_MAX);
            assert!(nonce.jitter_ms <= NONCE_MAX);
        }
    }

    #[test]
    fn test_nonce_clamps() {
        assert_eq!(Nonce::new(5000, 2), Nonce { sequence: 1000, jitter_ms: 2 });
    }

    #[test]
    fn test_fixed_sources() {
        assert_eq!(FixedClock(1_700_000_000).unix_secs(), 1_700_000_000);
        let mut fixed = FixedNonce(Nonce::new(1, 2));
        assert_eq!(fixed.next_nonce(), fixed.next_nonce());
    }
}
