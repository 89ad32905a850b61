//! Ambient-behavior policy.
//!
//! The probability gate, the pre-reply jitter, and compliment selection are
//! behind a trait so the router and assembler stay deterministic under
//! test.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jitter range for ambient replies, in seconds.
pub const AMBIENT_JITTER_SECS: (f64, f64) = (0.5, 2.0);

/// Randomness used by the fallback behaviors.
pub trait AmbientPolicy: Send + Sync {
    /// Whether an ambient reply should fire given the configured
    /// probability.
    fn should_respond(&self, probability: f64) -> bool;

    /// Delay inserted before an ambient request so replies don't look
    /// mechanical.
    fn jitter_delay(&self, range_secs: (f64, f64)) -> Duration;

    /// Pick an index into a list of `len` canned lines.
    fn choose_index(&self, len: usize) -> usize;
}

/// Production policy backed by an entropy-seeded RNG.
pub struct RandomPolicy {
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AmbientPolicy for RandomPolicy {
    fn should_respond(&self, probability: f64) -> bool {
        self.rng.lock().gen::<f64>() < probability
    }

    fn jitter_delay(&self, range_secs: (f64, f64)) -> Duration {
        let secs = self.rng.lock().gen_range(range_secs.0..range_secs.1);
        Duration::from_secs_f64(secs)
    }

    fn choose_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..len)
    }
}

/// Deterministic policy for tests and dry runs.
pub struct FixedPolicy {
    pub respond: bool,
    pub delay: Duration,
    pub index: usize,
}

impl FixedPolicy {
    /// Always respond, never delay, always pick the first line.
    pub fn eager() -> Self {
        Self {
            respond: true,
            delay: Duration::ZERO,
            index: 0,
        }
    }

    /// Never respond ambiently.
    pub fn silent() -> Self {
        Self {
            respond: false,
            delay: Duration::ZERO,
            index: 0,
        }
    }
}

impl AmbientPolicy for FixedPolicy {
    fn should_respond(&self, _probability: f64) -> bool {
        self.respond
    }

    fn jitter_delay(&self, _range_secs: (f64, f64)) -> Duration {
        self.delay
    }

    fn choose_index(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.index % len
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_policy_extremes() {
        let policy = RandomPolicy::new();
        assert!(!policy.should_respond(0.0));
        assert!(policy.should_respond(1.0));
    }

    #[test]
    fn test_random_jitter_in_range() {
        let policy = RandomPolicy::new();
        for _ in 0..50 {
            let d = policy.jitter_delay(AMBIENT_JITTER_SECS);
            assert!(d >= Duration::from_secs_f64(0.5));
            assert!(d < Duration::from_secs_f64(2.0));
        }
    }

    #[test]
    fn test_random_choose_index_bounds() {
        let policy = RandomPolicy::new();
        for _ in 0..50 {
            assert!(policy.choose_index(3) < 3);
        }
        assert_eq!(policy.choose_index(0), 0);
    }

    #[test]
    fn test_fixed_policy() {
        let policy = FixedPolicy::eager();
        assert!(policy.should_respond(0.0));
        assert_eq!(policy.jitter_delay(AMBIENT_JITTER_SECS), Duration::ZERO);
        assert_eq!(policy.choose_index(5), 0);

        let silent = FixedPolicy::silent();
        assert!(!silent.should_respond(1.0));
    }
}
