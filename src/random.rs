use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Uniform draws in `[0, 1)`. Everything stochastic in the engine goes through
/// this so ticks can be replayed.
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;

    fn range_f64(&self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Index in `0..len`; `len` must be non-zero.
    fn index(&self, len: usize) -> usize {
        let raw = (self.next_f64() * len as f64).floor() as usize;
        raw.min(len.saturating_sub(1))
    }

    fn chance(&self, probability: f64) -> bool {
        self.next_f64() < probability
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random::<f64>()
    }
}

/// Replays a fixed sequence of draws, then repeats `fallback` forever.
#[derive(Debug)]
pub struct ScriptedRandom {
    draws: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedRandom {
    pub fn new(draws: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
            fallback,
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(Vec::new(), value)
    }

    pub fn push(&self, value: f64) {
        let mut draws = self.draws.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        draws.push_back(value);
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&self) -> f64 {
        let mut draws = self.draws.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        draws.pop_front().unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::{RandomSource, ScriptedRandom, SeededRandom, ThreadRandom};

    #[test]
    fn seeded_sources_repeat() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
    }

    #[test]
    fn scripted_source_falls_back_after_script() {
        let random = ScriptedRandom::new([0.1, 0.2], 0.9);
        assert_eq!(random.next_f64(), 0.1);
        assert_eq!(random.next_f64(), 0.2);
        assert_eq!(random.next_f64(), 0.9);
        assert_eq!(random.next_f64(), 0.9);
    }

    #[test]
    fn index_stays_in_bounds() {
        let random = ScriptedRandom::new([0.0, 0.999_999], 0.5);
        assert_eq!(random.index(8), 0);
        assert_eq!(random.index(8), 7);
        assert_eq!(random.index(8), 4);

        let thread = ThreadRandom;
        for _ in 0..256 {
            assert!(thread.index(3) < 3);
            let draw = thread.next_f64();
            assert!((0.0..1.0).contains(&draw));
        }
    }
}
