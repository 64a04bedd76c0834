//! Randomized retry delays.
//!
//! Jitter comes from a ChaCha stream that can be seeded, so tests and
//! replays get the same delay sequence.

use std::sync::Mutex;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    rng: Mutex<ChaCha8Rng>,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self::with_rng(min, max, ChaCha8Rng::from_entropy())
    }

    pub fn seeded(min: Duration, max: Duration, seed: u64) -> Self {
        Self::with_rng(min, max, ChaCha8Rng::seed_from_u64(seed))
    }

    /// No delay at all. Used by tests and by callers that pace themselves.
    pub fn none() -> Self {
        Self::seeded(Duration::ZERO, Duration::ZERO, 0)
    }

    fn with_rng(min: Duration, max: Duration, rng: ChaCha8Rng) -> Self {
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        Self {
            min,
            max,
            rng: Mutex::new(rng),
        }
    }

    /// Uniform delay in `[min, max]`.
    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        let millis = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(lo..=hi),
            Err(poisoned) => poisoned.into_inner().gen_range(lo..=hi),
        };
        Duration::from_millis(millis)
    }

    pub async fn wait(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
