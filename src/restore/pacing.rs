use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub burst_size: u32,
    pub burst_rest: Duration,
}

/// Submission pacing: a uniform random wait in `[min_delay, max_delay]`
/// between items, and a fixed rest after every `burst_size`-th attempted
/// submission. Seedable so tests can pin the draw sequence.
#[derive(Debug)]
pub struct PacingPolicy {
    cfg: PacingConfig,
    rng: StdRng,
}

impl PacingPolicy {
    pub fn new(cfg: PacingConfig) -> Self {
        Self {
            cfg,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(cfg: PacingConfig, seed: u64) -> Self {
        Self {
            cfg,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Wait to apply before the next submission, given how many
    /// submissions have been attempted so far in this run.
    pub fn next_wait(&mut self, items_sent_in_burst: u32) -> Duration {
        if items_sent_in_burst > 0 && items_sent_in_burst % self.cfg.burst_size == 0 {
            return self.cfg.burst_rest;
        }
        let min_ms = self.cfg.min_delay.as_millis() as u64;
        let max_ms = self.cfg.max_delay.as_millis() as u64;
        if min_ms >= max_ms {
            return self.cfg.min_delay;
        }
        Duration::from_millis(self.rng.random_range(min_ms..=max_ms))
    }
}
