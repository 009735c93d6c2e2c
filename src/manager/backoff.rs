//! Restart backoff after worker crashes.

use std::time::{Duration, Instant};

use rand::Rng;

/// Exponential restart delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first crash.
    pub initial: Duration,
    /// Upper bound for the delay.
    pub max: Duration,
    /// Add up to 20% random jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next spawn after `consecutive` crashes.
    ///
    /// `initial * 2^(consecutive - 1)`, capped at `max`, jittered, and never
    /// above `max`.
    pub fn delay(&self, consecutive: u32) -> Duration {
        if consecutive == 0 {
            return Duration::ZERO;
        }

        let exponent = (consecutive - 1).min(16);
        let base = self
            .initial
            .saturating_mul(1u32 << exponent)
            .min(self.max);

        if !self.jitter || base.is_zero() {
            return base;
        }

        let factor = rand::rng().random_range(1.0..1.2);
        base.mul_f64(factor).min(self.max)
    }
}

/// Consecutive crash bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct CrashHistory {
    consecutive: u32,
    last_crash: Option<Instant>,
}

impl CrashHistory {
    pub(crate) fn record_crash(&mut self) {
        self.consecutive = self.consecutive.saturating_add(1);
        self.last_crash = Some(Instant::now());
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive = 0;
        self.last_crash = None;
    }

    pub(crate) fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// How much longer a spawn must wait.
    pub(crate) fn remaining(&self, policy: &BackoffPolicy) -> Duration {
        match self.last_crash {
            Some(at) => policy.delay(self.consecutive).saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }
}
