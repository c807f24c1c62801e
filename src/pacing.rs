use rand::Rng;
use std::time::Duration;

use crate::config::PacingSettings;

/// Randomised, progress-weighted delays between requests.
///
/// A base delay is drawn uniformly from `[min_delay, max_delay]`, grows
/// linearly with batch progress by up to `growth`, is multiplied by a jitter
/// factor from `[1 - jitter, 1 + jitter]` and finally clamped to `cap`.
#[derive(Debug, Clone)]
pub struct Pacing {
    settings: PacingSettings,
}

impl Pacing {
    pub fn new(settings: PacingSettings) -> Self {
        Self { settings }
    }

    /// Same policy with a different base range, e.g. from a batch request.
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        if let Some(min) = min {
            self.settings.min_delay = secs_or(min, self.settings.cap);
        }
        if let Some(max) = max {
            self.settings.max_delay = secs_or(max, self.settings.cap);
        }
        if self.settings.max_delay > self.settings.cap {
            self.settings.cap = self.settings.max_delay;
        }
        self
    }

    pub fn article_delay<R: Rng + ?Sized>(&self, done: usize, total: usize, rng: &mut R) -> Duration {
        self.delay(done, total, 1.0, rng)
    }

    pub fn board_delay<R: Rng + ?Sized>(&self, done: usize, total: usize, rng: &mut R) -> Duration {
        self.delay(done, total, self.settings.board_factor, rng)
    }

    fn delay<R: Rng + ?Sized>(&self, done: usize, total: usize, factor: f64, rng: &mut R) -> Duration {
        let s = &self.settings;
        let (lo, hi) = {
            let a = s.min_delay.as_secs_f64();
            let b = s.max_delay.as_secs_f64();
            if a <= b {
                (a, b)
            } else {
                (b, a)
            }
        };
        let base = if hi > lo { rng.gen_range(lo..=hi) } else { lo };

        let progress = if total == 0 {
            0.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        let jitter = s.jitter.clamp(0.0, 1.0);
        let multiplier = if jitter > 0.0 {
            rng.gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };

        let secs = base * factor.max(0.0) * (1.0 + s.growth.max(0.0) * progress) * multiplier;
        secs_or(secs, s.cap).min(s.cap)
    }
}

/// Non-negative seconds as a `Duration`, or `fallback` when out of range.
fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(fallback)
}
