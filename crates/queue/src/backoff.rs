use rand::Rng;
use std::time::Duration;

/// Exponential backoff with proportional jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub start: Duration,
    pub factor: f64,
    pub max: Duration,
    /// Fraction of the delay randomised in both directions (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for Backoff {
    /// The dependency-wait policy: 2s doubling up to 60s, 20% jitter.
    fn default() -> Self {
        Backoff {
            start: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based), jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.start.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped = base.min(self.max.as_secs_f64());
        let spread = capped * self.jitter;
        let jittered = if spread > 0.0 {
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    /// Delay without jitter, for tests and deterministic schedules.
    pub fn delay_exact(&self, attempt: u32) -> Duration {
        let base = self.start.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_exact(0), Duration::from_secs(2));
        assert_eq!(backoff.delay_exact(1), Duration::from_secs(4));
        assert_eq!(backoff.delay_exact(4), Duration::from_secs(32));
        assert_eq!(backoff.delay_exact(5), Duration::from_secs(60));
        assert_eq!(backoff.delay_exact(20), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = Backoff::default();
        for _ in 0..100 {
            let delay = backoff.delay(3).as_secs_f64();
            // 16s ± 20%
            assert!((12.8..=19.2).contains(&delay), "{delay}");
        }
    }
}
