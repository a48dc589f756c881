use std::time::Duration;

/// Exponential backoff between attempts of a failed stage.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before attempt `attempt + 1`; `attempt` counts from 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base =
            self.initial.as_millis() as f64 * self.factor.powi(attempt.saturating_sub(1) as i32);
        let clamped = base.min(self.max.as_millis() as f64);
        let jittered = if self.jitter > 0.0 {
            let range = clamped * self.jitter;
            (clamped + rand::random::<f64>() * range * 2.0 - range).max(0.0)
        } else {
            clamped
        };
        Duration::from_millis(jittered as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(10), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500), 2.0)
            .with_jitter(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_range() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_secs(10), 2.0);
        for _ in 0..50 {
            let delay = backoff.delay_for(1).as_millis();
            assert!((900..=1100).contains(&delay), "{delay}");
        }
    }
}
