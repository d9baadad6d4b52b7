use std::time::Duration;

use rand::Rng;

use incidentqa_core::config::OrchestratorSettings;

/// Exponential backoff with multiplicative jitter in `[0.5, 1.0]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn from_settings(s: &OrchestratorSettings) -> Self {
        Self { base: Duration::from_millis(s.backoff_base_ms), max: Duration::from_millis(s.backoff_max_ms), max_retries: s.max_rate_limit_retries }
    }

    /// Upper bound before jitter: `min(base * 2^attempt, max)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt)).min(self.max)
    }

    /// Delay before retry number `attempt` (0-based). A server-provided
    /// `retry_after` raises the delay, still bounded by `max`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        let d = self.ceiling(attempt).mul_f64(jitter);
        match retry_after {
            Some(ra) => ra.min(self.max).max(d),
            None => d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff { Backoff { base: Duration::from_millis(100), max: Duration::from_millis(500), max_retries: 3 } }

    #[test]
    fn ceiling_doubles_then_caps() {
        let b = backoff();
        assert_eq!(b.ceiling(0), Duration::from_millis(100));
        assert_eq!(b.ceiling(1), Duration::from_millis(200));
        assert_eq!(b.ceiling(2), Duration::from_millis(400));
        assert_eq!(b.ceiling(3), Duration::from_millis(500));
        assert_eq!(b.ceiling(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_in_band() {
        let b = backoff();
        for attempt in 0..4 {
            for _ in 0..50 {
                let d = b.delay(attempt, None);
                let (d, c) = (d.as_secs_f64(), b.ceiling(attempt).as_secs_f64());
                assert!(d >= c * 0.5 - 1e-6 && d <= c + 1e-6);
            }
        }
    }

    #[test]
    fn retry_after_is_honored_up_to_max() {
        let b = backoff();
        assert_eq!(b.delay(0, Some(Duration::from_millis(300))), Duration::from_millis(300));
        assert_eq!(b.delay(0, Some(Duration::from_secs(30))), Duration::from_millis(500));
    }
}
