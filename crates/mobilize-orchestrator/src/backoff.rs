//! Retry ceiling and exponential backoff.

use mobilize_config::OrchestratorSettings;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub ceiling: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter_pct: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&OrchestratorSettings::default())
    }
}

impl From<&OrchestratorSettings> for RetryPolicy {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            ceiling: settings.retry_ceiling.max(1),
            base: settings.backoff_base,
            cap: settings.backoff_cap,
            jitter_pct: settings.jitter_pct.min(100),
        }
    }
}

impl RetryPolicy {
    /// Whether a failed `attempt` (1-based) has used up the stage's budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.ceiling
    }

    /// Delay before the attempt after `attempt`, without jitter:
    /// `base * 2^(attempt - 1)`, capped.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Nominal delay with `±jitter_pct` applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter_pct == 0 || nominal.is_zero() {
            return nominal;
        }
        let spread = f64::from(self.jitter_pct) / 100.0;
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        nominal.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            ceiling: 3,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            jitter_pct: 20,
        }
    }

    #[test]
    fn test_nominal_delay_doubles_then_caps() {
        let policy = policy();
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(2));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(4));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(8));
        assert_eq!(policy.nominal_delay(6), Duration::from_secs(60));
        assert_eq!(policy.nominal_delay(200), Duration::from_secs(60));
    }

    #[test]
    fn test_ceiling() {
        let policy = policy();
        assert!(!policy.exhausted(1));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_zero_ceiling_still_allows_one_attempt() {
        let settings = OrchestratorSettings {
            retry_ceiling: 0,
            ..OrchestratorSettings::default()
        };
        assert!(RetryPolicy::from(&settings).exhausted(1));
    }

    proptest! {
        #[test]
        fn test_jitter_stays_within_bounds(attempt in 1u32..20) {
            let policy = policy();
            let nominal = policy.nominal_delay(attempt).as_secs_f64();
            let delay = policy.delay(attempt).as_secs_f64();
            prop_assert!(delay >= nominal * 0.8 - 1e-6);
            prop_assert!(delay <= nominal * 1.2 + 1e-6);
        }
    }
}
