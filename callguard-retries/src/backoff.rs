//! Backoff strategies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rule for growing the delay between successive attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Delay unchanged between attempts.
    Fixed,
    /// Delay increases by the base delay each attempt.
    Linear,
    /// Delay doubles each attempt.
    #[default]
    Exponential,
}

impl BackoffStrategy {
    /// Delay to wait after the given failed attempt (1-indexed).
    ///
    /// For base `b`: fixed `b, b, b`; linear `b, 2b, 3b`; exponential
    /// `b, 2b, 4b`. Saturates instead of overflowing.
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let step = attempt.max(1);
        match self {
            Self::Fixed => base,
            Self::Linear => base.saturating_mul(step),
            Self::Exponential => {
                let factor = 1u32.checked_shl(step - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }

    /// Parse from a configuration string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Apply a symmetric jitter of up to `factor` (0.0 to 1.0) to `delay`.
pub(crate) fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let base = delay.as_secs_f64();
    let jittered = base + base * factor.min(1.0) * random_jitter();
    Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(Duration::MAX)
}

/// Generate a random jitter factor between -1.0 and 1.0.
fn random_jitter() -> f64 {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    rng.gen_range(-1.0..1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BASE: Duration = Duration::from_millis(100);

    #[rstest]
    #[case::fixed(BackoffStrategy::Fixed, [100, 100, 100, 100])]
    #[case::linear(BackoffStrategy::Linear, [100, 200, 300, 400])]
    #[case::exponential(BackoffStrategy::Exponential, [100, 200, 400, 800])]
    fn test_delay_progression(#[case] strategy: BackoffStrategy, #[case] expected: [u64; 4]) {
        let delays: Vec<u64> = (1..=4)
            .map(|attempt| strategy.delay(BASE, attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, expected);
    }

    #[test]
    fn test_exponential_saturates() {
        let delay = BackoffStrategy::Exponential.delay(Duration::from_secs(1), 200);
        assert!(delay >= Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_parse() {
        assert_eq!(BackoffStrategy::parse("Linear"), Some(BackoffStrategy::Linear));
        assert_eq!(BackoffStrategy::parse(" fixed "), Some(BackoffStrategy::Fixed));
        assert_eq!(BackoffStrategy::parse("fibonacci"), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&BackoffStrategy::Exponential).unwrap();
        assert_eq!(json, "\"exponential\"");
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let delay = apply_jitter(Duration::from_millis(100), 0.5);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
        assert_eq!(apply_jitter(BASE, 0.0), BASE);
    }

    #[test]
    fn test_jitter_on_saturated_delay() {
        for _ in 0..20 {
            let delay = apply_jitter(Duration::MAX, 0.5);
            assert!(delay >= Duration::from_secs(u64::MAX / 4));
        }
    }
}
