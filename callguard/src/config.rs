//! Orchestrator configuration.

use callguard_core::clock::MAX_HORIZON;
use callguard_core::CallGuardError;
use callguard_ratelimit::RateLimitConfig;
use callguard_retries::{BackoffStrategy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limit section: `count` admissions per `windowSeconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Max admissions per window.
    pub count: u32,
    /// Window length in seconds.
    pub window_seconds: f64,
}

/// Configuration for a [`RequestOrchestrator`](crate::RequestOrchestrator).
///
/// Deserializes from camelCase JSON; missing keys take their defaults.
///
/// ```json
/// {
///   "maxAttempts": 3,
///   "backoffStrategy": "exponential",
///   "baseDelaySeconds": 1,
///   "cacheEnabled": true,
///   "cacheTTLSeconds": 300,
///   "rateLimit": { "count": 60, "windowSeconds": 60 },
///   "fallbackValue": null
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    /// Total attempts per call.
    pub max_attempts: u32,
    /// Backoff between attempts.
    pub backoff_strategy: BackoffStrategy,
    /// Base delay in seconds.
    pub base_delay_seconds: f64,
    /// Cap on any single delay, in seconds.
    pub max_delay_seconds: Option<f64>,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
    /// Consult and populate the cache.
    pub cache_enabled: bool,
    /// Lifetime of cached results in seconds.
    #[serde(rename = "cacheTTLSeconds")]
    pub cache_ttl_seconds: u64,
    /// Admission control; `None` admits everything.
    pub rate_limit: Option<RateLimitSettings>,
    /// Wait for admission instead of failing fast.
    pub blocking_rate_limit: bool,
    /// Deadline for the attempt phase of one call, in seconds.
    pub request_timeout_seconds: Option<f64>,
    /// Max calls in flight during a batch.
    pub batch_concurrency: usize,
    /// Value returned when every attempt fails.
    pub fallback_value: Option<serde_json::Value>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay_seconds: 1.0,
            max_delay_seconds: None,
            jitter: 0.0,
            cache_enabled: true,
            cache_ttl_seconds: 300,
            rate_limit: None,
            blocking_rate_limit: false,
            request_timeout_seconds: None,
            batch_concurrency: 4,
            fallback_value: None,
        }
    }
}

fn seconds(value: f64, field: &str) -> Result<Duration, CallGuardError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        CallGuardError::configuration(format!("{field} must be a non-negative number, got {value}"))
    })
}

impl OrchestratorConfig {
    /// Create a default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self, CallGuardError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CallGuardError::configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `CALLGUARD_*` environment variables over the defaults.
    ///
    /// Recognized: `CALLGUARD_MAX_ATTEMPTS`, `CALLGUARD_BACKOFF_STRATEGY`,
    /// `CALLGUARD_BASE_DELAY_SECONDS`, `CALLGUARD_MAX_DELAY_SECONDS`,
    /// `CALLGUARD_JITTER`, `CALLGUARD_CACHE_ENABLED`,
    /// `CALLGUARD_CACHE_TTL_SECONDS`, `CALLGUARD_RATE_LIMIT_COUNT`,
    /// `CALLGUARD_RATE_LIMIT_WINDOW_SECONDS`, `CALLGUARD_BLOCKING_RATE_LIMIT`,
    /// `CALLGUARD_REQUEST_TIMEOUT_SECONDS`, `CALLGUARD_BATCH_CONCURRENCY`.
    pub fn from_env() -> Result<Self, CallGuardError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CallGuardError> {
        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> Result<T, CallGuardError> {
            raw.trim()
                .parse()
                .map_err(|_| CallGuardError::configuration(format!("{name}: cannot parse {raw:?}")))
        }

        let mut config = Self::default();
        if let Some(raw) = lookup("CALLGUARD_MAX_ATTEMPTS") {
            config.max_attempts = parse("CALLGUARD_MAX_ATTEMPTS", raw)?;
        }
        if let Some(raw) = lookup("CALLGUARD_BACKOFF_STRATEGY") {
            config.backoff_strategy = BackoffStrategy::parse(&raw).ok_or_else(|| {
                CallGuardError::configuration(format!(
                    "CALLGUARD_BACKOFF_STRATEGY: unknown strategy {raw:?}"
                ))
            })?;
        }
        if let Some(raw) = lookup("CALLGUARD_BASE_DELAY_SECONDS") {
            config.base_delay_seconds = parse("CALLGUARD_BASE_DELAY_SECONDS", raw)?;
        }
        if let Some(raw) = lookup("CALLGUARD_MAX_DELAY_SECONDS") {
            config.max_delay_seconds = Some(parse("CALLGUARD_MAX_DELAY_SECONDS", raw)?);
        }
        if let Some(raw) = lookup("CALLGUARD_JITTER") {
            config.jitter = parse("CALLGUARD_JITTER", raw)?;
        }
        if let Some(raw) = lookup("CALLGUARD_CACHE_ENABLED") {
            config.cache_enabled = parse("CALLGUARD_CACHE_ENABLED", raw)?;
        }
        if let Some(raw) = lookup("CALLGUARD_CACHE_TTL_SECONDS") {
            config.cache_ttl_seconds = parse("CALLGUARD_CACHE_TTL_SECONDS", raw)?;
        }
        match (
            lookup("CALLGUARD_RATE_LIMIT_COUNT"),
            lookup("CALLGUARD_RATE_LIMIT_WINDOW_SECONDS"),
        ) {
            (Some(count), window) => {
                config.rate_limit = Some(RateLimitSettings {
                    count: parse("CALLGUARD_RATE_LIMIT_COUNT", count)?,
                    window_seconds: match window {
                        Some(raw) => parse("CALLGUARD_RATE_LIMIT_WINDOW_SECONDS", raw)?,
                        None => 60.0,
                    },
                });
            }
            (None, Some(_)) => {
                return Err(CallGuardError::configuration(
                    "CALLGUARD_RATE_LIMIT_WINDOW_SECONDS requires CALLGUARD_RATE_LIMIT_COUNT",
                ));
            }
            (None, None) => {}
        }
        if let Some(raw) = lookup("CALLGUARD_BLOCKING_RATE_LIMIT") {
            config.blocking_rate_limit = parse("CALLGUARD_BLOCKING_RATE_LIMIT", raw)?;
        }
        if let Some(raw) = lookup("CALLGUARD_REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = Some(parse("CALLGUARD_REQUEST_TIMEOUT_SECONDS", raw)?);
        }
        if let Some(raw) = lookup("CALLGUARD_BATCH_CONCURRENCY") {
            config.batch_concurrency = parse("CALLGUARD_BATCH_CONCURRENCY", raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the backoff strategy and base delay.
    #[must_use]
    pub fn backoff(mut self, strategy: BackoffStrategy, base_delay_seconds: f64) -> Self {
        self.backoff_strategy = strategy;
        self.base_delay_seconds = base_delay_seconds;
        self
    }

    /// Enable caching with the given TTL.
    #[must_use]
    pub fn cache_ttl_seconds(mut self, ttl: u64) -> Self {
        self.cache_enabled = true;
        self.cache_ttl_seconds = ttl;
        self
    }

    /// Disable caching.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Admit `count` calls per `window_seconds`.
    #[must_use]
    pub fn rate_limit(mut self, count: u32, window_seconds: f64) -> Self {
        self.rate_limit = Some(RateLimitSettings {
            count,
            window_seconds,
        });
        self
    }

    /// Wait for admission instead of failing fast.
    #[must_use]
    pub fn blocking_rate_limit(mut self, blocking: bool) -> Self {
        self.blocking_rate_limit = blocking;
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub fn request_timeout_seconds(mut self, seconds: f64) -> Self {
        self.request_timeout_seconds = Some(seconds);
        self
    }

    /// Set the batch concurrency.
    #[must_use]
    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n;
        self
    }

    /// Return `value` when every attempt fails.
    #[must_use]
    pub fn fallback_value(mut self, value: serde_json::Value) -> Self {
        self.fallback_value = Some(value);
        self
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), CallGuardError> {
        if self.max_attempts == 0 {
            return Err(CallGuardError::configuration("maxAttempts must be at least 1"));
        }
        if self.batch_concurrency == 0 {
            return Err(CallGuardError::configuration(
                "batchConcurrency must be at least 1",
            ));
        }
        if self.cache_ttl_seconds > MAX_HORIZON.as_secs() {
            return Err(CallGuardError::configuration(format!(
                "cacheTTLSeconds must be at most {}",
                MAX_HORIZON.as_secs()
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(CallGuardError::configuration(
                "jitter must be between 0.0 and 1.0",
            ));
        }
        self.retry_config()?;
        self.rate_limit_config()?;
        self.request_timeout()?;
        Ok(())
    }

    /// Retry settings derived from this config.
    pub fn retry_config(&self) -> Result<RetryConfig, CallGuardError> {
        let mut retry = RetryConfig::new()
            .max_attempts(self.max_attempts)
            .strategy(self.backoff_strategy)
            .base_delay(seconds(self.base_delay_seconds, "baseDelaySeconds")?)
            .jitter(self.jitter);
        if let Some(max) = self.max_delay_seconds {
            retry = retry.max_delay(seconds(max, "maxDelaySeconds")?);
        }
        Ok(retry)
    }

    /// Rate limit settings derived from this config.
    pub fn rate_limit_config(&self) -> Result<Option<RateLimitConfig>, CallGuardError> {
        let Some(settings) = &self.rate_limit else {
            return Ok(None);
        };
        let window = seconds(settings.window_seconds, "rateLimit.windowSeconds")?;
        let config = RateLimitConfig::new(settings.count, window);
        config.validate()?;
        Ok(Some(config))
    }

    /// Cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Per-call deadline.
    pub fn request_timeout(&self) -> Result<Option<Duration>, CallGuardError> {
        self.request_timeout_seconds
            .map(|s| seconds(s, "requestTimeoutSeconds"))
            .transpose()
    }
}
