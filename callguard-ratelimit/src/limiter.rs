//! Sliding-window rate limiter.

use crate::persistence::WindowStore;
use crate::window::RateWindow;
use callguard_core::clock::MAX_HORIZON;
use callguard_core::{system_clock, CallGuardError, SharedClock, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Smallest wait between blocking re-evaluations.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Configuration for a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Max admissions per window. Zero denies every request.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
    /// Max sleep/re-evaluate rounds for [`RateLimiter::acquire`].
    pub max_wait_rounds: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window: Duration::from_secs(60),
            max_wait_rounds: 100,
        }
    }
}

impl RateLimitConfig {
    /// Create a config admitting `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            ..Default::default()
        }
    }

    /// Set the max number of blocking wait rounds.
    #[must_use]
    pub fn max_wait_rounds(mut self, rounds: u32) -> Self {
        self.max_wait_rounds = rounds;
        self
    }

    /// Validate the config.
    pub fn validate(&self) -> Result<(), CallGuardError> {
        if self.window.is_zero() {
            return Err(CallGuardError::configuration(
                "rate limit window must be greater than zero",
            ));
        }
        if self.window > MAX_HORIZON {
            return Err(CallGuardError::configuration(format!(
                "rate limit window must be at most {}s",
                MAX_HORIZON.as_secs()
            )));
        }
        Ok(())
    }
}

/// Sliding-window admission control over one logical caller.
///
/// The window has its own lock; [`acquire`](Self::acquire) never holds it
/// while sleeping.
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<RateWindow>,
    store: Option<Arc<dyn WindowStore>>,
    clock: SharedClock,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl RateLimiter {
    /// Create an in-memory limiter admitting `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Result<Self, CallGuardError> {
        let config = RateLimitConfig::new(limit, window);
        config.validate()?;
        Ok(Self {
            window: Mutex::new(RateWindow::new(config.limit, config.window)),
            config,
            store: None,
            clock: system_clock(),
        })
    }

    /// Create a builder.
    pub fn builder(config: RateLimitConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            config,
            clock: None,
            store: None,
        }
    }

    /// Get the limiter config.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Non-blocking admission check.
    ///
    /// Prunes stale timestamps, then admits if below the limit. With a store
    /// configured, the updated window is saved before returning; a failed
    /// save rolls the admission back and surfaces the error.
    pub async fn allow_request(&self) -> Result<bool, StorageError> {
        let mut window = self.window.lock().await;
        let now = self.clock.now();

        if !window.try_admit(now) {
            debug!(limit = self.config.limit, "Rate limit window full");
            return Ok(false);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&window.timestamps()).await {
                window.revert_last();
                warn!(error = %e, "Failed to persist rate window");
                return Err(e);
            }
        }
        Ok(true)
    }

    /// Non-blocking admission that fails with `RateLimitExceeded` when denied.
    pub async fn try_acquire(&self) -> Result<(), CallGuardError> {
        if self.allow_request().await? {
            return Ok(());
        }
        let retry_after = self.time_until_available().await;
        Err(self.denied(retry_after))
    }

    /// Blocking admission: waits for the oldest timestamp to leave the window.
    pub async fn acquire(&self) -> Result<(), CallGuardError> {
        self.acquire_with(None).await
    }

    /// Blocking admission that observes `cancel` between waits.
    ///
    /// A zero limit can never admit and fails immediately. After
    /// `max_wait_rounds` unsuccessful rounds the denial is surfaced.
    pub async fn acquire_with(&self, cancel: Option<&CancellationToken>) -> Result<(), CallGuardError> {
        if self.config.limit == 0 {
            return Err(self.denied(None));
        }

        let mut last_wait = None;
        for round in 0..self.config.max_wait_rounds.max(1) {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(CallGuardError::Cancelled);
            }

            if self.allow_request().await? {
                return Ok(());
            }

            let wait = self
                .time_until_available()
                .await
                .unwrap_or(MIN_WAIT)
                .max(MIN_WAIT);
            last_wait = Some(wait);
            debug!(round, wait_ms = wait.as_millis() as u64, "Waiting for rate window");

            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(CallGuardError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                },
                None => tokio::time::sleep(wait).await,
            }
        }

        warn!(rounds = self.config.max_wait_rounds, "Gave up waiting for rate window");
        Err(self.denied(last_wait))
    }

    /// Clear the window and overwrite persisted state.
    pub async fn reset(&self) -> Result<(), StorageError> {
        let mut window = self.window.lock().await;
        window.clear();
        if let Some(store) = &self.store {
            store.save(&[]).await?;
        }
        Ok(())
    }

    /// Admissions left right now.
    pub async fn remaining(&self) -> u32 {
        let now = self.clock.now();
        self.window.lock().await.remaining(now)
    }

    /// Time until the next admission is possible, or `None` if one is now.
    pub async fn time_until_available(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.window.lock().await.wait_time(now)
    }

    /// Retained admission timestamps, oldest first.
    pub async fn snapshot(&self) -> Vec<DateTime<Utc>> {
        self.window.lock().await.timestamps()
    }

    fn denied(&self, retry_after: Option<Duration>) -> CallGuardError {
        CallGuardError::rate_limited(self.config.limit, self.config.window, retry_after)
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
    config: RateLimitConfig,
    clock: Option<SharedClock>,
    store: Option<Arc<dyn WindowStore>>,
}

impl RateLimiterBuilder {
    /// Use a custom clock.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persist the window in `store`.
    #[must_use]
    pub fn store(mut self, store: impl WindowStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Persist the window in a shared store.
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the limiter, hydrating the window from the store if present.
    pub async fn build(self) -> Result<RateLimiter, CallGuardError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(system_clock);

        let mut window = match &self.store {
            Some(store) => match store.load().await? {
                Some(timestamps) => {
                    RateWindow::hydrate(self.config.limit, self.config.window, timestamps)
                }
                None => RateWindow::new(self.config.limit, self.config.window),
            },
            None => RateWindow::new(self.config.limit, self.config.window),
        };
        let pruned = window.prune(clock.now());
        debug!(
            retained = window.len(),
            pruned,
            persistent = self.store.is_some(),
            "Rate limiter initialized"
        );

        Ok(RateLimiter {
            config: self.config,
            window: Mutex::new(window),
            store: self.store,
            clock,
        })
    }
}
