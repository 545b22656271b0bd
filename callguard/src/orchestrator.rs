//! Sequencing of admission, cache lookup and retries around one call.

use crate::config::OrchestratorConfig;
use crate::outcome::CallOutcome;
use callguard_cache::CacheStore;
use callguard_core::{BoxedTransport, CallGuardError, CallRequest, Payload, Transport};
use callguard_ratelimit::{RateLimiter, WindowStore};
use callguard_retries::{RetryConfig, RetryExecutor, RetryOutcome};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs calls through rate limiting, caching and retries.
///
/// For each call:
///
/// 1. Admission through the rate limiter. A denial fails the call with
///    [`CallGuardError::RateLimitExceeded`] before the cache is consulted,
///    unless blocking admission is configured, in which case it waits.
/// 2. Cache lookup under the request's cache key. A hit returns
///    [`CallOutcome::Cached`] without running the operation.
/// 3. The operation runs under the retry executor. Success is written back
///    to the cache and returned as [`CallOutcome::Fresh`]. Exhaustion returns
///    the configured fallback (never cached) or
///    [`CallGuardError::ExhaustedRetries`].
///
/// # Example
///
/// ```ignore
/// use callguard::prelude::*;
///
/// let orchestrator = RequestOrchestrator::builder(
///     OrchestratorConfig::new().rate_limit(10, 1.0).cache_ttl_seconds(600),
/// )
/// .transport(HttpTransport::new())
/// .build()
/// .await?;
///
/// let outcome = orchestrator.send(&CallRequest::get("https://api.example.com/users/123")).await?;
/// ```
pub struct RequestOrchestrator {
    config: OrchestratorConfig,
    retry: RetryConfig,
    timeout: Option<Duration>,
    cache: Option<Arc<CacheStore>>,
    limiter: Option<Arc<RateLimiter>>,
    transport: Option<BoxedTransport>,
    cancel: CancellationToken,
}

impl fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .field("rate_limited", &self.limiter.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl RequestOrchestrator {
    /// Create a builder.
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            cache: None,
            limiter: None,
            window_store: None,
            transport: None,
            cancel: None,
        }
    }

    /// Get the config.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The cache, when caching is enabled.
    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    /// The rate limiter, when one is configured.
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// Token observed by every call; cancelling it aborts waits and retries.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every in-flight and future call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `operation` as the call identified by `request`.
    pub async fn execute<T, F, Fut, E>(
        &self,
        request: &CallRequest,
        operation: F,
    ) -> Result<CallOutcome<T>, CallGuardError>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if self.cancel.is_cancelled() {
            return Err(CallGuardError::Cancelled);
        }

        let fallback = self.fallback()?;
        self.admit(request).await?;

        let key = request.cache_key();
        if let Some(cache) = &self.cache {
            if let Some(value) = cache.retrieve::<T>(&key).await {
                debug!(method = %request.method, endpoint = %request.endpoint, "Served from cache");
                return Ok(CallOutcome::Cached { value });
            }
        }

        let executor = RetryExecutor::new(self.retry.clone())
            .fallback(fallback)
            .with_cancellation(self.cancel.clone());
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, executor.retry(operation))
                .await
                .map_err(|_| {
                    warn!(endpoint = %request.endpoint, timeout_ms = limit.as_millis() as u64, "Call timed out");
                    CallGuardError::Timeout(limit)
                })?,
            None => executor.retry(operation).await,
        };

        match outcome {
            RetryOutcome::Success { value, state } => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(&key, &value, self.config.cache_ttl()).await {
                        warn!(endpoint = %request.endpoint, error = %e, "Cache write-back failed");
                    }
                }
                Ok(CallOutcome::Fresh {
                    value,
                    attempts: state.attempt,
                })
            }
            RetryOutcome::Fallback { value, state } => {
                warn!(
                    endpoint = %request.endpoint,
                    attempts = state.attempt,
                    last_error = state.last_error.as_deref().unwrap_or_default(),
                    "Returning fallback value"
                );
                Ok(CallOutcome::Fallback {
                    value,
                    attempts: state.attempt,
                    last_error: state.last_error.unwrap_or_default(),
                })
            }
            RetryOutcome::Exhausted { state } => {
                warn!(endpoint = %request.endpoint, attempts = state.attempt, "Retries exhausted");
                Err(CallGuardError::exhausted(
                    state.attempt,
                    state.last_error.unwrap_or_default(),
                ))
            }
            RetryOutcome::Cancelled { .. } => Err(CallGuardError::Cancelled),
        }
    }

    /// Send `request` through the configured transport.
    pub async fn send(&self, request: &CallRequest) -> Result<CallOutcome<Payload>, CallGuardError> {
        let transport = self.transport()?;
        self.execute(request, move || transport.send(request)).await
    }

    /// Run `operation` for each request, at most `batchConcurrency` at a time.
    ///
    /// Results come back in input order; one failure does not affect the
    /// other items.
    pub async fn execute_batch<T, F, Fut, E>(
        &self,
        requests: &[CallRequest],
        operation: F,
    ) -> Vec<Result<CallOutcome<T>, CallGuardError>>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: Fn(CallRequest) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let operation = &operation;
        stream::iter(requests)
            .map(|request| self.execute(request, move || operation(request.clone())))
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }

    /// Send each request through the configured transport, at most
    /// `batchConcurrency` at a time, preserving input order.
    pub async fn send_batch(
        &self,
        requests: &[CallRequest],
    ) -> Vec<Result<CallOutcome<Payload>, CallGuardError>> {
        stream::iter(requests)
            .map(|request| self.send(request))
            .buffered(self.config.batch_concurrency.max(1))
            .collect()
            .await
    }

    async fn admit(&self, request: &CallRequest) -> Result<(), CallGuardError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let admitted = if self.config.blocking_rate_limit {
            limiter.acquire_with(Some(&self.cancel)).await
        } else {
            limiter.try_acquire().await
        };
        if let Err(e) = &admitted {
            warn!(endpoint = %request.endpoint, error = %e, "Call not admitted");
        }
        admitted
    }

    fn fallback<T: DeserializeOwned>(&self) -> Result<Option<T>, CallGuardError> {
        self.config
            .fallback_value
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                CallGuardError::configuration(format!("fallbackValue does not match the result type: {e}"))
            })
    }

    fn transport(&self) -> Result<&BoxedTransport, CallGuardError> {
        self.transport
            .as_ref()
            .ok_or_else(|| CallGuardError::configuration("no transport configured"))
    }
}

/// Builder for [`RequestOrchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    cache: Option<Arc<CacheStore>>,
    limiter: Option<Arc<RateLimiter>>,
    window_store: Option<Arc<dyn WindowStore>>,
    transport: Option<BoxedTransport>,
    cancel: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    /// Use `cache` instead of a default in-memory store.
    #[must_use]
    pub fn cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Use a cache shared with other components.
    #[must_use]
    pub fn shared_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use `limiter` instead of one built from the config.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Persist the config-built limiter's window in `store`.
    #[must_use]
    pub fn window_store(mut self, store: impl WindowStore + 'static) -> Self {
        self.window_store = Some(Arc::new(store));
        self
    }

    /// Transport used by [`RequestOrchestrator::send`].
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Observe an external cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate the config and assemble the orchestrator.
    pub async fn build(self) -> Result<RequestOrchestrator, CallGuardError> {
        self.config.validate()?;
        let retry = self.config.retry_config()?;
        let timeout = self.config.request_timeout()?;

        let cache = if self.config.cache_enabled {
            Some(
                self.cache
                    .unwrap_or_else(|| Arc::new(CacheStore::in_memory())),
            )
        } else {
            None
        };

        let limiter = match (self.limiter, self.config.rate_limit_config()?) {
            (Some(limiter), _) => Some(limiter),
            (None, Some(limit)) => {
                let mut builder = RateLimiter::builder(limit);
                if let Some(store) = self.window_store {
                    builder = builder.shared_store(store);
                }
                Some(Arc::new(builder.build().await?))
            }
            (None, None) => None,
        };

        debug!(
            cache = cache.is_some(),
            rate_limited = limiter.is_some(),
            max_attempts = retry.max_attempts,
            "Orchestrator initialized"
        );

        Ok(RequestOrchestrator {
            config: self.config,
            retry,
            timeout,
            cache,
            limiter,
            transport: self.transport,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callguard_cache::MemoryBackend;
    use callguard_core::TransportError;
    use callguard_retries::BackoffStrategy;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::new()
            .max_attempts(3)
            .backoff(BackoffStrategy::Fixed, 0.01)
    }

    #[derive(Debug, Default)]
    struct CountingTransport {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, request: &CallRequest) -> Result<Payload, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(TransportError::http(503, "unavailable"));
            }
            Ok(Payload::from(format!("{} #{n}", request.endpoint)))
        }
    }

    #[tokio::test]
    async fn test_identical_calls_hit_transport_once() {
        let transport = Arc::new(CountingTransport::default());
        let orchestrator = RequestOrchestrator::builder(fast_config())
            .transport(transport.clone())
            .build()
            .await
            .unwrap();
        let request = CallRequest::get("https://api.example.com/users").param("id", "123");

        let first = orchestrator.send(&request).await.unwrap();
        let second = orchestrator.send(&request).await.unwrap();

        assert!(first.is_fresh());
        assert!(second.is_cached());
        assert_eq!(first.value(), second.value());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(CountingTransport {
            fail_first: 2,
            ..Default::default()
        });
        let orchestrator = RequestOrchestrator::builder(fast_config())
            .transport(transport.clone())
            .build()
            .await
            .unwrap();

        let outcome = orchestrator.send(&CallRequest::get("/flaky")).await.unwrap();
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.value().text().unwrap(), "/flaky #3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_is_not_cached() {
        let orchestrator = RequestOrchestrator::builder(
            fast_config().fallback_value(json!({"name": "anonymous"})),
        )
        .build()
        .await
        .unwrap();
        let request = CallRequest::get("/users/1");
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let outcome = orchestrator
            .execute(&request, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<User, _>("down")
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CallOutcome::Fallback {
                value: User {
                    name: "anonymous".to_string()
                },
                attempts: 3,
                last_error: "down".to_string(),
            }
        );
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        let cache = orchestrator.cache().unwrap();
        assert!(!cache.exists(&request.cache_key()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_fallback() {
        let orchestrator = RequestOrchestrator::builder(fast_config())
            .build()
            .await
            .unwrap();

        let err = orchestrator
            .execute(&CallRequest::get("/down"), || async { Err::<u32, _>("refused") })
            .await
            .unwrap_err();

        match err {
            CallGuardError::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "refused");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_denial_skips_cache_and_operation() {
        let orchestrator = RequestOrchestrator::builder(fast_config().rate_limit(1, 60.0))
            .build()
            .await
            .unwrap();
        let request = CallRequest::get("/users/1");
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let op = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(User {
                name: "John Doe".to_string(),
            })
        };

        orchestrator.execute(&request, op).await.unwrap();
        let err = orchestrator.execute(&request, op).await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.cache().unwrap().stats().hits, 0);
    }

    #[tokio::test]
    async fn test_blocking_rate_limit_waits() {
        let orchestrator = RequestOrchestrator::builder(
            fast_config()
                .without_cache()
                .rate_limit(1, 0.2)
                .blocking_rate_limit(true),
        )
        .build()
        .await
        .unwrap();

        let start = tokio::time::Instant::now();
        orchestrator
            .execute(&CallRequest::get("/a"), || async { Ok::<_, String>(1) })
            .await
            .unwrap();
        orchestrator
            .execute(&CallRequest::get("/b"), || async { Ok::<_, String>(2) })
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_cache_disabled_always_runs() {
        let orchestrator = RequestOrchestrator::builder(fast_config().without_cache())
            .build()
            .await
            .unwrap();
        let request = CallRequest::get("/users/1");
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let op = move || async move { Ok::<_, String>(calls.fetch_add(1, Ordering::SeqCst)) };

        orchestrator.execute(&request, op).await.unwrap();
        orchestrator.execute(&request, op).await.unwrap();

        assert!(orchestrator.cache().is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_isolates_failures() {
        let orchestrator = RequestOrchestrator::builder(
            fast_config().max_attempts(1).batch_concurrency(2),
        )
        .build()
        .await
        .unwrap();
        let requests: Vec<CallRequest> = ["/1", "/2", "/fail", "/4"]
            .into_iter()
            .map(CallRequest::get)
            .collect();

        let results = orchestrator
            .execute_batch(&requests, |request| async move {
                if request.endpoint == "/fail" {
                    Err("boom".to_string())
                } else {
                    Ok(request.endpoint)
                }
            })
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().value(), "/1");
        assert_eq!(results[1].as_ref().unwrap().value(), "/2");
        assert!(results[2].is_err());
        assert_eq!(results[3].as_ref().unwrap().value(), "/4");
    }

    #[tokio::test]
    async fn test_send_batch_uses_transport() {
        let transport = Arc::new(CountingTransport::default());
        let orchestrator = RequestOrchestrator::builder(fast_config())
            .transport(transport.clone())
            .build()
            .await
            .unwrap();
        let requests = vec![CallRequest::get("/x"), CallRequest::get("/y"), CallRequest::get("/x")];

        let results = orchestrator.send_batch(&requests).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(transport.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_send_without_transport_is_configuration_error() {
        let orchestrator = RequestOrchestrator::builder(fast_config()).build().await.unwrap();
        let err = orchestrator.send(&CallRequest::get("/x")).await.unwrap_err();
        assert!(matches!(err, CallGuardError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let orchestrator = RequestOrchestrator::builder(
            fast_config().without_cache().request_timeout_seconds(1.0),
        )
        .build()
        .await
        .unwrap();

        let err = orchestrator
            .execute(&CallRequest::get("/slow"), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, String>(1)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CallGuardError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_cancelled_orchestrator_rejects_calls() {
        let orchestrator = RequestOrchestrator::builder(fast_config()).build().await.unwrap();
        orchestrator.cancel();

        let err = orchestrator
            .execute(&CallRequest::get("/x"), || async { Ok::<_, String>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, CallGuardError::Cancelled));
    }

    #[rstest]
    #[case::first_try(0, 1)]
    #[case::after_one_failure(1, 2)]
    #[case::last_attempt(2, 3)]
    #[tokio::test]
    async fn test_send_reports_attempts(#[case] fail_first: u32, #[case] attempts: u32) {
        let transport = Arc::new(CountingTransport {
            fail_first,
            ..Default::default()
        });
        let orchestrator = RequestOrchestrator::builder(fast_config())
            .transport(transport.clone())
            .build()
            .await
            .unwrap();

        let outcome = orchestrator.send(&CallRequest::get("/items")).await.unwrap();

        assert!(outcome.is_fresh());
        assert_eq!(outcome.attempts(), attempts);
        assert_eq!(transport.calls.load(Ordering::SeqCst), attempts);
    }

    #[cfg(feature = "http")]
    mod http {
        use super::*;
        use pretty_assertions::assert_eq;
        use callguard_core::HttpTransport;
        use tokio_test::assert_ok;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_http_call_retried_then_cached() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/users"))
                .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/users"))
                .and(query_param("id", "123"))
                .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"John Doe"}"#))
                .mount(&server)
                .await;

            let orchestrator = RequestOrchestrator::builder(fast_config())
                .transport(HttpTransport::new())
                .build()
                .await
                .unwrap();
            let request = CallRequest::get(format!("{}/users", server.uri())).param("id", "123");

            let first = assert_ok!(orchestrator.send(&request).await);
            assert_eq!(first.attempts(), 2);
            assert_eq!(first.value().text().unwrap(), r#"{"name":"John Doe"}"#);

            let second = assert_ok!(orchestrator.send(&request).await);
            assert!(second.is_cached());
            assert_eq!(second.value(), first.value());
            assert_eq!(server.received_requests().await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_mismatched_fallback_is_configuration_error() {
        let orchestrator = RequestOrchestrator::builder(
            fast_config().rate_limit(1, 60.0).fallback_value(json!("text")),
        )
        .cache(CacheStore::builder(MemoryBackend::new()).build().unwrap())
        .build()
        .await
        .unwrap();

        let err = orchestrator
            .execute(&CallRequest::get("/x"), || async { Ok::<u32, String>(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, CallGuardError::Configuration(_)));

        // The rejected call leaves the rate window untouched.
        assert_eq!(orchestrator.rate_limiter().unwrap().remaining().await, 1);
    }
}
