//! Request router: key x model fallback over a quota-metered API
//!
//! Pairs are tried in fixed priority order: every model of key 1 (in chain
//! order), then every model of key 2, and so on. Pairs already marked
//! exhausted today are skipped without a call. Per attempt:
//!
//! - success → return immediately
//! - `Dead` / `DailyExhausted` → mark the pair, move to the next pair
//! - `RateLimited` → wait and retry the same pair; once retries are spent,
//!   mark it (a persistent per-minute limit is as good as spent for today)
//! - `Fatal` → return the caller's error at once; no marks, no fallback
//!
//! Only quota failures fall back. A malformed request or a bad key would fail
//! the same way on every pair, so retrying it elsewhere would only burn quota
//! and hide the bug.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::binding::SharedCredential;
use crate::classify::{Classification, Classifier, GeminiClassifier};
use crate::credentials::{Credential, CredentialPool};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::ModelChain;
use crate::report::AvailabilityReport;
use crate::state::QuotaStore;

/// Retry and backoff settings for rate-limited pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per pair before a rate-limited pair is marked exhausted.
    pub max_retries_per_pair: u32,
    /// Added on top of a server-suggested delay.
    pub buffer: Duration,
    /// First wait when the server suggested nothing; doubles per attempt.
    pub backoff_base: Duration,
    /// Cap for the doubling backoff (not applied to server-suggested delays).
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_pair: 2,
            buffer: Duration::from_secs(2),
            backoff_base: Duration::from_secs(10),
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after the `attempt`-th (1-based) rate-limited attempt.
    pub fn delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        match suggested {
            Some(delay) => delay + self.buffer,
            None => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.backoff_base
                    .saturating_mul(factor)
                    .min(self.max_backoff)
            }
        }
    }
}

/// Context handed to the unit of work for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    /// Key to authenticate this attempt with.
    pub credential: &'a Credential,
    /// Model to request.
    pub model: &'a str,
    /// 1-based attempt number on this pair.
    pub attempt: u32,
}

/// Routes units of work across the key pool and model chain.
pub struct Router {
    pool: CredentialPool,
    chain: ModelChain,
    store: Arc<QuotaStore>,
    classifier: Arc<dyn Classifier>,
    policy: RetryPolicy,
    binding: Option<SharedCredential>,
}

impl Router {
    /// Router over `pool` using the default model chain, Gemini error
    /// vocabulary, and default retry policy.
    pub fn new(pool: CredentialPool, store: Arc<QuotaStore>) -> Self {
        Self {
            pool,
            chain: ModelChain::default(),
            store,
            classifier: Arc::new(GeminiClassifier),
            policy: RetryPolicy::default(),
            binding: None,
        }
    }

    /// Replace the default model chain.
    pub fn with_chain(mut self, chain: ModelChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bind each attempt's key into `shared` for the duration of the attempt.
    pub fn with_binding(mut self, shared: SharedCredential) -> Self {
        self.binding = Some(shared);
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn chain(&self) -> &ModelChain {
        &self.chain
    }

    pub fn store(&self) -> &Arc<QuotaStore> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` with the default chain and retry policy.
    pub async fn execute<'a, T, E, F, Fut>(&'a self, work: F) -> Result<T>
    where
        F: FnMut(Attempt<'a>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_with(&self.chain, self.policy.max_retries_per_pair, work)
            .await
    }

    /// Run `work` against `chain`, allowing `max_retries_per_pair` attempts
    /// on a rate-limited pair.
    ///
    /// Returns the first successful payload, `Error::Fatal` for a non-quota
    /// failure, or `Error::AllExhausted` when no pair is left.
    pub async fn execute_with<'a, T, E, F, Fut>(
        &'a self,
        chain: &'a ModelChain,
        max_retries_per_pair: u32,
        mut work: F,
    ) -> Result<T>
    where
        F: FnMut(Attempt<'a>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let max_attempts = max_retries_per_pair.max(1);

        if self.remaining(chain, 0).await == 0 {
            return Err(self.all_exhausted(chain).await);
        }

        for credential in self.pool.iter() {
            let key = credential.index() + 1;

            if self.alive_models(chain, credential).await == 0 {
                info!(key, keys = self.pool.len(), "all models exhausted for key, skipping");
                continue;
            }

            for (priority, model) in chain.iter().enumerate() {
                if self.store.is_exhausted(credential.index(), model).await {
                    continue;
                }

                let mut attempt = 1;
                loop {
                    debug!(key, model = %model, attempt, max_attempts, "attempting");

                    let outcome = {
                        let _bound = self.binding.as_ref().map(|b| b.bind(credential));
                        work(Attempt {
                            credential,
                            model: model.as_str(),
                            attempt,
                        })
                        .await
                    };

                    let err = match outcome {
                        Ok(payload) => {
                            metrics::record_attempt(model, "success");
                            if credential.index() > 0 || priority > 0 {
                                info!(key, model = %model, "fallback succeeded");
                            }
                            return Ok(payload);
                        }
                        Err(err) => err,
                    };

                    let classification = self.classifier.classify(&err.to_string());
                    metrics::record_attempt(model, classification.label());

                    match classification {
                        Classification::Dead => {
                            warn!(key, model = %model, "model not available, skipping");
                            self.mark(credential, model, "dead").await;
                            break;
                        }
                        Classification::DailyExhausted => {
                            warn!(key, model = %model, "daily quota exhausted, trying next combination");
                            self.mark(credential, model, "daily_exhausted").await;
                            break;
                        }
                        Classification::RateLimited { retry_after } => {
                            if attempt < max_attempts {
                                let wait = self.policy.delay(attempt, retry_after);
                                warn!(
                                    key,
                                    model = %model,
                                    attempt,
                                    max_attempts,
                                    wait_secs = wait.as_secs_f64(),
                                    "rate limited, waiting before retry"
                                );
                                tokio::time::sleep(wait).await;
                                attempt += 1;
                                continue;
                            }
                            warn!(key, model = %model, "rate limited and retries spent, trying next combination");
                            self.mark(credential, model, "rate_limited").await;
                            break;
                        }
                        Classification::Fatal => {
                            return Err(Error::Fatal {
                                credential: credential.index(),
                                model: model.clone(),
                                source: Box::new(err),
                            });
                        }
                    }
                }
            }

            if credential.index() + 1 < self.pool.len() {
                let remaining = self.remaining(chain, credential.index() + 1).await;
                if remaining > 0 {
                    info!(from = key, to = key + 1, remaining, "switching key");
                }
            }
        }

        Err(self.all_exhausted(chain).await)
    }

    /// Per-pair availability for the default chain. Read-only.
    pub async fn report_availability(&self) -> AvailabilityReport {
        AvailabilityReport::collect(&self.store, &self.pool, &self.chain).await
    }

    /// Forget all exhausted marks before the natural UTC rollover.
    pub async fn reset_state(&self) -> Result<()> {
        self.store.reset().await
    }

    /// Unexhausted pairs for keys at position `from` and later.
    async fn remaining(&self, chain: &ModelChain, from: usize) -> usize {
        let mut count = 0;
        for credential in self.pool.iter().skip(from) {
            for model in chain.iter() {
                if !self.store.is_exhausted(credential.index(), model).await {
                    count += 1;
                }
            }
        }
        count
    }

    /// Unexhausted models for one key.
    async fn alive_models(&self, chain: &ModelChain, credential: &Credential) -> usize {
        let mut count = 0;
        for model in chain.iter() {
            if !self.store.is_exhausted(credential.index(), model).await {
                count += 1;
            }
        }
        count
    }

    async fn mark(&self, credential: &Credential, model: &str, reason: &'static str) {
        match self.store.mark_exhausted(credential.index(), model).await {
            Ok(true) => metrics::record_exhausted_mark(reason),
            Ok(false) => {}
            Err(e) => {
                metrics::record_exhausted_mark(reason);
                warn!(
                    key = credential.index() + 1,
                    model,
                    error = %e,
                    "failed to persist exhausted mark, keeping it in memory only"
                );
            }
        }
    }

    async fn all_exhausted(&self, chain: &ModelChain) -> Error {
        let summary = self.store.summary(self.pool.len(), chain.as_slice()).await;
        metrics::record_all_exhausted();
        warn!(
            date = %summary.date,
            available = summary.available,
            total = summary.total,
            "all key/model combinations exhausted"
        );
        Error::AllExhausted {
            summary,
            remediation: remediation(self.pool.prefix()),
        }
    }
}

fn remediation(prefix: &str) -> String {
    format!(
        "Solutions:\n  \
         1. Add more keys: {prefix}_2=... (each key must come from a different account;\n     \
         keys from the same account share one quota pool)\n  \
         2. Wait until midnight UTC for the daily reset"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{ManualClock, day};
    use crate::state::{QuotaSnapshot, QuotaStore};
    use crate::storage::{MemoryStorage, QuotaStorage, StorageFuture};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Upstream(String);

    fn fail<T>(raw: &str) -> std::result::Result<T, Upstream> {
        Err(Upstream(raw.to_string()))
    }

    const DAILY: &str = "429 RESOURCE_EXHAUSTED: You exceeded your current quota";
    const DEAD: &str = "404 NOT_FOUND: models/model-a is not found";

    struct Harness {
        storage: Arc<MemoryStorage>,
        router: Router,
    }

    fn harness(keys: usize, models: &[&str]) -> Harness {
        harness_with(keys, models, Arc::new(MemoryStorage::new()))
    }

    fn harness_with(keys: usize, models: &[&str], storage: Arc<MemoryStorage>) -> Harness {
        let store = Arc::new(QuotaStore::with_clock(
            storage.clone(),
            Arc::new(ManualClock::new(day(1))),
        ));
        let pool =
            CredentialPool::from_slots((1..=keys).map(|i| Some(format!("key-{i}")))).unwrap();
        let chain = ModelChain::new(models.iter().copied()).unwrap();
        let router = Router::new(pool, store).with_chain(chain);
        Harness { storage, router }
    }

    fn pair(a: &Attempt<'_>) -> (usize, String) {
        (a.credential.index(), a.model.to_string())
    }

    fn p(idx: usize, model: &str) -> (usize, String) {
        (idx, model.to_string())
    }

    #[tokio::test]
    async fn first_attempt_is_first_key_first_model() {
        let h = harness(2, &["model-a", "model-b", "model-c"]);
        let mut calls = Vec::new();

        let out = h
            .router
            .execute(|a| {
                calls.push(pair(&a));
                async { Ok::<_, Upstream>("ok") }
            })
            .await
            .unwrap();

        assert_eq!(out, "ok");
        assert_eq!(calls, vec![p(0, "model-a")]);
    }

    #[tokio::test]
    async fn duplicate_stored_marks_still_report_accurate_counts() {
        let storage = Arc::new(MemoryStorage::with_snapshot(QuotaSnapshot {
            date: day(1),
            exhausted: vec![p(0, "model-a"), p(0, "model-a")],
        }));
        let h = harness_with(1, &["model-a"], storage);

        let err = h
            .router
            .execute(|_| async { Ok::<_, Upstream>(()) })
            .await
            .unwrap_err();

        match err {
            Error::AllExhausted { summary, .. } => {
                assert_eq!(summary.available, 0);
                assert_eq!(summary.exhausted, 1);
                assert_eq!(summary.total, 1);
            }
            other => panic!("expected AllExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn attempt_borrows_pool_credential_and_chain_model() {
        let h = harness(1, &["model-a"]);
        let pooled = h.router.pool().iter().next().unwrap();
        let chained = &h.router.chain().as_slice()[0];

        let same = h
            .router
            .execute(|a| {
                let same = std::ptr::eq(a.credential, pooled)
                    && std::ptr::eq(a.model.as_ptr(), chained.as_ptr());
                async move { Ok::<_, Upstream>(same) }
            })
            .await
            .unwrap();

        assert!(same);
    }

    #[tokio::test]
    async fn dead_model_advances_to_next_model_same_key() {
        let h = harness(2, &["model-a", "model-b", "model-c"]);
        let mut calls = Vec::new();

        let out = h
            .router
            .execute(|a| {
                calls.push(pair(&a));
                let result = if a.model == "model-a" { fail(DEAD) } else { Ok(a.model.to_string()) };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(out, "model-b");
        assert_eq!(calls, vec![p(0, "model-a"), p(0, "model-b")]);
        assert!(h.router.store().is_exhausted(0, "model-a").await);
    }

    #[tokio::test]
    async fn daily_exhausted_then_success_persists_one_mark() {
        let h = harness(2, &["model-a", "model-b", "model-c"]);
        let mut calls = Vec::new();

        let out = h
            .router
            .execute(|a| {
                calls.push(pair(&a));
                let result = match (a.credential.index(), a.model) {
                    (0, "model-a") => fail(DAILY),
                    _ => Ok("second"),
                };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(out, "second");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], p(0, "model-b"));
        let stored = h.storage.current().unwrap();
        assert_eq!(stored.exhausted, vec![p(0, "model-a")]);
    }

    #[tokio::test]
    async fn all_premarked_fails_without_calls() {
        let models = ["model-a", "model-b", "model-c"];
        let exhausted = (0..3)
            .flat_map(|k| models.iter().map(move |m| p(k, m)))
            .collect();
        let storage = Arc::new(MemoryStorage::with_snapshot(QuotaSnapshot {
            date: day(1),
            exhausted,
        }));
        let h = harness_with(3, &models, storage);
        let mut calls = 0;

        let err = h
            .router
            .execute(|_| {
                calls += 1;
                async { Ok::<_, Upstream>(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 0);
        match err {
            Error::AllExhausted {
                summary,
                remediation,
            } => {
                assert_eq!(summary.available, 0);
                assert_eq!(summary.total, 9);
                assert_eq!(summary.date, day(1));
                assert!(remediation.contains("GEMINI_API_KEY_2"));
                assert!(remediation.contains("midnight UTC"));
            }
            other => panic!("expected AllExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_aborts_without_marking() {
        let h = harness(2, &["model-a", "model-b"]);
        let mut calls = Vec::new();

        let err = h
            .router
            .execute(|a| {
                calls.push(pair(&a));
                async { fail::<()>("400 INVALID_ARGUMENT: bad request body") }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, vec![p(0, "model-a")]);
        assert!(h.storage.current().is_none());
        assert_eq!(h.storage.save_count(), 0);
        match err {
            Error::Fatal {
                credential,
                model,
                source,
            } => {
                assert_eq!(credential, 0);
                assert_eq!(model, "model-a");
                assert_eq!(source.to_string(), "400 INVALID_ARGUMENT: bad request body");
                assert!(source.downcast_ref::<Upstream>().is_some());
            }
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_after_fallback_keeps_earlier_marks() {
        let h = harness(1, &["model-a", "model-b", "model-c"]);
        let mut calls = Vec::new();

        let err = h
            .router
            .execute(|a| {
                calls.push(pair(&a));
                let result: std::result::Result<(), _> = match a.model {
                    "model-a" => fail(DAILY),
                    _ => fail("500 INTERNAL"),
                };
                async move { result }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Fatal { ref model, .. } if model == "model-b"));
        assert_eq!(calls, vec![p(0, "model-a"), p(0, "model-b")]);
        assert_eq!(h.storage.current().unwrap().exhausted, vec![p(0, "model-a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_waits_suggested_delay_plus_buffer() {
        let h = harness(1, &["model-a", "model-b"]);
        let mut times = Vec::new();

        let out = h
            .router
            .execute(|a| {
                times.push(tokio::time::Instant::now());
                let result = if a.attempt == 1 {
                    fail(r#"429 RESOURCE_EXHAUSTED {"retryDelay": "5s"}"#)
                } else {
                    Ok(a.attempt)
                };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(out, 2);
        assert_eq!(times.len(), 2);
        let gap = times[1] - times[0];
        assert!(gap >= Duration::from_secs(7), "waited only {gap:?}");
        assert!(!h.router.store().is_exhausted(0, "model-a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_retries_spent_marks_and_advances() {
        let h = harness(1, &["model-a", "model-b"]);
        let mut calls = Vec::new();
        let start = tokio::time::Instant::now();

        let out = h
            .router
            .execute_with(&h.router.chain().clone(), 3, |a| {
                calls.push((pair(&a), a.attempt));
                let result = if a.model == "model-a" {
                    fail(r#"429 "retryDelay": "5s""#)
                } else {
                    Ok("b")
                };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(out, "b");
        assert_eq!(
            calls,
            vec![
                (p(0, "model-a"), 1),
                (p(0, "model-a"), 2),
                (p(0, "model-a"), 3),
                (p(0, "model-b"), 1),
            ]
        );
        // max_retries - 1 waits of 5s + 2s buffer
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(14) && elapsed < Duration::from_secs(15),
            "elapsed {elapsed:?}"
        );
        assert!(h.router.store().is_exhausted(0, "model-a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_without_hint_uses_exponential_backoff() {
        let h = harness(1, &["model-a"]);
        let start = tokio::time::Instant::now();

        let err = h
            .router
            .execute_with(&h.router.chain().clone(), 3, |_| async {
                fail::<()>("429 Too Many Requests")
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AllExhausted { .. }));
        // 10s after attempt 1, 20s after attempt 2
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn exhausted_pair_is_never_retried_same_day() {
        let storage = Arc::new(MemoryStorage::new());
        let h = harness_with(1, &["model-a", "model-b"], storage.clone());

        h.router
            .execute(|a| {
                let result = if a.model == "model-a" { fail(DAILY) } else { Ok(()) };
                async move { result }
            })
            .await
            .unwrap();

        let mut calls = Vec::new();
        h.router
            .execute(|a| {
                calls.push(pair(&a));
                async { Ok::<_, Upstream>(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls, vec![p(0, "model-b")]);

        // a fresh process over the same storage skips it too
        let fresh = harness_with(1, &["model-a", "model-b"], storage);
        let mut calls = Vec::new();
        fresh
            .router
            .execute(|a| {
                calls.push(pair(&a));
                async { Ok::<_, Upstream>(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls, vec![p(0, "model-b")]);
    }

    #[tokio::test]
    async fn falls_through_to_next_key_after_all_models_spent() {
        let h = harness(2, &["model-a", "model-b"]);
        let mut calls = Vec::new();

        let out = h
            .router
            .execute(|a| {
                calls.push(pair(&a));
                let result = if a.credential.index() == 0 {
                    fail(DAILY)
                } else {
                    Ok(a.credential.key().to_string())
                };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(out, "key-2");
        assert_eq!(
            calls,
            vec![p(0, "model-a"), p(0, "model-b"), p(1, "model-a")]
        );
    }

    #[tokio::test]
    async fn key_with_all_models_exhausted_is_skipped() {
        let storage = Arc::new(MemoryStorage::with_snapshot(QuotaSnapshot {
            date: day(1),
            exhausted: vec![p(0, "model-a"), p(0, "model-b"), p(1, "model-a")],
        }));
        let h = harness_with(2, &["model-a", "model-b"], storage);
        let mut calls = Vec::new();

        h.router
            .execute(|a| {
                calls.push(pair(&a));
                async { Ok::<_, Upstream>(()) }
            })
            .await
            .unwrap();

        assert_eq!(calls, vec![p(1, "model-b")]);
    }

    #[tokio::test]
    async fn every_pair_exhausted_during_run_ends_all_exhausted() {
        let h = harness(2, &["model-a", "model-b"]);
        let mut calls = 0;

        let err = h
            .router
            .execute(|_| {
                calls += 1;
                async { fail::<()>(DAILY) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 4);
        match err {
            Error::AllExhausted { summary, .. } => {
                assert_eq!(summary.available, 0);
                assert_eq!(summary.total, 4);
                assert_eq!(summary.exhausted, 4);
            }
            other => panic!("expected AllExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn override_chain_is_used_in_order() {
        let h = harness(1, &["model-a", "model-b"]);
        let chain = ModelChain::new(["vision-x", "vision-y"]).unwrap();
        let mut calls = Vec::new();

        h.router
            .execute_with(&chain, 2, |a| {
                calls.push(pair(&a));
                let result = if a.model == "vision-x" { fail(DEAD) } else { Ok(()) };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(calls, vec![p(0, "vision-x"), p(0, "vision-y")]);
        // the default chain is untouched by marks on the override chain
        let report = h.router.report_availability().await;
        assert_eq!(report.available, 2);
    }

    #[tokio::test]
    async fn binding_is_active_during_attempt_and_restored_after() {
        let shared = SharedCredential::new();
        let h = harness(2, &["model-a"]);
        let router = h.router.with_binding(shared.clone());
        let mut seen = Vec::new();

        router
            .execute(|a| {
                seen.push(shared.current().map(|c| c.index()));
                let result = if a.credential.index() == 0 { fail(DAILY) } else { Ok(()) };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![Some(0), Some(1)]);
        assert!(shared.current().is_none());
    }

    #[tokio::test]
    async fn binding_is_restored_after_fatal() {
        let shared = SharedCredential::with_default(Credential::new(9, "ambient"));
        let h = harness(1, &["model-a"]);
        let router = h.router.with_binding(shared.clone());

        let result = router
            .execute(|_| async { fail::<()>("401 UNAUTHENTICATED") })
            .await;

        assert!(matches!(result, Err(Error::Fatal { .. })));
        assert_eq!(shared.current().unwrap().index(), 9);
    }

    #[tokio::test]
    async fn custom_classifier_is_consulted() {
        struct EverythingDead;
        impl Classifier for EverythingDead {
            fn classify(&self, _raw: &str) -> Classification {
                Classification::Dead
            }
        }

        let h = harness(1, &["model-a", "model-b"]);
        let router = h.router.with_classifier(Arc::new(EverythingDead));
        let mut calls = 0;

        let err = router
            .execute(|_| {
                calls += 1;
                async { fail::<()>("anything at all") }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 2);
        assert!(matches!(err, Error::AllExhausted { .. }));
    }

    struct ReadOnlyStorage;

    impl QuotaStorage for ReadOnlyStorage {
        fn describe(&self) -> String {
            "read-only".into()
        }
        fn load(&self) -> StorageFuture<'_, Option<QuotaSnapshot>> {
            Box::pin(async { Ok(None) })
        }
        fn save<'a>(&'a self, _snapshot: &'a QuotaSnapshot) -> StorageFuture<'a, ()> {
            Box::pin(async { Err(Error::Storage("disk full".into())) })
        }
        fn clear(&self) -> StorageFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn flush_failure_does_not_abort_routing() {
        let store = Arc::new(QuotaStore::with_clock(
            Arc::new(ReadOnlyStorage),
            Arc::new(ManualClock::new(day(1))),
        ));
        let pool = CredentialPool::from_slots([Some("k1")]).unwrap();
        let router = Router::new(pool, store.clone())
            .with_chain(ModelChain::new(["model-a", "model-b"]).unwrap());

        let out = router
            .execute(|a| {
                let result = if a.model == "model-a" { fail(DAILY) } else { Ok("b") };
                async move { result }
            })
            .await
            .unwrap();

        assert_eq!(out, "b");
        assert!(store.is_exhausted(0, "model-a").await);
    }

    #[tokio::test]
    async fn reset_state_makes_pairs_available_again() {
        let h = harness(1, &["model-a"]);
        h.router.store().mark_exhausted(0, "model-a").await.unwrap();
        assert_eq!(h.router.report_availability().await.available, 0);

        h.router.reset_state().await.unwrap();

        assert_eq!(h.router.report_availability().await.available, 1);
        assert!(h.storage.current().is_none());
    }

    #[test]
    fn policy_delay_adds_buffer_to_suggestion() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(5))),
            Duration::from_secs(7)
        );
        assert_eq!(policy.delay(1, Some(Duration::ZERO)), Duration::from_secs(2));
    }

    #[test]
    fn policy_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1, None), Duration::from_secs(10));
        assert_eq!(policy.delay(2, None), Duration::from_secs(20));
        assert_eq!(policy.delay(3, None), Duration::from_secs(40));
        assert_eq!(policy.delay(5, None), Duration::from_secs(120));
        assert_eq!(policy.delay(64, None), Duration::from_secs(120));
    }
}
