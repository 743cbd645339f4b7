use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::CompletionError;

/// A generative-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate_content(&self, model: &str, prompt: &str) -> Result<String, CompletionError>;
}

/// Minimum spacing between completion calls, shared by every caller holding
/// the same `Arc<RateGate>`.
///
/// The lock is held from the elapsed-time check until the new timestamp is
/// written, so concurrent callers are serialized and cannot both observe a
/// stale timestamp.
#[derive(Debug)]
pub struct RateGate {
    min_gap: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    pub async fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock().await
    }

    /// Wait out the remaining gap, run `call`, then record its completion time.
    pub async fn paced<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_gap {
                sleep(self.min_gap - elapsed).await;
            }
        }

        let output = call().await;
        *last_call = Some(Instant::now());
        output
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts per model after the first.
    pub max_retries: u32,
    /// Backoff after failed attempt `n` (0-based) is `backoff_base_secs ^ n` seconds.
    pub backoff_base_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_secs: 2.0,
        }
    }
}

/// Upper bound on a single retry wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

impl RetryPolicy {
    /// `base ^ attempt` seconds, capped at [`MAX_BACKOFF`]. Negative or NaN
    /// values give no wait.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base_secs.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// Paced, retrying front end to a [`CompletionService`] with model fallback.
#[derive(Clone)]
pub struct RankingClient {
    service: Arc<dyn CompletionService>,
    gate: Arc<RateGate>,
    retry: RetryPolicy,
}

impl RankingClient {
    pub fn new(service: Arc<dyn CompletionService>, gate: Arc<RateGate>, retry: RetryPolicy) -> Self {
        Self { service, gate, retry }
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    /// First non-empty response across `models`, each tried up to
    /// `max_retries + 1` times. `None` once every attempt has failed.
    pub async fn generate(&self, prompt: &str, models: &[String]) -> Option<String> {
        for model in models {
            for attempt in 0..=self.retry.max_retries {
                let result = self
                    .gate
                    .paced(|| self.service.generate_content(model, prompt))
                    .await;

                match result {
                    Ok(text) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            debug!("Completion from {} on attempt {}", model, attempt + 1);
                            return Some(text.to_string());
                        }
                        warn!("Completion ({}) attempt {} returned no text", model, attempt + 1);
                    }
                    Err(e) => {
                        warn!("Completion ({}) attempt {} failed: {}", model, attempt + 1, e);
                        if attempt < self.retry.max_retries {
                            sleep(self.retry.backoff(attempt)).await;
                        }
                    }
                }
            }
        }

        warn!("All completion attempts failed across {} models", models.len());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranking::test_support::ScriptedService;

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn client(service: Arc<ScriptedService>, retry: RetryPolicy) -> RankingClient {
        RankingClient::new(service, Arc::new(RateGate::new(Duration::from_secs(1))), retry)
    }

    mod retry_policy_tests {
        use super::*;

        #[test]
        fn test_backoff_is_exponential() {
            let policy = RetryPolicy::default();
            assert_eq!(policy.backoff(0), Duration::from_secs(1));
            assert_eq!(policy.backoff(1), Duration::from_secs(2));
            assert_eq!(policy.backoff(2), Duration::from_secs(4));
        }

        #[test]
        fn test_negative_base_gives_zero() {
            let policy = RetryPolicy {
                max_retries: 1,
                backoff_base_secs: -2.0,
            };
            assert_eq!(policy.backoff(1), Duration::ZERO);
        }

        #[test]
        fn test_huge_backoff_is_capped() {
            let policy = RetryPolicy {
                max_retries: 2,
                backoff_base_secs: 1e20,
            };
            assert_eq!(policy.backoff(0), Duration::from_secs(1));
            assert_eq!(policy.backoff(1), MAX_BACKOFF);
            assert_eq!(policy.backoff(u32::MAX), MAX_BACKOFF);

            let policy = RetryPolicy {
                max_retries: 2,
                backoff_base_secs: f64::NAN,
            };
            assert_eq!(policy.backoff(1), Duration::ZERO);
        }
    }

    mod rate_gate_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_first_call_is_not_delayed() {
            let gate = RateGate::new(Duration::from_secs(1));
            let start = Instant::now();
            gate.paced(|| async {}).await;
            assert_eq!(start.elapsed(), Duration::ZERO);
            assert!(gate.last_call().await.is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn test_back_to_back_calls_are_spaced() {
            let gate = RateGate::new(Duration::from_secs(1));
            let first = gate.paced(|| async { Instant::now() }).await;
            let recorded_first = gate.last_call().await.unwrap();
            let second = gate.paced(|| async { Instant::now() }).await;

            assert!(second - first >= Duration::from_secs(1));
            assert!(second - recorded_first >= Duration::from_secs(1));
        }

        #[tokio::test(start_paused = true)]
        async fn test_no_wait_when_gap_already_elapsed() {
            let gate = RateGate::new(Duration::from_secs(1));
            gate.paced(|| async {}).await;
            sleep(Duration::from_secs(3)).await;

            let before = Instant::now();
            gate.paced(|| async {}).await;
            assert_eq!(before.elapsed(), Duration::ZERO);
        }

        #[tokio::test(start_paused = true)]
        async fn test_concurrent_callers_are_serialized() {
            let gate = Arc::new(RateGate::new(Duration::from_secs(1)));
            let mut handles = Vec::new();
            for _ in 0..4 {
                let gate = gate.clone();
                handles.push(tokio::spawn(async move {
                    gate.paced(|| async { Instant::now() }).await
                }));
            }

            let mut starts = Vec::new();
            for handle in handles {
                starts.push(handle.await.unwrap());
            }
            starts.sort();
            for pair in starts.windows(2) {
                assert!(pair[1] - pair[0] >= Duration::from_secs(1));
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_timestamp_is_monotonic() {
            let gate = RateGate::new(Duration::from_millis(10));
            let mut previous = None;
            for _ in 0..5 {
                gate.paced(|| async {}).await;
                let current = gate.last_call().await;
                assert!(current >= previous);
                previous = current;
            }
        }
    }

    mod generate_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_returns_first_success_trimmed() {
            let service = Arc::new(ScriptedService::new(vec![Ok("  {\"news\": [1]}\n".to_string())]));
            let client = client(service.clone(), RetryPolicy::default());

            let text = client.generate("prompt", &models(&["primary"])).await;
            assert_eq!(text.as_deref(), Some("{\"news\": [1]}"));
            assert_eq!(service.models_called(), vec!["primary"]);
        }

        #[tokio::test(start_paused = true)]
        async fn test_retries_then_falls_back_to_next_model() {
            let service = Arc::new(ScriptedService::new(vec![
                Err(ScriptedService::unavailable()),
                Err(ScriptedService::unavailable()),
                Err(ScriptedService::unavailable()),
                Ok("ranked".to_string()),
            ]));
            let client = client(service.clone(), RetryPolicy::default());

            let text = client.generate("prompt", &models(&["primary", "lite"])).await;
            assert_eq!(text.as_deref(), Some("ranked"));
            assert_eq!(
                service.models_called(),
                vec!["primary", "primary", "primary", "lite"]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn test_backoff_between_retries() {
            let service = Arc::new(ScriptedService::new(vec![
                Err(ScriptedService::unavailable()),
                Err(ScriptedService::unavailable()),
                Ok("ok".to_string()),
            ]));
            let client = client(service.clone(), RetryPolicy::default());

            client.generate("prompt", &models(&["primary"])).await;
            let starts = service.call_times();
            assert_eq!(starts.len(), 3);
            // attempt 0 fails -> 1s backoff, attempt 1 fails -> 2s backoff
            assert!(starts[1] - starts[0] >= Duration::from_secs(1));
            assert!(starts[2] - starts[1] >= Duration::from_secs(2));
        }

        #[tokio::test(start_paused = true)]
        async fn test_empty_text_counts_as_a_miss() {
            let service = Arc::new(ScriptedService::new(vec![
                Ok("   ".to_string()),
                Ok("second".to_string()),
            ]));
            let client = client(service.clone(), RetryPolicy::default());

            let text = client.generate("prompt", &models(&["primary"])).await;
            assert_eq!(text.as_deref(), Some("second"));
            assert_eq!(service.models_called().len(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_none_after_every_attempt_fails() {
            let service = Arc::new(ScriptedService::new(vec![]));
            let retry = RetryPolicy {
                max_retries: 1,
                backoff_base_secs: 2.0,
            };
            let client = client(service.clone(), retry);

            let text = client.generate("prompt", &models(&["a", "b"])).await;
            assert!(text.is_none());
            assert_eq!(service.models_called(), vec!["a", "a", "b", "b"]);
        }

        #[tokio::test(start_paused = true)]
        async fn test_huge_backoff_base_still_gives_up() {
            let service = Arc::new(ScriptedService::new(vec![]));
            let retry = RetryPolicy {
                max_retries: 2,
                backoff_base_secs: 1e20,
            };
            let client = client(service.clone(), retry);

            let text = client.generate("prompt", &models(&["primary"])).await;
            assert!(text.is_none());
            let starts = service.call_times();
            assert_eq!(starts.len(), 3);
            assert!(starts[2] - starts[1] >= MAX_BACKOFF);
        }

        #[tokio::test(start_paused = true)]
        async fn test_no_models_means_no_calls() {
            let service = Arc::new(ScriptedService::new(vec![Ok("unused".to_string())]));
            let client = client(service.clone(), RetryPolicy::default());
            assert!(client.generate("prompt", &[]).await.is_none());
            assert!(service.models_called().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn test_calls_across_clients_share_the_gate() {
            let gate = Arc::new(RateGate::new(Duration::from_secs(1)));
            let service = Arc::new(ScriptedService::new(vec![
                Ok("one".to_string()),
                Ok("two".to_string()),
            ]));
            let first = RankingClient::new(service.clone(), gate.clone(), RetryPolicy::default());
            let second = RankingClient::new(service.clone(), gate, RetryPolicy::default());

            first.generate("p", &models(&["x"])).await;
            second.generate("p", &models(&["y"])).await;

            let starts = service.call_times();
            assert!(starts[1] - starts[0] >= Duration::from_secs(1));
        }
    }
}
