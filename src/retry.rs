//! Retry helpers.
//!
//! Two loops live here:
//!
//! - [`with_retry`] wraps store calls: any error is retried after a delay
//!   that starts at `initial_delay_ms` and doubles per attempt.
//! - [`post_json`] wraps calls to the model endpoints:
//!   - HTTP 429 (rate limited) and 5xx (server error) → retry
//!   - HTTP 4xx (client error, not 429) → fail immediately
//!   - Network errors → retry
//!   - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use std::future::Future;
use std::time::Duration;

use crate::config::PersistenceConfig;

/// Run `op` until it succeeds or `policy.max_retries` retries are used up.
///
/// `label` names the operation in log lines and in the final error.
pub async fn with_retry<T, F, Fut>(policy: &PersistenceConfig, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(policy.initial_delay_ms);
    let mut attempts_left = policy.max_retries;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts_left > 0 => {
                tracing::warn!(
                    operation = label,
                    attempts_left,
                    error = %e,
                    "retrying after error"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay);
                attempts_left -= 1;
            }
            Err(e) => return Err(e.context(format!("{} failed", label))),
        }
    }
}

/// Double `delay`, saturating instead of overflowing.
fn next_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

/// POST a JSON body and return the parsed JSON response, retrying
/// transient failures.
///
/// `service` is used in error messages (e.g. `"Ollama"`).
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, "backing off for {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return Ok(json);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    tracing::warn!(service, %status, "transient API error");
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!(
                    "{} connection error (is it reachable at {}?): {}",
                    service,
                    url,
                    e
                ));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", service)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_retries: u32) -> PersistenceConfig {
        PersistenceConfig {
            max_retries,
            initial_delay_ms: 1,
        }
    }

    #[test]
    fn test_next_delay_doubles_and_saturates() {
        assert_eq!(next_delay(Duration::from_millis(500)), Duration::from_secs(1));
        assert_eq!(next_delay(Duration::MAX), Duration::MAX);
        let mut delay = Duration::from_millis(500);
        for _ in 0..200 {
            delay = next_delay(delay);
        }
        assert_eq!(delay, Duration::MAX);
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let mut calls = 0;
        let value = with_retry(&fast_policy(3), "op", || {
            calls += 1;
            async { Ok::<_, anyhow::Error>(7) }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_errors() {
        let mut calls = 0;
        let value = with_retry(&fast_policy(3), "op", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    bail!("transient failure {}", n)
                }
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let mut calls = 0;
        let err = with_retry(&fast_policy(2), "load chats", || {
            calls += 1;
            async { Err::<(), _>(anyhow!("database is locked")) }
        })
        .await
        .unwrap_err();
        // one initial attempt plus two retries
        assert_eq!(calls, 3);
        assert!(err.to_string().contains("load chats failed"));
        assert!(format!("{:#}", err).contains("database is locked"));
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let mut calls = 0;
        let result = with_retry(&fast_policy(0), "op", || {
            calls += 1;
            async { Err::<(), _>(anyhow!("boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
