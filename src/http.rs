//! Retrying HTTP sender shared by the Azure REST clients.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (throttled) and 5xx (server error) → retry
//! - Network errors → retry
//! - Any other status → returned to the caller for classification
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5), or the service's
//!   `retry-after-ms` / `x-ms-retry-after-ms` / `retry-after` hint when
//!   present, never longer than 32s

use anyhow::Result;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Send a request, retrying transient failures.
///
/// `build` is called once per attempt because a `RequestBuilder` is
/// consumed by `send`. It is async so callers can fetch a fresh bearer
/// token per attempt.
pub async fn send_with_retry<F, Fut>(
    service: &str,
    max_retries: u32,
    build: F,
) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<RequestBuilder>>,
{
    let mut last_err = None;
    let mut hint: Option<Duration> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = hint
                .take()
                .unwrap_or_else(|| Duration::from_secs(1 << (attempt - 1).min(5)));
            tokio::time::sleep(delay).await;
        }

        let request = build().await?;
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if !is_retryable(status) {
                    return Ok(response);
                }
                hint = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(service, %status, attempt, "transient error, retrying");
                last_err = Some(anyhow::anyhow!("{} error {}: {}", service, status, body));
            }
            Err(e) => {
                tracing::warn!(service, attempt, error = %e, "request failed, retrying");
                last_err = Some(anyhow::anyhow!("{} request failed: {}", service, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", service)))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Server-suggested delay, capped at [`MAX_BACKOFF`]. Millisecond headers
/// win over the seconds-based `retry-after`; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    };
    let millis = ["retry-after-ms", "x-ms-retry-after-ms"]
        .into_iter()
        .find_map(|name| header(name))
        .or_else(|| header("retry-after").map(|secs| secs * 1000.0))?;
    let delay = Duration::from_millis(millis.clamp(0.0, MAX_BACKOFF.as_millis() as f64) as u64);
    Some(delay)
}

/// Turn a non-success response into an error carrying its body.
pub async fn error_for_status(service: &str, response: Response) -> anyhow::Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::anyhow!("{} error {}: {}", service, status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::OK));
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn retry_after_reads_millis_and_seconds() {
        assert_eq!(
            retry_after(&headers(&[("retry-after-ms", "250")])),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            retry_after(&headers(&[("x-ms-retry-after-ms", "12.5")])),
            Some(Duration::from_millis(12))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "3")])),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "2"), ("retry-after-ms", "40")])),
            Some(Duration::from_millis(40))
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")])),
            None
        );
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_is_capped() {
        assert_eq!(
            retry_after(&headers(&[("retry-after-ms", "86400000")])),
            Some(MAX_BACKOFF)
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after", "3600")])),
            Some(MAX_BACKOFF)
        );
        assert_eq!(
            retry_after(&headers(&[("retry-after-ms", "-5")])),
            Some(Duration::ZERO)
        );
    }

    /// Responds with each queued status in turn (with a 1 ms retry hint),
    /// then 200 once the queue is empty.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(Mutex::new(VecDeque::from(statuses)));
        let counter = calls.clone();
        let app = Router::new().route(
            "/op",
            get(move || {
                let counter = counter.clone();
                let queue = queue.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let status = queue.lock().unwrap().pop_front().unwrap_or(200);
                    (
                        axum::http::StatusCode::from_u16(status).unwrap(),
                        [("retry-after-ms", "1")],
                        format!("status {}", status),
                    )
                }
            }),
        );
        (crate::testing::serve(app).await, calls)
    }

    async fn call(base: &str, max_retries: u32) -> Result<Response> {
        let client = reqwest::Client::new();
        let url = format!("{}/op", base);
        send_with_retry("Stub", max_retries, || {
            let request = client.get(&url);
            async move { Ok::<_, anyhow::Error>(request) }
        })
        .await
    }

    #[tokio::test]
    async fn retries_throttling_and_server_errors() {
        let (base, calls) = scripted_server(vec![429, 503, 500]).await;
        let response = call(&base, 5).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let (base, calls) = scripted_server(vec![404, 404]).await;
        let response = call(&base, 5).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (base, calls) = scripted_server(vec![503, 503, 503, 503]).await;
        let err = call(&base, 2).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let message = err.to_string();
        assert!(message.starts_with("Stub error 503"), "{}", message);
        assert!(message.contains("status 503"), "{}", message);
    }
}
