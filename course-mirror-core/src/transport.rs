//! Resilient transport: one pooled `reqwest::Client`, an explicit bounded
//! retry loop, and `Link`-header pagination.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use regex::Regex;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::PerformanceOptions;
use crate::contract::{Method, Params, Response, Transport};
use crate::error::TransportError;

/// Outcome of a single attempt, classified for the retry loop.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Transient(TransportError),
    Permanent(TransportError),
}

impl<T> Attempt<T> {
    pub fn from_result(result: Result<T, TransportError>) -> Self {
        match result {
            Ok(v) => Attempt::Success(v),
            Err(e) if e.is_transient() => Attempt::Transient(e),
            Err(e) => Attempt::Permanent(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn from_options(options: &PerformanceOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            backoff_factor: options.backoff_factor,
        }
    }

    /// Sleep before retry number `retry` (1-based): `backoff_factor * 2^(retry-1)` seconds.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let secs = self.backoff_factor * 2f64.powi(exponent);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt budget
/// (`1 + max_retries`) is spent. The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let total_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Permanent(e) => return Err(e),
            Attempt::Transient(e) => {
                if attempt >= total_attempts {
                    warn!(attempts = attempt, error = %e, "Retries exhausted");
                    return Err(e);
                }
                let delay = policy.delay_for_retry(attempt);
                warn!(
                    attempt,
                    total_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn next_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("static regex is valid")
    })
}

/// Extract the `rel="next"` target from a `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header
        .split(',')
        .find_map(|part| next_link_pattern().captures(part.trim()))
        .map(|c| c[1].to_string())
}

/// HTTP implementation of [`Transport`] with bearer authentication.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
    policy: RetryPolicy,
    page_size: u32,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        token: &str,
        options: &PerformanceOptions,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout())
            .pool_max_idle_per_host(options.pool_size)
            .build()
            .map_err(|e| TransportError::Invalid(e.to_string()))?;
        debug!(base_url, pool_size = options.pool_size, "Built shared HTTP client");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            policy: RetryPolicy::from_options(options),
            page_size: options.page_size,
        })
    }

    /// A handle onto the shared connection pool.
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        params: &Params,
    ) -> Result<Response, TransportError> {
        let response = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;
        let status = response.status().as_u16();
        let next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link);
        let final_url = response.url().to_string();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status,
                url: final_url,
                message,
            });
        }
        let body = response.bytes().await?;
        Ok(Response {
            url: final_url,
            status,
            next,
            body,
        })
    }

    async fn download_once(&self, url: &str, destination: &Path) -> Result<u64, TransportError> {
        let response = self.client.get(url).bearer_auth(&self.token).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
                message: String::new(),
            });
        }
        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        url: &str,
        params: &Params,
    ) -> Result<Response, TransportError> {
        let url = self.resolve(url);
        debug!(%method, url = %url, "Remote request");
        retry_with_backoff(&self.policy, |_| {
            let method = method.clone();
            let url = url.as_str();
            async move { Attempt::from_result(self.send_once(method, url, params).await) }
        })
        .await
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<u64, TransportError> {
        let url = self.resolve(url);
        debug!(url = %url, path = %destination.display(), "Downloading file");
        retry_with_backoff(&self.policy, |_| {
            let url = url.as_str();
            // Each attempt truncates the destination and starts over.
            async move { Attempt::from_result(self.download_once(url, destination).await) }
        })
        .await
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

enum Cursor {
    Start(String, Vec<(String, String)>),
    Next(String),
    Done,
}

/// Lazily walk a paginated listing, one response per exchange. The first
/// request carries `params` (plus `per_page`); later ones follow the cursor
/// verbatim. Ends when a response has no cursor or a cursor repeats.
pub fn paginate<'a, T>(
    transport: &'a T,
    url: &str,
    params: &Params,
) -> impl Stream<Item = Result<Response, TransportError>> + 'a
where
    T: Transport + ?Sized,
{
    let mut first_params = params.to_vec();
    if !first_params.iter().any(|(k, _)| k == "per_page") {
        first_params.push(("per_page".to_string(), transport.page_size().to_string()));
    }
    let start = (Cursor::Start(url.to_string(), first_params), HashSet::<String>::new());

    stream::try_unfold(start, move |(cursor, mut seen)| async move {
        let (url, params) = match cursor {
            Cursor::Start(url, params) => (url, params),
            Cursor::Next(url) => (url, Vec::new()),
            Cursor::Done => return Ok(None),
        };
        let response = transport.request(Method::GET, &url, &params).await?;
        seen.insert(url);
        let next = match &response.next {
            Some(next) if seen.contains(next) => {
                warn!(url = %next, "Pagination cursor repeated, stopping");
                Cursor::Done
            }
            Some(next) => Cursor::Next(next.clone()),
            None => Cursor::Done,
        };
        Ok(Some((response, (next, seen))))
    })
}

/// Drain a paginated listing whose pages are JSON arrays of `I`.
pub async fn collect_all<I, T>(
    transport: &T,
    url: &str,
    params: &Params,
) -> Result<Vec<I>, TransportError>
where
    I: DeserializeOwned,
    T: Transport + ?Sized,
{
    let pages = paginate(transport, url, params);
    futures::pin_mut!(pages);
    let mut items = Vec::new();
    while let Some(page) = pages.try_next().await? {
        items.extend(page.json::<Vec<I>>()?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockTransport;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn json_page(url: &str, body: &str, next: Option<&str>) -> Response {
        Response {
            url: url.to_string(),
            status: 200,
            next: next.map(str::to_string),
            body: bytes::Bytes::from(body.to_string()),
        }
    }

    fn zero_backoff(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_factor: 0.0,
        }
    }

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            url: "u".into(),
            message: String::new(),
        }
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_factor: 0.5,
        };
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(2));
        assert_eq!(zero_backoff(1).delay_for_retry(4), Duration::ZERO);
    }

    #[test]
    fn next_link_is_found_among_other_relations() {
        let header = r#"<https://lms.example/api/v1/courses?page=1>; rel="current",<https://lms.example/api/v1/courses?page=2&per_page=100>; rel="next",<https://lms.example/api/v1/courses?page=9>; rel="last""#;
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://lms.example/api/v1/courses?page=2&per_page=100")
        );
        assert!(parse_next_link(r#"<https://x/?page=1>; rel="first""#).is_none());
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_with_backoff(&zero_backoff(3), |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Attempt::Transient(status(503))
                } else {
                    Attempt::Success(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&zero_backoff(3), |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::from_result(Err(status(404)))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_is_one_plus_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&zero_backoff(2), |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Attempt::from_result(Err(status(429)))
            }
        })
        .await;
        assert_eq!(result.unwrap_err().status(), Some(429));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pagination_returns_every_page_once() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(2u32);
        transport
            .expect_request()
            .times(3)
            .returning(|_, url, params| match url {
                "/api/v1/courses/1/modules" => {
                    assert!(params.iter().any(|(k, v)| k == "per_page" && v == "2"));
                    Ok(json_page(url, r#"[{"id":1},{"id":2}]"#, Some("https://lms/p2")))
                }
                "https://lms/p2" => {
                    assert!(params.is_empty());
                    Ok(json_page(url, r#"[{"id":3},{"id":4}]"#, Some("https://lms/p3")))
                }
                "https://lms/p3" => Ok(json_page(url, r#"[{"id":5}]"#, None)),
                other => panic!("unexpected url {other}"),
            });

        #[derive(serde::Deserialize)]
        struct Row {
            id: u64,
        }
        let rows: Vec<Row> = collect_all(&transport, "/api/v1/courses/1/modules", &[])
            .await
            .unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn pagination_stops_on_a_repeated_cursor() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(10u32);
        transport
            .expect_request()
            .times(2)
            .returning(|_, url, _| Ok(json_page(url, "[]", Some("https://lms/again"))));
        let pages: Vec<Response> = paginate(&transport, "https://lms/again", &[])
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn pagination_surfaces_the_first_error_and_ends() {
        let mut transport = MockTransport::new();
        transport.expect_page_size().return_const(10u32);
        transport
            .expect_request()
            .times(1)
            .returning(|_, _, _| Err(status(500)));
        let result: Result<Vec<serde_json::Value>, _> =
            collect_all(&transport, "/api/v1/courses", &[]).await;
        assert_eq!(result.unwrap_err().status(), Some(500));
    }
}
