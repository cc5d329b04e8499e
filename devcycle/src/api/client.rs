use rand::Rng;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tfplug::Context;

use super::common::{ApiErrorResponse, Endpoint};
use super::environments::Environment;
use super::error::ApiError;
use super::features::Feature;
use super::projects::Project;
use super::variables::Variable;

pub const USER_AGENT: &str = concat!("terraform-provider-devcycle/", env!("CARGO_PKG_VERSION"));

/// DevCycle management API client
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: String,
    auth_header: String,
    retry_config: RetryConfig,
    context: Context,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
            timeout_seconds: 30,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for `attempt` (1-based), scaled by a random
    /// factor in [0.5, 1.0]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_backoff_ms);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_millis((capped as f64 * jitter) as u64)
    }
}

/// reqwest client shared by the management, OAuth and evaluation clients
pub(crate) fn build_http_client(timeout_seconds: u64) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?)
}

/// Validates an API base URL and strips any trailing slash
pub(crate) fn normalize_base_url(endpoint: &str) -> Result<String, ApiError> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", endpoint, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::InvalidUrl(format!(
            "{}: unsupported scheme {}",
            endpoint,
            parsed.scheme()
        )));
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}

impl Client {
    /// Create a new API client with default configuration
    pub fn new(endpoint: &str, access_token: &str) -> Result<Self, ApiError> {
        Self::with_config(endpoint, access_token, RetryConfig::default(), Context::new())
    }

    /// Create a new API client whose retries stop once `context` is cancelled
    pub fn with_config(
        endpoint: &str,
        access_token: &str,
        retry_config: RetryConfig,
        context: Context,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(endpoint)?;
        let http_client = build_http_client(retry_config.timeout_seconds)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http_client,
                base_url,
                auth_header: format!("Bearer {}", access_token),
                retry_config,
                context,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn projects(&self) -> Endpoint<'_, Project> {
        Endpoint::new(self, None)
    }

    pub fn environments(&self, project: &str) -> Endpoint<'_, Environment> {
        Endpoint::new(self, Some(project))
    }

    pub fn features(&self, project: &str) -> Endpoint<'_, Feature> {
        Endpoint::new(self, Some(project))
    }

    pub fn variables(&self, project: &str) -> Endpoint<'_, Variable> {
        Endpoint::new(self, Some(project))
    }

    /// Execute a GET request with retry logic
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, None).await?;
        parse_json(response).await
    }

    /// Execute a POST request; never retried
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        let response = self.execute(Method::POST, path, Some(body)).await?;
        parse_json(response).await
    }

    /// Execute a PATCH request; never retried
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        let response = self.execute(Method::PATCH, path, Some(body)).await?;
        parse_json(response).await
    }

    /// Execute a DELETE request; the response body is ignored
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, path, None).await.map(|_| ())
    }

    /// Only GET is retried: 429, 5xx, timeouts and connection failures.
    /// Exhausted retries return the last remote error as received.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        let config = &self.inner.retry_config;
        let retryable = method == Method::GET;
        let attempts = if retryable { config.max_retries + 1 } else { 1 };
        let url = format!("{}{}", self.inner.base_url, path);
        let mut last_error = None;

        for attempt in 0..attempts {
            if self.inner.context.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            if attempt > 0 {
                let backoff = config.backoff(attempt);
                tracing::debug!(
                    "Retrying {} {} after {}ms (attempt {})",
                    method,
                    path,
                    backoff.as_millis(),
                    attempt
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = self.inner.context.cancelled() => return Err(ApiError::Cancelled),
                }
            }

            tracing::debug!("{} request to: {}", method, url);
            let mut request = self
                .inner
                .http_client
                .request(method.clone(), &url)
                .header(AUTHORIZATION, &self.inner.auth_header);
            if let Some(body) = &body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let transient =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    let error = error_from_response(response).await;
                    if !(retryable && transient) {
                        return Err(error);
                    }
                    tracing::warn!("{} {} failed: {}", method, path, error);
                    last_error = Some(error);
                }
                Err(e) if e.is_timeout() => {
                    if !retryable {
                        return Err(ApiError::Timeout(config.timeout_seconds));
                    }
                    last_error = Some(ApiError::Timeout(config.timeout_seconds));
                }
                Err(e) if retryable && (e.is_connect() || e.is_request()) => {
                    last_error = Some(ApiError::RequestError(e));
                }
                Err(e) => return Err(ApiError::RequestError(e)),
            }
        }

        Err(last_error.unwrap_or(ApiError::ServiceUnavailable))
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::ParseError(format!("Failed to encode request body: {}", e)))
}

pub(crate) async fn parse_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let text = response.text().await?;
    tracing::debug!("API response body: {}", text);

    serde_json::from_str::<T>(&text).map_err(|e| {
        tracing::error!("Failed to deserialize response: {}, body: {}", e, text);
        ApiError::ParseError(format!("Failed to parse response: {}", e))
    })
}

pub(crate) async fn error_from_response(response: reqwest::Response) -> ApiError {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    let message = serde_json::from_str::<ApiErrorResponse>(&text)
        .ok()
        .and_then(|body| body.summary())
        .unwrap_or(text);

    ApiError::ApiError { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn fast_retries() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            timeout_seconds: 5,
        }
    }

    fn test_client(url: &str) -> Client {
        Client::with_config(url, "secret-token", fast_retries(), Context::new()).unwrap()
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let config = RetryConfig::default();
        for attempt in 1..10 {
            let backoff = config.backoff(attempt).as_millis() as u64;
            let base = (100 * 2_u64.pow(attempt - 1)).min(10000);
            assert!(backoff >= base / 2 && backoff <= base, "attempt {attempt}: {backoff}");
        }
    }

    #[test]
    fn rejects_invalid_base_urls() {
        assert!(matches!(
            Client::new("not a url", "t"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            Client::new("ftp://api.devcycle.com", "t"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert_eq!(
            Client::new("https://api.devcycle.com/", "t").unwrap().base_url(),
            "https://api.devcycle.com"
        );
    }

    #[tokio::test]
    async fn sends_bearer_token_and_user_agent() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/my-project")
            .match_header("authorization", "Bearer secret-token")
            .match_header("user-agent", Matcher::Regex("^terraform-provider-devcycle/".to_string()))
            .with_body(r#"{"_id":"p1","key":"my-project","name":"My Project"}"#)
            .create_async()
            .await;

        let project = test_client(&server.url())
            .projects()
            .get("my-project")
            .await
            .unwrap();
        assert_eq!(project.id, "p1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_reads_on_server_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/flaky")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let result = test_client(&server.url()).projects().get("flaky").await;
        assert!(matches!(result, Err(ApiError::ApiError { status: 503, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn exhausted_retries_keep_remote_message() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/p")
            .with_status(500)
            .with_body(r#"{"statusCode":500,"message":"database is on fire"}"#)
            .expect(4)
            .create_async()
            .await;

        let err = test_client(&server.url())
            .projects()
            .get("p")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("database is on fire"), "{}", err);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limited_write_reports_status_and_message() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PATCH", "/v1/projects/p")
            .with_status(429)
            .with_body(r#"{"statusCode":429,"message":"slow down"}"#)
            .expect(1)
            .create_async()
            .await;

        let result: Result<serde_json::Value, _> = test_client(&server.url())
            .patch("/v1/projects/p", &serde_json::json!({"name": "P"}))
            .await;
        match result {
            Err(ApiError::ApiError { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn never_retries_writes() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects")
            .with_status(503)
            .with_body(r#"{"statusCode":503,"message":"down"}"#)
            .expect(1)
            .create_async()
            .await;

        let result: Result<serde_json::Value, _> = test_client(&server.url())
            .post("/v1/projects", &serde_json::json!({"key": "p"}))
            .await;
        match result {
            Err(ApiError::ApiError { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "down");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/missing")
            .with_status(404)
            .with_body(r#"{"statusCode":404,"message":"Project not found"}"#)
            .expect(1)
            .create_async()
            .await;

        let err = test_client(&server.url())
            .projects()
            .get("missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_keeps_remote_message() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/projects/p")
            .with_status(401)
            .with_body(r#"{"statusCode":401,"message":"Invalid token"}"#)
            .create_async()
            .await;

        let result = test_client(&server.url()).projects().get("p").await;
        match result {
            Err(ApiError::ApiError { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid token");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn cancelled_context_stops_requests() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/projects/p")
            .expect(0)
            .create_async()
            .await;

        let ctx = Context::new();
        let client = Client::with_config(&server.url(), "t", fast_retries(), ctx.child()).unwrap();
        ctx.cancel();

        let result = client.projects().get("p").await;
        assert!(matches!(result, Err(ApiError::Cancelled)));
        mock.assert_async().await;
    }
}
