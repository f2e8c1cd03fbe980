//! # HTTP Retrieval Utilities
//!
//! Asynchronous API client around `reqwest` with exponential-backoff retries on
//! transient failures (connection errors, 5xx, 429) and JSON response handling.
//! Non-success responses are returned, not raised, so callers can decide what a
//! 404 means for them.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;

/// Response of a request: deserialized body on success, raw body otherwise.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body, present when the status was 2xx.
    pub data: Option<T>,
    /// The raw body returned with a non-success status.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// Whether the status was 2xx.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Tuning knobs for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientOptions {
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Timeout for a whole request, retries excluded.
    pub timeout: Duration,
    /// Retries for transient failures.
    pub max_retries: u32,
}

impl Default for ApiClientOptions {
    fn default() -> Self {
        Self {
            auth_token: None,
            timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

/// HTTP client bound to a base URL.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client for `base_url`, which must be absolute.
    ///
    /// # Errors
    /// Returns an error if `base_url` does not parse or the HTTP client cannot be built.
    pub fn new(base_url: &str, options: ApiClientOptions) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .context("building HTTP client")?;
        Self::with_client(base_url, client, options)
    }

    /// Creates a client for `base_url` around an existing `reqwest::Client`.
    ///
    /// # Errors
    /// Returns an error if `base_url` does not parse.
    pub fn with_client(
        base_url: &str,
        client: reqwest::Client,
        options: ApiClientOptions,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid API base URL {:?} (must be absolute)", base_url))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url,
            auth_token: options.auth_token,
        })
    }

    /// Resolves `path` against the base URL. Absolute URLs pass through.
    pub fn join(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("cannot join {:?} to {}", path, self.base_url))
    }

    /// Performs a bodiless request and decodes a JSON response.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built, the request fails after all
    /// retries, or a 2xx body is not valid JSON for `T`.
    pub async fn request<T>(&self, method: Method, path: &str) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.join(path)?;
        let mut req = self.inner.request(method, url).header(ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }

    /// `GET` shorthand for [`request`](Self::request).
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<ApiResponse<T>> {
        self.request::<T>(Method::GET, path).await
    }
}
