//! # HTTP Retrieval Utilities
//!
//! This module provides an asynchronous JSON API client wrapper around `reqwest`.
//! Each call is a single attempt bounded by the client timeout; there is no
//! retry layer, so a transport failure surfaces to the caller immediately.

use std::time::Duration;

use reqwest::{header::AUTHORIZATION, Method, Url};
use serde::{de::DeserializeOwned, Serialize};

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
}

impl<T> ApiResponse<T> {
    /// Converts a non-2xx response into an error carrying status and body.
    ///
    /// # Errors
    /// Returns an error when `success` is false.
    pub fn error_for_status(self) -> anyhow::Result<Self> {
        if self.success {
            return Ok(self);
        }
        anyhow::bail!(
            "HTTP {}: {}",
            self.status,
            self.error_body.as_deref().unwrap_or("<empty body>")
        )
    }
}

/// A flexible asynchronous HTTP client.
///
/// Handles base URLs, bearer authentication and JSON bodies.
#[derive(Clone)]
pub struct ApiClient {
    /// The underlying reqwest client.
    inner: reqwest::Client,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1/").
    /// * `auth_token` - An optional string for the Authorization header.
    /// * `timeout` - Upper bound for a whole request, connect included.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the TLS backend cannot start.
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let url = Url::parse(&base)
            .map_err(|e| anyhow::anyhow!("invalid base URL '{}': {}", base_url, e))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The base URL all request paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves path segments under the base URL, percent-encoding each one.
    ///
    /// # Errors
    /// Fails when the base URL cannot carry a path (e.g. `mailto:`).
    pub fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("base URL '{}' cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn build<B: Serialize>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        // 1. Construct the full absolute URL
        let full_url = self.endpoint(segments)?;
        let mut req = self.inner.request(method, full_url);

        // 2. Attach query parameters
        if !query.is_empty() {
            req = req.query(query);
        }

        // 3. Inject Bearer Authentication if a token is present
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        // 4. Attach the JSON body if present
        if let Some(b) = body {
            req = req.json(b);
        }

        Ok(req)
    }

    /// Performs an HTTP request and deserializes a successful JSON body into `T`.
    ///
    /// # Errors
    /// Returns an error if URL joining, network execution, or decoding of a
    /// 2xx body fails. Non-2xx statuses are reported in the `ApiResponse`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let response = self.build(method, segments, query, body)?.send().await?;
        let status = response.status();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            // Capture the error body as a string for debugging
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }

    /// Performs an HTTP request whose successful body is irrelevant.
    ///
    /// # Errors
    /// Returns an error if URL joining or network execution fails.
    pub async fn send<B: Serialize>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> anyhow::Result<ApiResponse<()>> {
        let response = self.build(method, segments, &[], body)?.send().await?;
        let status = response.status();
        let success = status.is_success();
        let error_body = if success { None } else { response.text().await.ok() };

        Ok(ApiResponse {
            data: success.then_some(()),
            error_body,
            status: status.as_u16(),
            success,
        })
    }
}
