use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Result, SessionError};

/// HTTP method enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
}

/// A very simple version that only holds response data
#[derive(Debug, Clone)]
pub struct SimpleHttpResponse {
    /// HTTP status code
    status_code: u16,
    /// Response body
    body: Bytes,
    /// Response headers (lower-cased names)
    headers: HashMap<String, String>,
}

impl SimpleHttpResponse {
    /// Create a new response
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status_code: status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Get the status code
    pub fn status(&self) -> u16 {
        self.status_code
    }

    /// Get a header value by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Get a reference to the raw response body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text (consumes the response)
    pub fn text(self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Get the raw body (consumes the response)
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Parse body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Check if successful (2xx status)
    pub fn is_success(&self) -> bool {
        self.status_code >= 200 && self.status_code < 300
    }

    /// Return the response if successful, or an [`SessionError::Http`] carrying the body
    pub fn ensure_success(self, operation: &'static str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status_code;
        Err(SessionError::Http {
            operation,
            status,
            detail: self.text(),
        })
    }
}

/// Trait for HTTP client operations, allowing for mocking
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform HTTP GET request and return a SimpleHttpResponse
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse>;

    /// Perform HTTP POST request and return a SimpleHttpResponse
    async fn post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse>;
}

/// Implementation of HttpClient using reqwest
pub struct ReqwestHttpClient {
    /// Internal reqwest client
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new ReqwestHttpClient
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a new client with custom configuration
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn convert(response: reqwest::Response) -> Result<SimpleHttpResponse> {
        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?;

        let mut result = SimpleHttpResponse::new(status, body);
        for (key, value) in headers {
            result = result.with_header(key, value);
        }
        Ok(result)
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse> {
        let mut request = self.client.get(url);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        trace!(url = %url, "GET");
        let response = request.send().await?;
        Self::convert(response).await
    }

    async fn post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse> {
        let mut request = self.client.post(url).body(body);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        trace!(url = %url, "POST");
        let response = request.send().await?;
        Self::convert(response).await
    }
}

/// A request captured by [`MockHttpClient`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

/// Mock HTTP client that returns predefined responses keyed by URL
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    /// Map of URLs to responses
    responses: Arc<Mutex<HashMap<String, SimpleHttpResponse>>>,
    /// Record of requests made
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mock response for a URL
    pub fn mock_response(&self, url: impl Into<String>, status: u16, body: impl Into<Bytes>) {
        let response = SimpleHttpResponse::new(status, body);
        self.responses.lock().insert(url.into(), response);
    }

    /// Register a full response for a URL
    pub fn mock_raw(&self, url: impl Into<String>, response: SimpleHttpResponse) {
        self.responses.lock().insert(url.into(), response);
    }

    /// Register a JSON response
    pub fn mock_json<T: serde::Serialize>(
        &self,
        url: impl Into<String>,
        status: u16,
        data: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(data)?;

        let response = SimpleHttpResponse::new(status, body)
            .with_header("content-type", "application/json");

        self.responses.lock().insert(url.into(), response);
        Ok(())
    }

    /// Get the list of recorded requests
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    fn record_request(&self, request: RecordedRequest) {
        self.requests.lock().push(request);
    }

    fn response_for(&self, url: &str) -> Result<SimpleHttpResponse> {
        self.responses.lock().get(url).cloned().ok_or_else(|| {
            SessionError::Http {
                operation: "mock request",
                status: 599,
                detail: format!("No mock response configured for URL: {}", url),
            }
        })
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse> {
        self.record_request(RecordedRequest {
            method: HttpMethod::GET,
            url: url.to_string(),
            headers,
            body: None,
        });
        self.response_for(url)
    }

    async fn post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse> {
        self.record_request(RecordedRequest {
            method: HttpMethod::POST,
            url: url.to_string(),
            headers,
            body: Some(body),
        });
        self.response_for(url)
    }
}
