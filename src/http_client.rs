use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;

/// HTTP methods used by the ESIA endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::GET => write!(f, "GET"),
            HttpMethod::POST => write!(f, "POST"),
        }
    }
}

/// HTTP request for executing a call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (GET, POST).
    pub method: HttpMethod,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Optional timeout duration; `None` leaves the transport default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// A bodiless GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: HttpMethod::GET, url: url.into(), headers: Vec::new(), body: None, timeout: None }
    }

    /// A POST request carrying `body`.
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { method: HttpMethod::POST, url: url.into(), headers: Vec::new(), body: Some(body.into()), timeout: None }
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Bounds the whole round trip.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the first header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP response from executing a call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with `status` and a JSON body.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Error type for transport failures (connection, TLS, timeout).
pub type HttpClientError = Box<dyn Error + Send + Sync>;

/// Transport capability the protocol engine and the remote signer depend on.
///
/// Implementations return every HTTP response as-is, including 4xx/5xx statuses;
/// only failures to complete the round trip are errors.
pub trait EsiaHttpClient: Send + Sync + Clone + 'static {
    /// Execute an HTTP request asynchronously.
    fn execute(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>>;
}

/// In-memory HTTP client stub for testing.
///
/// Responses are keyed by exact URL; every executed request is recorded in order.
#[derive(Clone, Default)]
pub struct InMemoryHttpClient {
    responses: Arc<DashMap<String, HttpResponse>>,
    default_response: Option<HttpResponse>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl InMemoryHttpClient {
    /// Creates a new in-memory HTTP client with no default response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory HTTP client with a default response on miss.
    pub fn with_default(response: HttpResponse) -> Self {
        Self { default_response: Some(response), ..Self::default() }
    }

    /// Register a mock response for a specific URL.
    pub fn insert_response(&self, url: impl Into<String>, response: HttpResponse) {
        self.responses.insert(url.into(), response);
    }

    /// Requests executed so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl EsiaHttpClient for InMemoryHttpClient {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>> {
        let responses = self.responses.clone();
        let default = self.default_response.clone();
        let url = request.url.clone();
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        Box::pin(async move {
            if let Some(entry) = responses.get(&url) {
                Ok(entry.value().clone())
            } else if let Some(resp) = default {
                Ok(resp)
            } else {
                Err(format!("no mock response for url {url}").into())
            }
        })
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestHttpClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::*;

    /// Transport backed by `reqwest`.
    #[derive(Clone)]
    pub struct ReqwestHttpClient {
        inner: reqwest::Client,
    }

    impl ReqwestHttpClient {
        /// Client with default settings and certificate validation on.
        pub fn new() -> Result<Self, HttpClientError> {
            Ok(Self { inner: reqwest::Client::builder().build()? })
        }

        /// Client that skips TLS certificate validation.
        ///
        /// Only for signing services deployed with self-issued certificates.
        pub fn insecure() -> Result<Self, HttpClientError> {
            let inner = reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()?;
            Ok(Self { inner })
        }

        /// Wraps an already configured `reqwest::Client`.
        pub fn from_client(inner: reqwest::Client) -> Self {
            Self { inner }
        }
    }

    impl EsiaHttpClient for ReqwestHttpClient {
        fn execute(
            &self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>> {
            let client = self.inner.clone();
            Box::pin(async move {
                let method = match request.method {
                    HttpMethod::GET => reqwest::Method::GET,
                    HttpMethod::POST => reqwest::Method::POST,
                };
                let mut builder = client.request(method, &request.url);
                for (k, v) in &request.headers {
                    builder = builder.header(k.as_str(), v.as_str());
                }
                if let Some(body) = request.body {
                    builder = builder.body(body);
                }
                if let Some(timeout) = request.timeout {
                    builder = builder.timeout(timeout);
                }
                let resp = builder.send().await?;
                let status = resp.status().as_u16();
                let headers = resp
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
                    .collect();
                let body = resp.bytes().await?.to_vec();
                Ok(HttpResponse { status, headers, body })
            })
        }
    }
}
