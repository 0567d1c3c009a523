//! HTTP client used by virtual users.
//!
//! [`HttpClient`] wraps a single [`reqwest::Client`] (whose connection pool is
//! safe to share) and turns every request into a [`RequestRecord`]. Transport
//! failures never surface as `Err`: they produce a record with status `0` so
//! checks decide whether the iteration passed.

use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::loadtest::error::{CheckError, RequestError};

/// HTTP methods a scenario step may use.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        };
        f.write_str(s)
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

/// Outcome of one HTTP request. Immutable once built.
///
/// The body is kept as text; [`RequestRecord::json`] parses it on first use
/// and caches the result (including a parse failure).
#[derive(Debug)]
pub struct RequestRecord {
    /// Method that was sent.
    pub method: HttpMethod,
    /// Absolute URL that was requested.
    pub url: String,
    /// Wall-clock time at which the request was issued.
    pub issued_at: DateTime<Utc>,
    /// Monotonic instant at which the request was issued.
    pub started: Instant,
    /// Wall-clock duration from issue until the body was fully read.
    pub duration: Duration,
    /// HTTP status code, or `0` when the request failed in transport.
    pub status: u16,
    /// Transport error, if any.
    pub error: Option<RequestError>,
    body: Option<String>,
    json: OnceLock<Result<serde_json::Value, CheckError>>,
}

impl RequestRecord {
    /// Record for a request that received a response.
    pub fn completed(
        method: HttpMethod,
        url: impl Into<String>,
        status: u16,
        duration: Duration,
        body: Option<String>,
    ) -> Self {
        Self::build(method, url.into(), status, duration, None, body)
    }

    /// Record for a request that failed before a response was read.
    pub fn failed(
        method: HttpMethod,
        url: impl Into<String>,
        duration: Duration,
        error: RequestError,
    ) -> Self {
        Self::build(method, url.into(), 0, duration, Some(error), None)
    }

    fn build(
        method: HttpMethod,
        url: String,
        status: u16,
        duration: Duration,
        error: Option<RequestError>,
        body: Option<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            method,
            url,
            issued_at: Utc::now()
                - chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero()),
            started: now.checked_sub(duration).unwrap_or(now),
            duration,
            status,
            error,
            body,
            json: OnceLock::new(),
        }
    }

    /// Response body text, if a response was received.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Parsed JSON body. Parsing happens once; later calls reuse the result.
    pub fn json(&self) -> Result<&serde_json::Value, CheckError> {
        self.json
            .get_or_init(|| match &self.body {
                Some(text) => serde_json::from_str(text).map_err(|e| CheckError::Json {
                    message: e.to_string(),
                }),
                None => Err(CheckError::Json {
                    message: "no response body".to_string(),
                }),
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// `true` when a response arrived with a 2xx or 3xx status.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.status)
    }

    /// Metrics category for a failed request: the transport error category,
    /// or `"http_4xx"` / `"http_5xx"` for error statuses.
    pub fn failure_category(&self) -> Option<&'static str> {
        if let Some(err) = &self.error {
            return Some(err.error_category());
        }
        match self.status {
            400..=499 => Some("http_4xx"),
            500..=599 => Some("http_5xx"),
            200..=399 => None,
            _ => Some("http_other"),
        }
    }
}

/// Shared HTTP client. Cheap to clone; every VU gets its own handle onto the
/// same connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Build a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, RequestError> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RequestError::InvalidRequest {
                message: e.to_string(),
            })?;
        Ok(Self { inner })
    }

    /// Issue a GET request.
    pub async fn get(&self, url: &str) -> RequestRecord {
        self.send(HttpMethod::Get, url, None).await
    }

    /// Issue a request with an optional JSON body.
    ///
    /// The timer starts before the request is sent and stops once the body
    /// has been read, or on failure.
    pub async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> RequestRecord {
        let mut request = self.inner.request(method.into(), url);
        if let Some(json) = body {
            request = request.json(json);
        }

        let issued_at = Utc::now();
        let start = Instant::now();
        let mut record = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(text) => {
                        RequestRecord::completed(method, url, status, start.elapsed(), Some(text))
                    },
                    Err(err) => {
                        let mut record = RequestRecord::failed(
                            method,
                            url,
                            start.elapsed(),
                            RequestError::classify_reqwest(&err),
                        );
                        record.status = status;
                        record
                    },
                }
            },
            Err(err) => RequestRecord::failed(
                method,
                url,
                start.elapsed(),
                RequestError::classify_reqwest(&err),
            ),
        };
        record.issued_at = issued_at;
        record.started = start;
        record
    }
}
