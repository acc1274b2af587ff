//! Request/response values and the raw transport seam.
//!
//! A [`Request`] is an immutable description of one HTTP attempt. The
//! executor never mutates a request in place: redirects, throttling retries
//! and challenge replays all derive a new value.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, COOKIE, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{EngineError, Result};
use crate::rate_limit::RateLimiter;

/// Per-request behavior switches.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Follow 3xx responses with a `Location` header.
    pub follow_redirects: bool,
    /// Provider rate limiter to acquire before each attempt.
    pub rate_limiter: Option<RateLimiter>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            rate_limiter: None,
        }
    }
}

/// One outbound HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub options: RequestOptions,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    pub fn post(url: &str, body: impl Into<Bytes>) -> Result<Self> {
        Ok(Self::new(Method::POST, Url::parse(url)?).body(body))
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub fn post_form(url: &str, form: &[(&str, &str)]) -> Result<Self> {
        let body = form
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Self::post(url, body)?.header("content-type", "application/x-www-form-urlencoded")
    }

    /// POST a JSON body.
    pub fn post_json<T: serde::Serialize>(url: &str, payload: &T) -> Result<Self> {
        let body = serde_json::to_vec(payload)?;
        Self::post(url, body)?.header("content-type", "application/json")
    }

    /// Add a header, replacing any previous value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| EngineError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EngineError::InvalidRequest(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.options.follow_redirects = follow;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.options.rate_limiter = Some(limiter);
        self
    }

    /// Same request aimed at another URL. With `as_get` the method becomes
    /// GET and the body is dropped.
    #[must_use]
    pub fn redirected(&self, url: Url, as_get: bool) -> Self {
        let mut next = self.clone();
        next.url = url;
        if as_get {
            next.method = Method::GET;
            next.body = None;
            next.headers.remove(http::header::CONTENT_TYPE);
            next.headers.remove(http::header::CONTENT_LENGTH);
        }
        next
    }

    /// Same request with extra `name=value` cookies appended to `Cookie`.
    #[must_use]
    pub fn with_cookies(&self, cookies: &[(String, String)]) -> Self {
        let mut next = self.clone();
        if cookies.is_empty() {
            return next;
        }
        let appended = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        let merged = match next.headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}; {appended}"),
            _ => appended,
        };
        if let Ok(value) = HeaderValue::from_str(&merged) {
            next.headers.insert(COOKIE, value);
        }
        next
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL this response was served from.
    pub url: Url,
    pub body: Bytes,
}

impl Response {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Body as text (lossy UTF-8).
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body into a typed structure.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| EngineError::Decode(format!("unexpected JSON from {}: {e}", self.url)))
    }

    /// Fail with a transport error on non-2xx status.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(EngineError::Transport(format!(
                "{} responded {}",
                self.url, self.status
            )))
        }
    }
}

/// Executes exactly one HTTP exchange: no redirects, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &Request) -> Result<Response>;
}
