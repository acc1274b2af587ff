//! reqwest-backed transport
//!
//! Features:
//! - HTTP/2 with fallback to HTTP/1.1
//! - TLS 1.3 via rustls
//! - Brotli, Zstd, Gzip compression (auto-negotiated)
//! - DNS caching + Happy Eyeballs (IPv4/IPv6 racing)
//! - Shared cookie jar, so challenge cookies stick for later requests
//! - Browser fingerprint headers
//!
//! Redirects are disabled at this layer: the executor follows them itself so
//! it can apply its own method-downgrade and hop-cap rules.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::config::HttpConfig;
use crate::error::{EngineError, Result};
use crate::fingerprint::{random_profile, BrowserProfile};
use crate::transport::{Request, Response, Transport};

/// HTTP client with acceleration features and a browser fingerprint
pub struct AcceleratedClient {
    client: Client,
    profile: BrowserProfile,
}

impl AcceleratedClient {
    /// Create a client with a random browser profile and default timeouts
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default(), random_profile())
    }

    /// Create client with specific settings and browser profile
    pub fn with_config(config: &HttpConfig, profile: BrowserProfile) -> Result<Self> {
        let client = Client::builder()
            // ═══════════════════════════════════════════════════════════════
            // CONNECTION
            // ═══════════════════════════════════════════════════════════════
            // Let the server negotiate HTTP/2; many provider mirrors are h1 only
            .http2_adaptive_window(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            // ═══════════════════════════════════════════════════════════════
            // TLS + COMPRESSION
            // ═══════════════════════════════════════════════════════════════
            .use_rustls_tls()
            .brotli(true)
            .zstd(true)
            .gzip(true)
            .deflate(true)
            // ═══════════════════════════════════════════════════════════════
            // BROWSER FINGERPRINTING
            // ═══════════════════════════════════════════════════════════════
            .default_headers(profile.to_headers())
            // ═══════════════════════════════════════════════════════════════
            // TIMEOUTS
            // ═══════════════════════════════════════════════════════════════
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            // ═══════════════════════════════════════════════════════════════
            // REDIRECTS: handled by the executor
            // ═══════════════════════════════════════════════════════════════
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .build()?;

        Ok(Self { client, profile })
    }

    /// Browser profile whose headers this client sends
    #[must_use]
    pub fn profile(&self) -> &BrowserProfile {
        &self.profile
    }
}

#[async_trait]
impl Transport for AcceleratedClient {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            EngineError::Transport(format!("{} {}: {e}", request.method, request.url))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        debug!(
            status = %status,
            version = ?response.version(),
            content_encoding = ?headers.get("content-encoding"),
            "Response received"
        );

        let body = response.bytes().await?;
        Ok(Response {
            status,
            headers,
            url,
            body,
        })
    }
}
