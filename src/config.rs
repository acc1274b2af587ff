//! Engine configuration loaded from `~/.config/cinefetch/config.toml`.
//!
//! Every section is optional; a missing file yields [`Config::default`].
//!
//! ```toml
//! [http]
//! timeout_secs = 20
//! redact_cookies = true
//!
//! [challenge]
//! solver_url = "http://localhost:8191"
//!
//! [[providers]]
//! name = "direct"
//! rate_limits = [{ max_requests = 4, window_ms = 1000 }, { max_requests = 89, window_ms = 60000 }]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::rate_limit::{RateLimiter, RateWindow};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    /// Hop cap for redirect chains.
    pub max_redirects: usize,
    /// Include (truncated) bodies in trace logs.
    pub trace_bodies: bool,
    /// Mask `Cookie`/`Set-Cookie` values in trace logs.
    pub redact_cookies: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 30,
            max_redirects: 20,
            trace_bodies: false,
            redact_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the single 429 retry when the server sends no `Retry-After`.
    pub default_delay_ms: u64,
    /// Ceiling for any 429 wait.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Base URL of a FlareSolverr-compatible service. No solving when unset.
    pub solver_url: Option<String>,
    pub max_timeout_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            solver_url: None,
            max_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl From<RateLimitConfig> for RateWindow {
    fn from(cfg: RateLimitConfig) -> Self {
        RateWindow::new(cfg.max_requests, Duration::from_millis(cfg.window_ms))
    }
}

/// Per-provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitConfig>,
    /// Player bootstrap script carrying the link cipher keys.
    #[serde(default)]
    pub bootstrap_url: Option<String>,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub challenge: ChallengeConfig,
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))
    }

    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// New limiter for a provider, `None` when it declares no windows.
    ///
    /// Every call builds independent windows; share one instance per
    /// provider (see [`Config::rate_limiters`]).
    #[must_use]
    pub fn rate_limiter(&self, provider: &str) -> Option<RateLimiter> {
        let cfg = self.provider(provider)?;
        if cfg.rate_limits.is_empty() {
            return None;
        }
        Some(RateLimiter::new(
            cfg.rate_limits.iter().copied().map(RateWindow::from),
        ))
    }

    /// One limiter per rate-limited provider, keyed by name.
    #[must_use]
    pub fn rate_limiters(&self) -> HashMap<String, RateLimiter> {
        let mut limiters = HashMap::new();
        for cfg in &self.providers {
            if limiters.contains_key(&cfg.name) {
                continue;
            }
            if let Some(limiter) = self.rate_limiter(&cfg.name) {
                limiters.insert(cfg.name.clone(), limiter);
            }
        }
        limiters
    }
}

/// Return the path to the config file.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cinefetch")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.http.max_redirects, 20);
        assert_eq!(cfg.retry.default_delay_ms, 200);
        assert_eq!(cfg.retry.max_delay_ms, 10_000);
        assert!(cfg.challenge.solver_url.is_none());
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn parse_provider_windows() {
        let toml_str = r#"
[http]
timeout_secs = 5

[[providers]]
name = "example"
bootstrap_url = "https://example.com/player.js"
rate_limits = [
    { max_requests = 4, window_ms = 1000 },
    { max_requests = 89, window_ms = 60000 },
]
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.http.timeout_secs, 5);
        assert_eq!(cfg.http.connect_timeout_secs, 10);
        let provider = cfg.provider("example").unwrap();
        assert_eq!(provider.rate_limits.len(), 2);
        assert_eq!(
            RateWindow::from(provider.rate_limits[1]),
            RateWindow::per_minute(89)
        );
        assert!(cfg.rate_limiter("example").is_some());
        assert!(cfg.rate_limiter("unknown").is_none());
        let limiters = cfg.rate_limiters();
        assert_eq!(limiters.len(), 1);
        assert!(limiters.contains_key("example"));
    }

    #[test]
    fn provider_without_windows_is_unlimited() {
        let cfg: Config = toml::from_str("[[providers]]\nname = \"free\"\n").unwrap();
        assert!(cfg.rate_limiter("free").is_none());
        assert!(cfg.rate_limiters().is_empty());
    }

    #[test]
    fn invalid_toml_reports_path() {
        let dir = std::env::temp_dir().join(format!("cinefetch-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[http\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
