//! Cipher key pairs and the per-process bootstrap cache.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{EngineError, Result};
use crate::executor::RequestExecutor;
use crate::rate_limit::RateLimiter;
use crate::transport::Request;

/// `s1 = "…"`, `s12: '…'` and friends inside a player script.
static KEY_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(s12|s22|s1|s2)\s*[:=]\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("valid key regex")
});

/// Two equal-length strings whose characters are swapped index by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    a: String,
    b: String,
}

impl KeyPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Result<Self> {
        let (a, b) = (a.into(), b.into());
        if a.chars().count() != b.chars().count() {
            return Err(EngineError::Decode(format!(
                "key pair length mismatch ({} vs {})",
                a.chars().count(),
                b.chars().count()
            )));
        }
        Ok(Self { a, b })
    }

    /// `(a[i], b[i])` in index order.
    #[must_use]
    pub fn chars(&self) -> Vec<(char, char)> {
        self.a.chars().zip(self.b.chars()).collect()
    }

    #[must_use]
    pub fn a(&self) -> &str {
        &self.a
    }

    #[must_use]
    pub fn b(&self) -> &str {
        &self.b
    }
}

/// The `(s1, s2)` and `(s12, s22)` pairs of the link cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherKeys {
    first: KeyPair,
    second: KeyPair,
}

impl CipherKeys {
    pub fn new(s1: &str, s2: &str, s12: &str, s22: &str) -> Result<Self> {
        Ok(Self {
            first: KeyPair::new(s1, s2)?,
            second: KeyPair::new(s12, s22)?,
        })
    }

    /// Extract the four keys from a player script. `None` unless all four
    /// are assigned string literals.
    #[must_use]
    pub fn from_script(script: &str) -> Option<Self> {
        let mut found: [Option<&str>; 4] = [None; 4];
        for caps in KEY_ASSIGNMENT.captures_iter(script) {
            let slot = match &caps[1] {
                "s1" => 0,
                "s2" => 1,
                "s12" => 2,
                _ => 3,
            };
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            found[slot].get_or_insert(value);
        }
        let [Some(s1), Some(s2), Some(s12), Some(s22)] = found else {
            return None;
        };
        Self::new(s1, s2, s12, s22).ok()
    }

    #[must_use]
    pub fn first(&self) -> &KeyPair {
        &self.first
    }

    #[must_use]
    pub fn second(&self) -> &KeyPair {
        &self.second
    }

    /// Script globals `s1`, `s2`, `s12`, `s22`.
    #[must_use]
    pub fn globals(&self) -> [(&'static str, &str); 4] {
        [
            ("s1", self.first.a()),
            ("s2", self.first.b()),
            ("s12", self.second.a()),
            ("s22", self.second.b()),
        ]
    }
}

/// The player bootstrap script and the keys found in it.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub script: String,
    pub keys: Option<CipherKeys>,
}

impl Bootstrap {
    #[must_use]
    pub fn from_script(script: String) -> Self {
        let keys = CipherKeys::from_script(&script);
        Self { script, keys }
    }
}

/// Fetches the bootstrap script at most once and keeps it.
///
/// Concurrent first callers share one fetch. A failed fetch stores nothing,
/// so the next call tries again.
pub struct KeyStore {
    executor: Arc<RequestExecutor>,
    url: Url,
    rate_limiter: Option<RateLimiter>,
    cached: OnceCell<Arc<Bootstrap>>,
}

impl KeyStore {
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, url: Url) -> Self {
        Self {
            executor,
            url,
            rate_limiter: None,
            cached: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Already fetched bootstrap, if any.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<Bootstrap>> {
        self.cached.get().cloned()
    }

    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<Arc<Bootstrap>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Canceled),
            r = self.cached.get_or_try_init(|| self.fetch(cancel)) => r.cloned(),
        }
    }

    pub async fn keys(&self, cancel: &CancellationToken) -> Result<Option<CipherKeys>> {
        Ok(self.bootstrap(cancel).await?.keys.clone())
    }

    #[instrument(skip(self, cancel), fields(url = %self.url))]
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Arc<Bootstrap>> {
        let mut request = Request::new(http::Method::GET, self.url.clone());
        if let Some(limiter) = &self.rate_limiter {
            request = request.with_rate_limiter(limiter.clone());
        }
        let response = self.executor.send(request, cancel).await?.error_for_status()?;
        let bootstrap = Bootstrap::from_script(response.text());
        if bootstrap.keys.is_some() {
            info!(bytes = bootstrap.script.len(), "bootstrap script loaded with cipher keys");
        } else {
            debug!(bytes = bootstrap.script.len(), "bootstrap script has no cipher keys");
        }
        Ok(Arc::new(bootstrap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Response, Transport};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SCRIPT: &str = r#"
        var cfg = {s1: "abc", 's2': 0};
        var s2 = 'xyz';
        window.s12 = "QW"; window.s22 = "ER";
        var s1 = "ignored-second-assignment";
    "#;

    #[test]
    fn pair_lengths_must_match() {
        assert!(KeyPair::new("ab", "c").is_err());
        assert!(KeyPair::new("аб", "cd").is_ok());
    }

    #[test]
    fn keys_from_script() {
        let keys = CipherKeys::from_script(SCRIPT).unwrap();
        assert_eq!(keys.first().a(), "abc");
        assert_eq!(keys.first().b(), "xyz");
        assert_eq!(keys.second().a(), "QW");
        assert_eq!(keys.second().b(), "ER");
        assert_eq!(keys.globals()[3], ("s22", "ER"));
    }

    #[test]
    fn incomplete_script_has_no_keys() {
        assert!(CipherKeys::from_script("var s1 = 'a', s2 = 'b';").is_none());
        assert!(CipherKeys::from_script("var s12x = 'a';").is_none());
    }

    /// Serves `SCRIPT` (or fails) after a delay, counting fetches.
    struct ScriptHost {
        fetches: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl Transport for ScriptHost {
        async fn execute(&self, request: &Request) -> Result<Response> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(EngineError::Transport("connection reset".into()));
            }
            Ok(Response {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                url: request.url.clone(),
                body: Bytes::from_static(SCRIPT.as_bytes()),
            })
        }
    }

    fn store(fail_first: bool) -> (KeyStore, Arc<ScriptHost>) {
        let host = Arc::new(ScriptHost {
            fetches: AtomicUsize::new(0),
            fail_first,
        });
        let executor = Arc::new(RequestExecutor::new(host.clone()));
        let url = Url::parse("https://player.test/bootstrap.js").unwrap();
        (KeyStore::new(executor, url), host)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_access_fetches_once() {
        let (store, host) = store(false);
        let cancel = CancellationToken::new();
        let (a, b, c) = tokio::join!(
            store.keys(&cancel),
            store.keys(&cancel),
            store.bootstrap(&cancel)
        );
        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_some());
        assert!(c.unwrap().script.contains("window.s12"));
        store.keys(&cancel).await.unwrap();
        assert_eq!(host.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_cancels_without_waiting_for_fetch() {
        let (store, host) = store(false);
        let owner = CancellationToken::new();
        let waiter = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let (fetched, (canceled, after), ()) = tokio::join!(
            store.bootstrap(&owner),
            async { (store.bootstrap(&waiter).await, start.elapsed()) },
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                waiter.cancel();
            }
        );
        assert!(fetched.is_ok());
        assert!(canceled.unwrap_err().is_canceled());
        assert!(after < Duration::from_millis(20), "waiter returned after {after:?}");
        assert_eq!(host.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_is_retried_later() {
        let (store, host) = store(true);
        let cancel = CancellationToken::new();
        assert!(store.keys(&cancel).await.is_err());
        assert!(store.cached().is_none());
        assert!(store.keys(&cancel).await.unwrap().is_some());
        assert_eq!(host.fetches.load(Ordering::SeqCst), 2);
    }
}
