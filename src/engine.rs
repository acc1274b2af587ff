//! Engine facade: wires configuration, transport, executor, providers and
//! the content tree resolver together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::challenge::FlareSolverrSolver;
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::executor::{RequestExecutor, RetryPolicy, TraceOptions};
use crate::fingerprint::random_profile;
use crate::http_client::AcceleratedClient;
use crate::js_engine::QuickJsSandbox;
use crate::obfuscation::{KeyStore, LinkDecoder};
use crate::provider::{Provider, ProviderRouter};
use crate::rate_limit::RateLimiter;
use crate::transport::Transport;
use crate::tree::{FactoryRegistry, Resolver, TreeNode};

/// Entry point for library users.
///
/// ```no_run
/// # async fn run() -> cinefetch::Result<()> {
/// use cinefetch::{Config, Engine};
/// use tokio_util::sync::CancellationToken;
///
/// let engine = Engine::new(Config::default())?;
/// let cancel = CancellationToken::new();
/// if let Some(node) = engine.load("https://cdn.example/hls/master.m3u8", &cancel).await? {
///     if let Some(file) = node.as_file() {
///         let videos = engine.resolver().resolve_videos(file, &cancel).await?;
///         println!("{} variants", videos.len());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    config: Config,
    executor: Arc<RequestExecutor>,
    /// One limiter per provider, shared by its router context and key store.
    limiters: HashMap<String, RateLimiter>,
    decoders: Mutex<HashMap<String, Arc<LinkDecoder>>>,
    router: ProviderRouter,
    resolver: Resolver,
}

impl Engine {
    /// Engine over a real HTTP client with a random browser profile.
    pub fn new(config: Config) -> Result<Self> {
        let client = AcceleratedClient::with_config(&config.http, random_profile())?;
        debug!(user_agent = %client.profile().user_agent, "http client ready");
        Self::with_transport(config, Arc::new(client))
    }

    /// Engine over any transport (tests, custom stacks).
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let mut executor = RequestExecutor::new(transport.clone())
            .with_policy(RetryPolicy::from_config(&config.http, &config.retry))
            .with_trace(TraceOptions {
                bodies: config.http.trace_bodies,
                redact_cookies: config.http.redact_cookies,
            });

        if let Some(endpoint) = &config.challenge.solver_url {
            let solver = FlareSolverrSolver::new(
                transport,
                endpoint,
                Duration::from_secs(config.challenge.max_timeout_secs),
            )?;
            info!(endpoint = %endpoint, "challenge solver enabled");
            executor = executor.with_solver(Arc::new(solver));
        }

        let executor = Arc::new(executor);
        let registry = FactoryRegistry::new();
        let limiters = config.rate_limiters();
        let router = ProviderRouter::with_defaults(executor.clone(), registry.clone(), &limiters);
        Ok(Self {
            config,
            executor,
            limiters,
            decoders: Mutex::new(HashMap::new()),
            router,
            resolver: Resolver::new(registry),
        })
    }

    /// Register a site provider. It is tried after the built-ins.
    pub fn register_provider(&mut self, provider: Box<dyn Provider>) {
        let limiter = self.rate_limiter(provider.name()).cloned();
        self.router.register(provider, limiter);
    }

    /// The limiter every request of `provider` goes through.
    #[must_use]
    pub fn rate_limiter(&self, provider: &str) -> Option<&RateLimiter> {
        self.limiters.get(provider)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    #[must_use]
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Content tree for a page or link. `Ok(None)` when nothing handles it
    /// or the provider is unavailable.
    pub async fn load(&self, input: &str, cancel: &CancellationToken) -> Result<Option<TreeNode>> {
        self.router.load(input, cancel).await
    }

    /// Link decoder for a provider with a configured `bootstrap_url`.
    ///
    /// Built once per provider; later calls share its bootstrap cache.
    pub fn link_decoder(&self, provider: &str) -> Result<Arc<LinkDecoder>> {
        let mut decoders = self.decoders.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(decoder) = decoders.get(provider) {
            return Ok(decoder.clone());
        }

        let cfg = self
            .config
            .provider(provider)
            .ok_or_else(|| EngineError::Config(format!("unknown provider '{provider}'")))?;
        let url = cfg.bootstrap_url.as_deref().ok_or_else(|| {
            EngineError::Config(format!("provider '{provider}' has no bootstrap_url"))
        })?;

        let mut store = KeyStore::new(self.executor.clone(), Url::parse(url)?);
        if let Some(limiter) = self.rate_limiter(provider) {
            store = store.with_rate_limiter(limiter.clone());
        }
        let decoder = Arc::new(LinkDecoder::new(store, Arc::new(QuickJsSandbox::new())));
        decoders.insert(provider.to_string(), decoder.clone());
        Ok(decoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, RateLimitConfig};
    use crate::obfuscation::{encode_for_test, CipherKeys};
    use crate::transport::{Request, Response};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct Static(&'static str);

    /// Serves `body` and counts requests.
    struct Counting {
        body: &'static str,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Counting {
        async fn execute(&self, request: &Request) -> Result<Response> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Response {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                url: request.url.clone(),
                body: Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    const KEYS_SCRIPT: &str = r#"var s1 = "Ab1+", s2 = "xY9/", s12 = "QwE", s22 = "zT0";"#;

    fn payload() -> String {
        let keys = CipherKeys::new("Ab1+", "xY9/", "QwE", "zT0").unwrap();
        encode_for_test("https://cdn.test/a.m3u8", &keys).unwrap()
    }

    fn limited_config() -> Config {
        let mut config = config();
        config.providers[0].rate_limits = vec![RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
        }];
        config
    }

    #[async_trait]
    impl Transport for Static {
        async fn execute(&self, request: &Request) -> Result<Response> {
            Ok(Response {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                url: request.url.clone(),
                body: Bytes::from_static(self.0.as_bytes()),
            })
        }
    }

    fn config() -> Config {
        Config {
            providers: vec![ProviderConfig {
                name: "kinoplay".into(),
                rate_limits: Vec::new(),
                bootstrap_url: Some("https://player.test/p.js".into()),
            }],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn loads_direct_links() {
        let engine = Engine::with_transport(Config::default(), Arc::new(Static(""))).unwrap();
        let node = engine
            .load("https://cdn.test/movie.mp4", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.title(), "movie.mp4");
        assert_eq!(engine.router().provider_names(), vec!["direct"]);
    }

    #[tokio::test]
    async fn link_decoder_uses_bootstrap_keys() {
        let script = r#"var s1 = "Ab1+", s2 = "xY9/", s12 = "QwE", s22 = "zT0";"#;
        let engine = Engine::with_transport(config(), Arc::new(Static(script))).unwrap();
        let decoder = engine.link_decoder("kinoplay").unwrap();

        let keys = CipherKeys::new("Ab1+", "xY9/", "QwE", "zT0").unwrap();
        let payload = encode_for_test("https://cdn.test/a.m3u8", &keys).unwrap();
        let link = decoder.decode(&payload, &CancellationToken::new()).await.unwrap();
        assert_eq!(link.as_deref(), Some("https://cdn.test/a.m3u8"));
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_is_fetched_once_per_engine() {
        let host = Arc::new(Counting {
            body: KEYS_SCRIPT,
            fetches: AtomicUsize::new(0),
        });
        let engine = Engine::with_transport(limited_config(), host.clone()).unwrap();
        let cancel = CancellationToken::new();
        let payload = payload();

        let start = Instant::now();
        for _ in 0..3 {
            let decoder = engine.link_decoder("kinoplay").unwrap();
            let link = decoder.decode(&payload, &cancel).await.unwrap();
            assert_eq!(link.as_deref(), Some("https://cdn.test/a.m3u8"));
        }
        assert_eq!(host.fetches.load(Ordering::SeqCst), 1);
        // One request fits the 1/min window, so nothing waited.
        assert!(start.elapsed() < Duration::from_secs(60));
        assert!(Arc::ptr_eq(
            &engine.link_decoder("kinoplay").unwrap(),
            &engine.link_decoder("kinoplay").unwrap()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn key_store_shares_the_provider_window() {
        let engine =
            Engine::with_transport(limited_config(), Arc::new(Static(KEYS_SCRIPT))).unwrap();
        let cancel = CancellationToken::new();
        let limiter = engine.rate_limiter("kinoplay").unwrap();
        let _lease = limiter.acquire(&cancel).await.unwrap();

        let start = Instant::now();
        let decoder = engine.link_decoder("kinoplay").unwrap();
        decoder.decode(&payload(), &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[test]
    fn link_decoder_needs_a_bootstrap_url() {
        let engine = Engine::with_transport(Config::default(), Arc::new(Static(""))).unwrap();
        assert!(matches!(engine.link_decoder("kinoplay"), Err(EngineError::Config(_))));
    }

    #[test]
    fn solver_endpoint_must_be_a_url() {
        let mut config = Config::default();
        config.challenge.solver_url = Some("not a url".into());
        assert!(Engine::with_transport(config, Arc::new(Static(""))).is_err());
    }
}
