//! Provider seam.
//!
//! # Architecture
//!
//! - [`Provider`]: turns one page/link of a site into a content tree
//! - [`ProviderRouter`]: dispatches input to the first matching provider
//! - [`ProviderContext`]: what a provider may use (executor, its own rate
//!   limiter, the factory registry)
//!
//! Site-specific scraping rules live in provider implementations; the
//! crate ships [`DirectLinkProvider`] for links that need none.

mod direct;

pub use direct::DirectLinkProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::executor::RequestExecutor;
use crate::rate_limit::RateLimiter;
use crate::transport::Request;
use crate::tree::{FactoryRegistry, TreeNode};

/// Shared services handed to a provider.
#[derive(Clone)]
pub struct ProviderContext {
    pub executor: Arc<RequestExecutor>,
    pub registry: FactoryRegistry,
    /// This provider's request budget; `None` means unlimited.
    pub rate_limiter: Option<RateLimiter>,
}

impl ProviderContext {
    /// GET request carrying this provider's rate limiter.
    pub fn get(&self, url: &str) -> Result<Request> {
        let request = Request::get(url)?;
        Ok(match &self.rate_limiter {
            Some(limiter) => request.with_rate_limiter(limiter.clone()),
            None => request,
        })
    }
}

/// One content source.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short lowercase name, also the key of its `[[providers]]` config.
    fn name(&self) -> &'static str;

    /// Returns `true` if this provider handles the input.
    fn matches(&self, input: &str) -> bool;

    /// Build the content tree for the input. `Ok(None)` when the page
    /// holds nothing playable.
    async fn load_item(
        &self,
        input: &str,
        cx: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Result<Option<TreeNode>>;
}

/// Routes input to providers. Checked in registration order, first match
/// wins.
pub struct ProviderRouter {
    providers: Vec<(Box<dyn Provider>, ProviderContext)>,
    executor: Arc<RequestExecutor>,
    registry: FactoryRegistry,
}

impl ProviderRouter {
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, registry: FactoryRegistry) -> Self {
        Self {
            providers: Vec::new(),
            executor,
            registry,
        }
    }

    /// Router with the built-in providers. Each takes its limiter from
    /// `limiters` by provider name.
    #[must_use]
    pub fn with_defaults(
        executor: Arc<RequestExecutor>,
        registry: FactoryRegistry,
        limiters: &HashMap<String, RateLimiter>,
    ) -> Self {
        let mut router = Self::new(executor, registry);
        router.register(Box::new(DirectLinkProvider), limiters.get("direct").cloned());
        router
    }

    pub fn register(&mut self, provider: Box<dyn Provider>, rate_limiter: Option<RateLimiter>) {
        let cx = ProviderContext {
            executor: self.executor.clone(),
            registry: self.registry.clone(),
            rate_limiter,
        };
        self.providers.push((provider, cx));
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|(p, _)| p.name()).collect()
    }

    /// Load the tree for `input`.
    ///
    /// Returns `Ok(None)` if no provider matches or the provider fails
    /// (logged as warning). Only cancellation is returned as an error.
    pub async fn load(&self, input: &str, cancel: &CancellationToken) -> Result<Option<TreeNode>> {
        let Some((provider, cx)) = self.providers.iter().find(|(p, _)| p.matches(input)) else {
            debug!(input, "no provider matches");
            return Ok(None);
        };
        debug!(provider = provider.name(), "matched provider");
        match provider.load_item(input, cx, cancel).await {
            Ok(node) => Ok(node),
            Err(e) if e.is_canceled() => Err(e),
            Err(e) => {
                warn!(provider = provider.name(), input, error = %e, "provider failed");
                Ok(None)
            }
        }
    }
}
