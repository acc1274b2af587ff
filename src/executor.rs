//! Resilient request execution.
//!
//! [`RequestExecutor::send`] runs one logical request chain:
//!
//! 1. acquire the provider's rate-limit lease (if any)
//! 2. perform the raw HTTP exchange
//! 3. solve a bot challenge once and replay with the clearance cookies
//! 4. follow redirects (hop-capped)
//! 5. retry a 429 exactly once, honoring `Retry-After`
//!
//! Each retry re-enters the pipeline with a new [`Request`] value and an
//! updated [`ChainState`]; nothing about an attempt is mutated after it was
//! sent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use http::header::{COOKIE, SET_COOKIE, USER_AGENT};
use http::{HeaderMap, Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::challenge::{self, ChallengeSolution, ChallengeSolver};
use crate::config::{HttpConfig, RetryConfig};
use crate::error::{EngineError, Result};
use crate::transport::{Request, Response, Transport};

const TRACE_BODY_LIMIT: usize = 2048;

/// Retry and redirect limits.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Wait before the 429 retry when the server gives no `Retry-After`.
    pub default_delay: Duration,
    /// Ceiling for any 429 wait.
    pub max_delay: Duration,
    pub max_redirects: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            max_redirects: 20,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(http: &HttpConfig, retry: &RetryConfig) -> Self {
        Self {
            default_delay: Duration::from_millis(retry.default_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            max_redirects: http.max_redirects,
        }
    }
}

/// What the trace log includes.
#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub bodies: bool,
    pub redact_cookies: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            bodies: false,
            redact_cookies: true,
        }
    }
}

/// Bookkeeping carried across the attempts of one logical request.
#[derive(Debug, Clone, Default)]
struct ChainState {
    hops: usize,
    /// URL the chain started from.
    origin: Option<Url>,
    throttle_retry_spent: bool,
    challenge_attempted: bool,
}

/// Sends requests with rate limiting, challenge solving, redirects and
/// 429 handling layered over a [`Transport`].
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    policy: RetryPolicy,
    trace: TraceOptions,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            solver: None,
            policy: RetryPolicy::default(),
            trace: TraceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceOptions) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the full request chain.
    #[instrument(skip(self, request, cancel), fields(method = %request.method, url = %request.url))]
    pub async fn send(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        let chain = ChainState {
            origin: Some(request.url.clone()),
            ..ChainState::default()
        };
        self.attempt(request, chain, cancel).await
    }

    /// GET a URL and return the body of a 2xx response as text.
    pub async fn get_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let response = self.send(Request::get(url)?, cancel).await?;
        Ok(response.error_for_status()?.text())
    }

    /// POST a urlencoded form and return the body of a 2xx response as text.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let response = self.send(Request::post_form(url, form)?, cancel).await?;
        Ok(response.error_for_status()?.text())
    }

    fn attempt<'a>(
        &'a self,
        request: Request,
        chain: ChainState,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }

            let _lease = match &request.options.rate_limiter {
                Some(limiter) => Some(limiter.acquire(cancel).await?),
                None => None,
            };

            self.trace_request(&request);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Canceled),
                r = self.transport.execute(&request) => r,
            };
            let response = match outcome {
                Ok(response) => response,
                Err(EngineError::Canceled) => return Err(EngineError::Canceled),
                Err(e) => {
                    warn!(url = %request.url, error = %e, "request failed");
                    return Err(e);
                }
            };
            self.trace_response(&response);

            // Bot challenge: one solve round per chain
            if !chain.challenge_attempted && challenge::is_challenge(&response) {
                if let Some(solution) = self.solve_challenge(&request.url, cancel).await? {
                    let replay = replay_with_solution(&request, &solution);
                    let next = ChainState {
                        challenge_attempted: true,
                        ..chain
                    };
                    return self.attempt(replay, next, cancel).await;
                }
                return Ok(response);
            }

            if response.status.is_redirection() && request.options.follow_redirects {
                if let Some(next_request) = self.redirect_target(&request, &response, &chain)? {
                    if chain.hops >= self.policy.max_redirects {
                        warn!(hops = chain.hops, url = %request.url, "redirect hop cap reached");
                        return Err(EngineError::TooManyRedirects(chain.hops));
                    }
                    let next = ChainState {
                        hops: chain.hops + 1,
                        ..chain
                    };
                    return self.attempt(next_request, next, cancel).await;
                }
            }

            if response.status == StatusCode::TOO_MANY_REQUESTS && !chain.throttle_retry_spent {
                let delay = retry_after(&response.headers, Utc::now())
                    .unwrap_or(self.policy.default_delay)
                    .min(self.policy.max_delay);
                info!(delay = ?delay, url = %request.url, "throttled (429), retrying once");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(EngineError::Canceled),
                    () = tokio::time::sleep(delay) => {}
                }
                let next = ChainState {
                    throttle_retry_spent: true,
                    ..chain
                };
                return self.attempt(request, next, cancel).await;
            }

            Ok(response)
        })
    }

    /// `Ok(None)` keeps the challenge response; only cancellation escapes.
    async fn solve_challenge(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Option<ChallengeSolution>> {
        let Some(solver) = &self.solver else {
            debug!(url = %url, "challenge detected but no solver configured");
            return Ok(None);
        };
        match solver.solve(url, cancel).await {
            Ok(solution) => Ok(solution),
            Err(EngineError::Canceled) => Err(EngineError::Canceled),
            Err(e) => {
                warn!(url = %url, error = %e, "challenge solve failed");
                Ok(None)
            }
        }
    }

    fn redirect_target(
        &self,
        request: &Request,
        response: &Response,
        chain: &ChainState,
    ) -> Result<Option<Request>> {
        let Some(location) = response.location() else {
            return Ok(None);
        };
        let target = request.url.join(location.trim()).map_err(|e| {
            EngineError::Transport(format!("bad Location {location:?} from {}: {e}", request.url))
        })?;

        // Coming back to a URL already requested in this chain with a
        // non-GET verb would replay the side effect; 303 always means GET.
        let revisit = target == request.url || chain.origin.as_ref() == Some(&target);
        let as_get = request.method != Method::GET
            && (revisit || response.status == StatusCode::SEE_OTHER);

        debug!(from = %request.url, to = %target, downgrade = as_get, "following redirect");
        Ok(Some(request.redirected(target, as_get)))
    }

    fn trace_request(&self, request: &Request) {
        trace!(
            method = %request.method,
            url = %request.url,
            headers = %format_headers(&request.headers, self.trace.redact_cookies),
            "→ request"
        );
        if self.trace.bodies {
            if let Some(body) = &request.body {
                trace!(body = %truncate_body(body), "→ request body");
            }
        }
    }

    fn trace_response(&self, response: &Response) {
        trace!(
            status = %response.status,
            url = %response.url,
            headers = %format_headers(&response.headers, self.trace.redact_cookies),
            "← response"
        );
        if self.trace.bodies {
            trace!(body = %truncate_body(&response.body), "← response body");
        }
    }
}

fn replay_with_solution(request: &Request, solution: &ChallengeSolution) -> Request {
    let mut replay = request.with_cookies(&solution.cookies);
    if let Some(ua) = solution
        .user_agent
        .as_deref()
        .and_then(|ua| ua.parse::<http::HeaderValue>().ok())
    {
        replay.headers.insert(USER_AGENT, ua);
    }
    replay
}

/// Parse `Retry-After` as delta-seconds or an HTTP-date relative to `now`.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn format_headers(headers: &HeaderMap, redact_cookies: bool) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if redact_cookies && (name == COOKIE || name == SET_COOKIE) {
                "<redacted>"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{name}: {shown}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= TRACE_BODY_LIMIT {
        return text.into_owned();
    }
    let mut end = TRACE_BODY_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes)", &text[..end], body.len())
}
