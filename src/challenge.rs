//! Bot-challenge detection and solving.
//!
//! Cloudflare-style interstitials answer the real request with a 403/503
//! page that needs a browser to pass. A [`ChallengeSolver`] runs that step
//! elsewhere and hands back the clearance cookies so the original request
//! can be replayed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{EngineError, Result};
use crate::transport::{Request, Response, Transport};

/// Body fragments served only by challenge pages
const CHALLENGE_MARKERS: &[&str] = &[
    "challenge-platform",
    "cf-browser-verification",
    "cf_chl_opt",
    "<title>Just a moment...</title>",
];

/// Returns `true` if the response is a bot challenge instead of content.
#[must_use]
pub fn is_challenge(response: &Response) -> bool {
    if response
        .header("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return true;
    }

    let blocked = matches!(
        response.status,
        StatusCode::FORBIDDEN | StatusCode::SERVICE_UNAVAILABLE
    );
    let cloudflare = response
        .header("server")
        .is_some_and(|v| v.to_ascii_lowercase().contains("cloudflare"));
    if !(blocked && cloudflare) {
        return false;
    }

    let body = String::from_utf8_lossy(&response.body);
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Outcome of a successful solve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeSolution {
    /// `(name, value)` pairs to append to the replayed request.
    pub cookies: Vec<(String, String)>,
    /// User-Agent the clearance is bound to, if the solver reports one.
    pub user_agent: Option<String>,
}

/// Solves a bot challenge for a URL.
///
/// `Ok(None)` means the solver saw no protection; the caller keeps the
/// original response.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Option<ChallengeSolution>>;
}

/// Solver backed by a FlareSolverr-compatible HTTP service.
pub struct FlareSolverrSolver {
    transport: Arc<dyn Transport>,
    endpoint: Url,
    max_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveCommand<'a> {
    cmd: &'static str,
    url: &'a str,
    max_timeout: u64,
}

#[derive(Debug, Deserialize)]
struct SolveReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    solution: Option<SolvedPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolvedPage {
    #[serde(default)]
    cookies: Vec<SolvedCookie>,
    #[serde(default)]
    user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SolvedCookie {
    name: String,
    value: String,
}

impl FlareSolverrSolver {
    /// `endpoint` is the service base URL, e.g. `http://localhost:8191`.
    pub fn new(transport: Arc<dyn Transport>, endpoint: &str, max_timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?.join("v1")?;
        Ok(Self {
            transport,
            endpoint,
            max_timeout,
        })
    }
}

#[async_trait]
impl ChallengeSolver for FlareSolverrSolver {
    #[instrument(skip(self, cancel), fields(url = %url))]
    async fn solve(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Option<ChallengeSolution>> {
        let command = SolveCommand {
            cmd: "request.get",
            url: url.as_str(),
            max_timeout: u64::try_from(self.max_timeout.as_millis()).unwrap_or(u64::MAX),
        };
        let request = Request::post_json(self.endpoint.as_str(), &command)?;

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Canceled),
            r = self.transport.execute(&request) => r,
        }
        .map_err(|e| match e {
            EngineError::Canceled => e,
            other => EngineError::Challenge(format!("solver unreachable: {other}")),
        })?;

        let reply: SolveReply = response
            .json()
            .map_err(|e| EngineError::Challenge(e.to_string()))?;
        if reply.status != "ok" {
            return Err(EngineError::Challenge(
                reply.message.unwrap_or_else(|| reply.status.clone()),
            ));
        }

        let Some(page) = reply.solution else {
            return Ok(None);
        };
        if page.cookies.is_empty() {
            debug!("solver reports no protection");
            return Ok(None);
        }

        info!(cookies = page.cookies.len(), "challenge solved");
        Ok(Some(ChallengeSolution {
            cookies: page
                .cookies
                .into_iter()
                .map(|c| (c.name, c.value))
                .collect(),
            user_agent: page.user_agent,
        }))
    }
}
