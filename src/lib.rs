//! `cinefetch` - provider resolution engine
//!
//! # Features
//!
//! - **Resilient fetching**: per-provider rate limits, redirect chains,
//!   one-shot 429 retry, bot-challenge solving, cancellation
//! - **Playlist decoding**: PlayerJS strings and JSON, HLS master playlists
//! - **Obfuscated links**: native cipher with a sandboxed `QuickJS` fallback
//! - **Lazy content tree**: files and folders resolved at most once, on demand
//!
//! # Example
//!
//! ```rust,no_run
//! use cinefetch::{Config, Engine};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(Config::load()?)?;
//!     let cancel = CancellationToken::new();
//!     if let Some(node) = engine.load("https://cdn.example/movie.mp4", &cancel).await? {
//!         println!("{}", node.title());
//!     }
//!     Ok(())
//! }
//! ```

pub mod challenge;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod http_client;
pub mod js_engine;
pub mod obfuscation;
pub mod playlist;
pub mod provider;
pub mod rate_limit;
pub mod transport;
pub mod tree;

pub use challenge::{ChallengeSolution, ChallengeSolver, FlareSolverrSolver};
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use executor::{RequestExecutor, RetryPolicy, TraceOptions};
pub use fingerprint::{chrome_profile, firefox_profile, random_profile, BrowserProfile};
pub use http_client::AcceleratedClient;
pub use js_engine::{QuickJsSandbox, ScriptEngine};
pub use obfuscation::{decode_obfuscated_link, LinkDecoder};
pub use provider::{DirectLinkProvider, Provider, ProviderContext, ProviderRouter};
pub use rate_limit::{RateLease, RateLimiter, RateWindow};
pub use transport::{Request, Response, Transport};
pub use tree::{
    File, FileId, Folder, FolderType, MediaSet, Quality, Resolver, TreeNode, Video,
};

/// Version of cinefetch
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
