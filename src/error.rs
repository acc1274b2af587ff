//! Engine error taxonomy.
//!
//! Every fallible operation in the library returns [`EngineError`]. The
//! variants map onto how a failure surfaces to the UI layer:
//!
//! - [`EngineError::Transport`] / [`EngineError::Challenge`]: provider unavailable
//! - [`EngineError::Decode`]: no playable source for one file
//! - [`EngineError::Canceled`]: silent, never logged as a failure

use thiserror::Error;

/// Resolution engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("bot challenge could not be solved: {0}")]
    Challenge(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("operation canceled")]
    Canceled,

    #[error("redirect chain exceeded {0} hops")]
    TooManyRedirects(usize),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid content tree: {0}")]
    InvalidTree(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Cancellation is reported to callers but never logged as a failure.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Whether the provider as a whole should be treated as unreachable.
    #[must_use]
    pub fn is_provider_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Challenge(_) | Self::TooManyRedirects(_)
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
