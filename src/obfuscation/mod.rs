//! Obfuscated player links.
//!
//! A link starting with `=` is obfuscated. The native [`cipher`] is tried
//! first; when the keys are unknown or the cipher fails, the provider's
//! own decoder script runs in the sandbox ([`script`]). Anything not
//! starting with `=` is a plain link and is returned unchanged.

pub mod cipher;
pub mod keys;
pub mod script;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::js_engine::ScriptEngine;

pub use cipher::encode_for_test;
pub use keys::{Bootstrap, CipherKeys, KeyPair, KeyStore};
pub use script::ScriptDecoder;

/// Returns `true` for payloads that need decoding.
#[must_use]
pub fn is_obfuscated(input: &str) -> bool {
    input.starts_with('=')
}

/// Decode an obfuscated link.
///
/// Plain input comes back unchanged. `None` means both strategies failed
/// (or neither was available).
#[must_use]
pub fn decode_obfuscated_link(
    input: &str,
    keys: Option<&CipherKeys>,
    fallback: Option<&ScriptDecoder>,
) -> Option<String> {
    let Some(payload) = input.strip_prefix('=') else {
        return Some(input.to_string());
    };

    if let Some(keys) = keys {
        match cipher::decode(payload, keys) {
            Ok(link) => return Some(link),
            Err(e) => debug!(error = %e, "cipher failed, trying script"),
        }
    }

    fallback?.decode(input, keys)
}

/// Link decoding backed by the provider's bootstrap script.
///
/// The bootstrap is fetched on first use of an obfuscated link; plain
/// links never touch the network.
pub struct LinkDecoder {
    store: KeyStore,
    engine: Arc<dyn ScriptEngine>,
}

impl LinkDecoder {
    pub fn new(store: KeyStore, engine: Arc<dyn ScriptEngine>) -> Self {
        Self { store, engine }
    }

    /// `Ok(None)` when the link could not be decoded. Only cancellation is
    /// an error.
    pub async fn decode(&self, input: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        if !is_obfuscated(input) {
            return Ok(Some(input.to_string()));
        }

        let bootstrap = match self.store.bootstrap(cancel).await {
            Ok(bootstrap) => Some(bootstrap),
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "bootstrap script unavailable");
                None
            }
        };

        let keys = bootstrap.as_ref().and_then(|b| b.keys.clone());
        let fallback = bootstrap
            .as_ref()
            .map(|b| ScriptDecoder::new(self.engine.clone(), b.script.as_str()));

        // The script fallback can run until the sandbox deadline; keep it off the runtime.
        let input = input.to_string();
        let task = tokio::task::spawn_blocking(move || {
            decode_obfuscated_link(&input, keys.as_ref(), fallback.as_ref())
        });
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Canceled),
            joined = task => joined.map_err(|e| EngineError::Script(format!("decoder task failed: {e}"))),
        }
    }
}
