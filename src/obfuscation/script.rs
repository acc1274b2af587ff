//! Script fallback: let the provider's own decoder do the work.

use std::sync::Arc;

use tracing::debug;

use crate::js_engine::ScriptEngine;

use super::keys::CipherKeys;

/// Runs a provider script that defines `decode(input)`.
#[derive(Clone)]
pub struct ScriptDecoder {
    engine: Arc<dyn ScriptEngine>,
    source: Arc<str>,
}

impl std::fmt::Debug for ScriptDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptDecoder")
            .field("source_len", &self.source.len())
            .finish_non_exhaustive()
    }
}

impl ScriptDecoder {
    pub fn new(engine: Arc<dyn ScriptEngine>, source: impl Into<Arc<str>>) -> Self {
        Self {
            engine,
            source: source.into(),
        }
    }

    /// `decode(input)` evaluated with the key pairs (when known) as
    /// globals. `None` on any script error.
    #[must_use]
    pub fn decode(&self, input: &str, keys: Option<&CipherKeys>) -> Option<String> {
        let argument = serde_json::to_string(input).ok()?;
        let program = format!("{}\n;decode({argument});", self.source);
        let globals: Vec<(&str, &str)> = keys.map(|k| k.globals().to_vec()).unwrap_or_default();

        match self.engine.evaluate(&program, &globals) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(error = %e, "script decoder failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js_engine::QuickJsSandbox;

    fn decoder(source: &str) -> ScriptDecoder {
        ScriptDecoder::new(Arc::new(QuickJsSandbox::new()), source)
    }

    #[test]
    fn runs_provider_decode() {
        let d = decoder("function decode(x) { return atob(x.slice(1)); }");
        assert_eq!(d.decode("=aHR0cHM6Ly9jZG4veC5tcDQ=", None).as_deref(), Some("https://cdn/x.mp4"));
    }

    #[test]
    fn keys_are_visible_as_globals() {
        let keys = CipherKeys::new("ab", "cd", "e", "f").unwrap();
        let d = decoder("function decode(x) { return x + s1 + s2 + s12 + s22; }");
        assert_eq!(d.decode("=", Some(&keys)).as_deref(), Some("=abcdef"));
    }

    #[test]
    fn input_is_passed_as_a_literal() {
        let d = decoder("function decode(x) { return x; }");
        let tricky = "='); throw 1; ('\"\n";
        assert_eq!(d.decode(tricky, None).as_deref(), Some(tricky));
    }

    #[test]
    fn errors_become_none() {
        assert!(decoder("function decode(x) { throw new Error('rotated'); }")
            .decode("=x", None)
            .is_none());
        assert!(decoder("syntax error here (").decode("=x", None).is_none());
        assert!(decoder("var nothing = 1;").decode("=x", None).is_none());
    }
}
