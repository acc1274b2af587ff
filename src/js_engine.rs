//! Sandboxed JavaScript evaluation (rquickjs)
//!
//! Some providers only reveal a stream link through a small decoder
//! function shipped in their player script. [`ScriptEngine`] runs such a
//! snippet and hands back its completion value; [`QuickJsSandbox`] is the
//! `QuickJS` implementation (ES2020, ~1MB).

use std::time::{Duration, Instant};

use rquickjs::{CatchResultExt, Context, Function, Runtime, Type, Value};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Browser globals provider scripts expect: `window`/`self` and Latin-1
/// `atob`/`btoa`.
const PRELUDE: &str = r"
var window = globalThis;
var self = globalThis;
(function () {
    var chars = 'ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/';
    globalThis.atob = function (input) {
        var str = String(input).replace(/[\t\n\f\r =]/g, '');
        if (str.length % 4 === 1) throw new Error('atob: invalid length');
        var out = '', buffer = 0, bits = 0;
        for (var i = 0; i < str.length; i++) {
            var idx = chars.indexOf(str.charAt(i));
            if (idx < 0) throw new Error('atob: invalid character');
            buffer = ((buffer << 6) | idx) & 0xFFFFFF;
            bits += 6;
            if (bits >= 8) {
                bits -= 8;
                out += String.fromCharCode((buffer >> bits) & 0xFF);
            }
        }
        return out;
    };
    globalThis.btoa = function (input) {
        var str = String(input), out = '';
        for (var i = 0; i < str.length; i += 3) {
            var a = str.charCodeAt(i), b = str.charCodeAt(i + 1), c = str.charCodeAt(i + 2);
            if (a > 255 || b > 255 || c > 255) throw new Error('btoa: non-Latin-1 character');
            var n = (a << 16) | ((b || 0) << 8) | (c || 0);
            out += chars.charAt((n >> 18) & 63) + chars.charAt((n >> 12) & 63) +
                (i + 1 < str.length ? chars.charAt((n >> 6) & 63) : '=') +
                (i + 2 < str.length ? chars.charAt(n & 63) : '=');
        }
        return out;
    };
})();
";

/// Evaluates untrusted script snippets.
pub trait ScriptEngine: Send + Sync {
    /// Run `source` with the given string globals defined and return its
    /// completion value as a string. `undefined`/`null` is an error.
    fn evaluate(&self, source: &str, globals: &[(&str, &str)]) -> Result<String>;
}

/// `QuickJS` sandbox. Every evaluation gets a fresh runtime, so nothing a
/// script defines survives into the next one.
#[derive(Debug, Clone)]
pub struct QuickJsSandbox {
    memory_limit: usize,
    max_stack_size: usize,
    timeout: Duration,
}

impl Default for QuickJsSandbox {
    fn default() -> Self {
        Self {
            // 32MB is plenty for decoder snippets
            memory_limit: 32 * 1024 * 1024,
            max_stack_size: 1024 * 1024,
            timeout: Duration::from_secs(2),
        }
    }
}

impl QuickJsSandbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Wall-clock budget after which the script is interrupted.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn script_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Script(e.to_string())
}

impl ScriptEngine for QuickJsSandbox {
    fn evaluate(&self, source: &str, globals: &[(&str, &str)]) -> Result<String> {
        debug!(chars = source.len(), globals = globals.len(), "evaluating script");

        let runtime = Runtime::new().map_err(script_error)?;
        runtime.set_memory_limit(self.memory_limit);
        runtime.set_max_stack_size(self.max_stack_size);
        let deadline = Instant::now() + self.timeout;
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() > deadline)));
        let context = Context::full(&runtime).map_err(script_error)?;

        context.with(|ctx| {
            ctx.eval::<(), _>(PRELUDE)
                .catch(&ctx)
                .map_err(script_error)?;
            let scope = ctx.globals();
            for (name, value) in globals {
                scope.set(*name, *value).map_err(script_error)?;
            }

            let result: Value = ctx.eval(source).catch(&ctx).map_err(script_error)?;
            let text = match result.type_of() {
                Type::Undefined | Type::Null => {
                    return Err(EngineError::Script("script produced no value".into()))
                }
                Type::Bool => result.get::<bool>().map_err(script_error)?.to_string(),
                Type::Int => result.get::<i32>().map_err(script_error)?.to_string(),
                Type::Float => result.get::<f64>().map_err(script_error)?.to_string(),
                Type::String => result.get::<String>().map_err(script_error)?,
                Type::Object | Type::Array => {
                    let json: rquickjs::Object = scope.get("JSON").map_err(script_error)?;
                    let stringify: Function = json.get("stringify").map_err(script_error)?;
                    stringify.call((result,)).map_err(script_error)?
                }
                other => return Err(EngineError::Script(format!("unsupported result type {other:?}"))),
            };
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Result<String> {
        QuickJsSandbox::new().evaluate(source, &[])
    }

    #[test]
    fn test_basic_eval() {
        assert_eq!(eval("1 + 2").unwrap(), "3");
        assert_eq!(eval("'hello' + ' ' + 'world'").unwrap(), "hello world");
        assert_eq!(eval("((x) => x * 2)(5)").unwrap(), "10");
    }

    #[test]
    fn test_globals_are_strings() {
        let out = QuickJsSandbox::new()
            .evaluate("s1 + '|' + s2", &[("s1", "abc"), ("s2", "xyz")])
            .unwrap();
        assert_eq!(out, "abc|xyz");
    }

    #[test]
    fn test_window_aliases_global() {
        assert_eq!(eval("window === globalThis && self === window").unwrap(), "true");
        assert_eq!(eval("window.btoa === btoa").unwrap(), "true");
    }

    #[test]
    fn test_base64_polyfills() {
        assert_eq!(eval("btoa('Hello')").unwrap(), "SGVsbG8=");
        assert_eq!(eval("btoa('Hi')").unwrap(), "SGk=");
        assert_eq!(eval("atob('SGVsbG8=')").unwrap(), "Hello");
        // Latin-1 survives the round trip
        assert_eq!(eval(r"atob(btoa('ÿé'))").unwrap(), "\u{ff}\u{e9}");
        assert!(eval("btoa('\\u0416')").is_err());
        assert!(eval("atob('***')").is_err());
    }

    #[test]
    fn test_objects_are_stringified() {
        let out = eval("({ name: 'test', value: 42 })").unwrap();
        assert_eq!(out, r#"{"name":"test","value":42}"#);
    }

    #[test]
    fn test_no_value_is_error() {
        assert!(matches!(eval("undefined"), Err(EngineError::Script(_))));
        assert!(eval("null").is_err());
    }

    #[test]
    fn test_exceptions_carry_message() {
        let err = eval("throw new Error('bad key')").unwrap_err();
        assert!(err.to_string().contains("bad key"), "{err}");
    }

    #[test]
    fn test_runaway_script_is_interrupted() {
        let sandbox = QuickJsSandbox::new().with_timeout(Duration::from_millis(50));
        assert!(sandbox.evaluate("while (true) {}", &[]).is_err());
    }

    #[test]
    fn test_state_does_not_leak_between_runs() {
        let sandbox = QuickJsSandbox::new();
        sandbox.evaluate("var leaked = 'x'; leaked", &[]).unwrap();
        assert_eq!(sandbox.evaluate("typeof leaked", &[]).unwrap(), "undefined");
    }
}
