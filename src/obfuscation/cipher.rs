//! Substitution cipher used by obfuscated player links.
//!
//! Payload layout, outermost first:
//!
//! ```text
//! "=" + swap(s1,s2)( base64( percent( swap(s12,s22)( base64( percent( "!xy!xy…" ))))))
//! ```
//!
//! Decoding peels the layers in the opposite order. `swap(a,b)` exchanges
//! the characters `a[i]` and `b[i]` throughout the text, one index after
//! the other.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{EngineError, Result};

use super::keys::{CipherKeys, KeyPair};

/// Private-use placeholder for the three-step swap. Never appears in a
/// Base64 payload.
const SENTINEL: char = '\u{E000}';

fn decode_error(stage: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Decode(format!("{stage}: {e}"))
}

/// Exchange `a[i]` and `b[i]` for every index, in key order.
fn swap_all(text: &str, pair: &KeyPair) -> String {
    let mut out = text.to_string();
    for (a, b) in pair.chars() {
        out = swap_one(&out, a, b);
    }
    out
}

/// Apply the swaps in reverse key order (the inverse of [`swap_all`]).
fn unswap_all(text: &str, pair: &KeyPair) -> String {
    let mut out = text.to_string();
    for (a, b) in pair.chars().into_iter().rev() {
        out = swap_one(&out, a, b);
    }
    out
}

/// `a → sentinel`, `b → a`, `sentinel → b`.
fn swap_one(text: &str, a: char, b: char) -> String {
    text.replace(a, &SENTINEL.to_string())
        .replace(b, &a.to_string())
        .replace(SENTINEL, &b.to_string())
}

fn pad_base64(text: &str) -> String {
    let mut padded = text.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

/// One swap → Base64 → UTF-8 → percent-decode layer.
fn decode_layer(text: &str, pair: &KeyPair) -> Result<String> {
    let swapped = swap_all(text, pair);
    let bytes = STANDARD
        .decode(pad_base64(&swapped))
        .map_err(|e| decode_error("base64", e))?;
    let utf8 = String::from_utf8(bytes).map_err(|e| decode_error("utf-8", e))?;
    let plain = urlencoding::decode(&utf8).map_err(|e| decode_error("percent", e))?;
    Ok(plain.into_owned())
}

fn encode_layer(text: &str, pair: &KeyPair) -> String {
    let encoded = STANDARD.encode(urlencoding::encode(text).as_bytes());
    unswap_all(encoded.trim_end_matches('='), pair)
}

/// Decode a leading `"!xy!xy…"` run, two base-36 digits per character.
///
/// Text not starting with `!` is returned as is. The run ends at the
/// first position without a `!`.
pub fn decode_base36_pairs(text: &str) -> Result<String> {
    if !text.starts_with('!') {
        return Ok(text.to_string());
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() && chars[i] == '!' {
        let (Some(hi), Some(lo)) = (chars.get(i + 1), chars.get(i + 2)) else {
            return Err(EngineError::Decode(format!("truncated pair at {i}")));
        };
        let digit = |c: &char| {
            c.to_digit(36)
                .ok_or_else(|| EngineError::Decode(format!("'{c}' is not a base-36 digit")))
        };
        let code = 36 * digit(hi)? + digit(lo)?;
        let ch = char::from_u32(code)
            .ok_or_else(|| EngineError::Decode(format!("invalid code point {code}")))?;
        out.push(ch);
        i += 3;
    }
    Ok(out)
}

fn encode_base36_pairs(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() * 3);
    for ch in text.chars() {
        let code = u32::from(ch);
        if code >= 36 * 36 {
            return None;
        }
        out.push('!');
        out.push(char::from_digit(code / 36, 36)?);
        out.push(char::from_digit(code % 36, 36)?);
    }
    Some(out)
}

/// Decode an obfuscated payload (without its leading `=`).
pub fn decode(payload: &str, keys: &CipherKeys) -> Result<String> {
    let first = decode_layer(payload, keys.first())?;
    let second = decode_layer(&first, keys.second())?;
    decode_base36_pairs(&second)
}

/// Build an obfuscated payload (with its leading `=`) that [`decode`]
/// turns back into `original`. Used for fixtures.
///
/// Text made only of code points below 1296 goes through the `!xy` stage;
/// anything else is embedded verbatim and must not start with `!`.
pub fn encode_for_test(original: &str, keys: &CipherKeys) -> Result<String> {
    let inner = match encode_base36_pairs(original) {
        Some(pairs) => pairs,
        None if original.starts_with('!') => {
            return Err(EngineError::Decode(
                "text starting with '!' needs the base-36 stage".into(),
            ))
        }
        None => original.to_string(),
    };
    let second = encode_layer(&inner, keys.second());
    let first = encode_layer(&second, keys.first());
    Ok(format!("={first}"))
}
