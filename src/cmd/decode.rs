use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use cinefetch::obfuscation::{decode_obfuscated_link, encode_for_test, CipherKeys, ScriptDecoder};
use cinefetch::{Config, Engine, QuickJsSandbox};

/// `s1,s2,s12,s22`
fn parse_keys(keys: &str) -> Result<CipherKeys> {
    let parts: Vec<&str> = keys.split(',').collect();
    let [s1, s2, s12, s22] = parts.as_slice() else {
        bail!("--keys expects four comma-separated values: s1,s2,s12,s22");
    };
    Ok(CipherKeys::new(s1, s2, s12, s22)?)
}

pub async fn cmd_decode(
    payload: &str,
    keys: Option<&str>,
    script: Option<&str>,
    provider: Option<&str>,
) -> Result<()> {
    let decoded = if let Some(provider) = provider {
        let engine = Engine::new(Config::load()?)?;
        engine
            .link_decoder(provider)?
            .decode(payload, &CancellationToken::new())
            .await?
    } else {
        let keys = keys.map(parse_keys).transpose()?;
        let fallback = script
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {path}"))
                    .map(|source| ScriptDecoder::new(Arc::new(QuickJsSandbox::new()), source))
            })
            .transpose()?;
        decode_obfuscated_link(payload, keys.as_ref(), fallback.as_ref())
    };

    match decoded {
        Some(link) => println!("{link}"),
        None => bail!("could not decode link"),
    }
    Ok(())
}

pub fn cmd_encode(text: &str, keys: &str) -> Result<()> {
    println!("{}", encode_for_test(text, &parse_keys(keys)?)?);
    Ok(())
}
