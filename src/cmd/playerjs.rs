use anyhow::{Context, Result};
use url::Url;

use cinefetch::playlist::{group_playlist, parse_playlist_string, serialize_groups};

pub fn cmd_playerjs(input: &str, base: Option<&str>, normalize: bool) -> Result<()> {
    let base = base
        .map(Url::parse)
        .transpose()
        .context("invalid --base URL")?;
    let groups = group_playlist(parse_playlist_string(input), base.as_ref());

    if normalize {
        println!("{}", serialize_groups(&groups));
        return Ok(());
    }

    for group in &groups {
        let quality = group.quality.as_deref().unwrap_or("-");
        match &group.audio_key {
            Some(audio) => println!("[{quality}] {{{audio}}}"),
            None => println!("[{quality}]"),
        }
        for url in &group.urls {
            println!("   {url}");
        }
    }
    println!("({} groups)", groups.len());
    Ok(())
}
