use anyhow::Result;
use tokio_util::sync::CancellationToken;

use cinefetch::playlist::{is_master_playlist, parse_m3u8_text};
use cinefetch::{Config, Engine, Request};

pub async fn cmd_m3u8(url: &str) -> Result<()> {
    let engine = Engine::new(Config::load()?)?;
    let cancel = CancellationToken::new();

    let response = engine
        .executor()
        .send(Request::get(url)?, &cancel)
        .await?
        .error_for_status()?;
    let text = response.text();

    if !is_master_playlist(&text) {
        println!("📄 Media playlist (no variants): {}", response.url);
        return Ok(());
    }

    let videos = parse_m3u8_text(&text, &response.url, None);
    println!("📺 {} variants", videos.len());
    for video in &videos {
        println!("   [{}] {}", video.quality(), video.uri());
    }
    Ok(())
}
