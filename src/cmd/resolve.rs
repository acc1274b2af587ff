use anyhow::Result;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use cinefetch::{Config, Engine, TreeNode};

pub async fn cmd_resolve(url: &str, depth: usize, resolve: bool) -> Result<()> {
    let engine = Engine::new(Config::load()?)?;
    let cancel = CancellationToken::new();

    println!("🔎 Loading: {url}");
    let Some(root) = engine.load(url, &cancel).await? else {
        println!("❌ Nothing playable found");
        return Ok(());
    };

    print_node(&engine, &root, 0, depth, resolve, &cancel).await?;
    Ok(())
}

fn print_node<'a>(
    engine: &'a Engine,
    node: &'a TreeNode,
    indent: usize,
    depth: usize,
    resolve: bool,
    cancel: &'a CancellationToken,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let pad = "   ".repeat(indent);
        match node {
            TreeNode::Folder(folder) => {
                println!("{pad}📁 {} ({:?})", folder.title(), folder.folder_type());
                if indent >= depth {
                    return Ok(());
                }
                let children = engine.resolver().enumerate_children(folder, cancel).await?;
                for child in &children {
                    print_node(engine, child, indent + 1, depth, resolve, cancel).await?;
                }
            }
            TreeNode::File(file) => {
                println!("{pad}🎬 {}", file.title());
                if !resolve {
                    return Ok(());
                }
                let media = engine.resolver().resolve(file, cancel).await?;
                if media.is_empty() {
                    println!("{pad}   (no videos)");
                }
                for video in media.videos.iter() {
                    println!("{pad}   [{}] {}", video.quality(), video.uri());
                    for fallback in &video.variants()[1..] {
                        println!("{pad}      or {fallback}");
                    }
                }
                for track in &media.audio_tracks {
                    println!("{pad}   🔊 {}", track.title);
                }
                for subtitle in &media.subtitles {
                    println!("{pad}   💬 {} {}", subtitle.title, subtitle.link);
                }
            }
        }
        Ok(())
    })
}
