//! Links that are already playable: media URLs, PlayerJS playlist strings
//! and PlayerJS JSON playlists.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{EngineError, Result};
use crate::executor::RequestExecutor;
use crate::playlist::folder::is_json_playlist;
use crate::playlist::{is_master_playlist, parse_m3u8_text, parse_playerjs_json, playlist_videos};
use crate::rate_limit::RateLimiter;
use crate::transport::Request;
use crate::tree::{File, FileContext, Folder, FolderType, MediaSet, Quality, TreeNode, Video};

use super::{Provider, ProviderContext};

const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".webm", ".m4v", ".mov", ".ts", ".m3u8"];

/// Handles input that needs no site scraping.
pub struct DirectLinkProvider;

fn media_url(input: &str) -> Option<Url> {
    let url = Url::parse(input.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let path = url.path().to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
        .then_some(url)
}

fn is_hls(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".m3u8")
}

/// `[720p]…`, `{Dub}…` or several links joined with `,` / ` or `.
fn is_playlist_string(input: &str) -> bool {
    let input = input.trim();
    input.starts_with('[')
        || input.starts_with('{')
        || (input.contains("://") && (input.contains(',') || input.contains(" or ")))
}

fn title_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map_or_else(|| url.host_str().unwrap_or("video").to_string(), str::to_string)
}

/// Fetch an HLS manifest and list its variants. A media playlist is a
/// single "Auto" stream.
async fn hls_media(
    executor: Arc<RequestExecutor>,
    rate_limiter: Option<RateLimiter>,
    file: FileContext,
) -> Result<MediaSet> {
    let link = file
        .link
        .ok_or_else(|| EngineError::InvalidTree(format!("file {} has no link", file.id)))?;
    let mut request = Request::new(http::Method::GET, link.clone());
    if let Some(limiter) = rate_limiter {
        request = request.with_rate_limiter(limiter);
    }
    let response = executor.send(request, &file.cancel).await?.error_for_status()?;
    let text = response.text();

    let videos = if is_master_playlist(&text) {
        parse_m3u8_text(&text, &response.url, Some(&file.id))
    } else {
        vec![Video::new(vec![link], Quality::parse("Auto"))?.with_file(file.id.clone())]
    };
    debug!(file = %file.id, variants = videos.len(), "hls manifest resolved");
    Ok(MediaSet::new(videos))
}

impl DirectLinkProvider {
    fn json_item(input: &str) -> Result<Option<TreeNode>> {
        let children = parse_playerjs_json(input, None, "direct")?;
        if children.is_empty() {
            return Ok(None);
        }
        let folder = Folder::new("direct", "Playlist", FolderType::Item, children);
        Ok(Some(folder.into()))
    }

    fn playlist_item(input: &str) -> Result<Option<TreeNode>> {
        let videos = playlist_videos(input, None, None);
        if videos.is_empty() {
            return Ok(None);
        }
        let title = title_of(videos[0].uri());
        let file = File::builder("direct", title).videos(videos).build()?;
        Ok(Some(file.into()))
    }

    fn hls_item(url: Url, cx: &ProviderContext) -> Result<Option<TreeNode>> {
        // The registry owns this closure; it must not hold the registry.
        let executor = cx.executor.clone();
        let rate_limiter = cx.rate_limiter.clone();
        let handle = cx.registry.register_fn(move |file| {
            hls_media(executor.clone(), rate_limiter.clone(), file)
        });
        let file = File::builder(url.as_str(), title_of(&url))
            .link(url)
            .factory(handle)
            .build()?;
        Ok(Some(file.into()))
    }

    fn file_item(url: Url) -> Result<Option<TreeNode>> {
        let video = Video::new(vec![url.clone()], Quality::default())?;
        let file = File::builder(url.as_str(), title_of(&url))
            .link(url)
            .videos(vec![video])
            .build()?;
        Ok(Some(file.into()))
    }
}

#[async_trait]
impl Provider for DirectLinkProvider {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn matches(&self, input: &str) -> bool {
        is_json_playlist(input) || is_playlist_string(input) || media_url(input).is_some()
    }

    async fn load_item(
        &self,
        input: &str,
        cx: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Result<Option<TreeNode>> {
        if cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        if is_json_playlist(input) {
            return Self::json_item(input);
        }
        if let Some(url) = media_url(input) {
            return if is_hls(&url) {
                Self::hls_item(url, cx)
            } else {
                Self::file_item(url)
            };
        }
        Self::playlist_item(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Response, Transport};
    use crate::tree::{FactoryRegistry, FileState, Resolver};
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
        360/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720\n\
        720/index.m3u8\n";

    struct Cdn {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Cdn {
        async fn execute(&self, request: &Request) -> Result<Response> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let body = if request.url.path().ends_with("master.m3u8") {
                MASTER
            } else {
                "#EXTM3U\n#EXTINF:4.0,\nseg0.ts\n"
            };
            Ok(Response {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                url: request.url.clone(),
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    fn context() -> (ProviderContext, Arc<Cdn>) {
        let cdn = Arc::new(Cdn {
            fetches: AtomicUsize::new(0),
        });
        let cx = ProviderContext {
            executor: Arc::new(RequestExecutor::new(cdn.clone())),
            registry: FactoryRegistry::new(),
            rate_limiter: None,
        };
        (cx, cdn)
    }

    async fn load(input: &str, cx: &ProviderContext) -> TreeNode {
        DirectLinkProvider
            .load_item(input, cx, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn matching() {
        let p = DirectLinkProvider;
        assert!(p.matches("https://cdn.test/a/movie.MP4"));
        assert!(p.matches("https://cdn.test/hls/master.m3u8?token=1"));
        assert!(p.matches("[720p]https://cdn.test/a.mp4,[1080p]https://cdn.test/b.mp4"));
        assert!(p.matches(r#"[{"title":"Episode 1","file":"https://cdn.test/1.mp4"}]"#));
        assert!(!p.matches("https://site.test/film/123-title"));
        assert!(!p.matches("ftp://cdn.test/movie.mp4"));
    }

    #[tokio::test]
    async fn plain_media_link_is_an_eager_file() {
        let (cx, cdn) = context();
        let node = load("https://cdn.test/a/movie.mp4", &cx).await;
        let file = node.as_file().unwrap();
        assert_eq!(file.title(), "movie.mp4");
        assert_eq!(file.state(), FileState::Resolved);
        assert_eq!(cdn.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn playlist_string_groups_qualities() {
        let (cx, _) = context();
        let node = load(
            "[720p]https://a.test/x.mp4 or https://b.test/x.mp4,[1080p]https://a.test/y.mp4",
            &cx,
        )
        .await;
        let media = node.as_file().unwrap().media().unwrap();
        assert_eq!(media.videos.len(), 2);
        assert_eq!(media.videos[0].variants().len(), 2);
        assert_eq!(media.best().unwrap().quality().height(), Some(1080));
    }

    #[tokio::test]
    async fn json_playlist_becomes_a_folder() {
        let (cx, _) = context();
        let node = load(
            r#"[{"title":"Episode 1","file":"https://cdn.test/1.mp4"},
                {"title":"Episode 2","file":"https://cdn.test/2.mp4"}]"#,
            &cx,
        )
        .await;
        let folder = node.as_folder().unwrap();
        assert_eq!(folder.folder_type(), FolderType::Item);
        assert_eq!(folder.children().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn master_playlist_resolves_lazily() {
        let (cx, cdn) = context();
        let node = load("https://cdn.test/hls/master.m3u8", &cx).await;
        let file = node.as_file().unwrap();
        assert_eq!(file.state(), FileState::Unresolved);
        assert_eq!(cdn.fetches.load(Ordering::SeqCst), 0);

        let resolver = Resolver::new(cx.registry.clone());
        let cancel = CancellationToken::new();
        let videos = resolver.resolve_videos(file, &cancel).await.unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[1].uri().as_str(), "https://cdn.test/hls/720/index.m3u8");
        assert_eq!(videos[1].file_id(), Some(file.id()));

        resolver.resolve_videos(file, &cancel).await.unwrap();
        assert_eq!(cdn.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn media_playlist_is_a_single_auto_stream() {
        let (cx, _) = context();
        let node = load("https://cdn.test/hls/index.m3u8", &cx).await;
        let resolver = Resolver::new(cx.registry.clone());
        let videos = resolver
            .resolve_videos(node.as_file().unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].quality().label(), "Auto");
    }
}
