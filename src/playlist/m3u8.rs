//! HLS master playlist variant extraction.
//!
//! Only the variant list is read: every `#EXT-X-STREAM-INF` tag and the
//! URI line that follows it. Media playlists (segments) are left to the
//! player.

use url::Url;

use crate::tree::{FileId, Quality, Video};

use super::playerjs::resolve_url;

const STREAM_INF: &str = "#EXT-X-STREAM-INF";

/// Quality label for one `#EXT-X-STREAM-INF` line.
///
/// `RESOLUTION=1280x720` gives `"720"` (the text after `x` up to the next
/// `,`). Without a resolution the `NAME` attribute, then `BANDWIDTH`, is
/// used.
fn variant_quality(tag: &str) -> Quality {
    if let Some(at) = tag.find("RESOLUTION=") {
        let value = &tag[at + "RESOLUTION=".len()..];
        if let Some(x) = value.find('x') {
            let height = &value[x + 1..];
            let height = height.split(',').next().unwrap_or(height).trim();
            if !height.is_empty() {
                return Quality::parse(height);
            }
        }
    }
    if let Some(name) = attribute(tag, "NAME") {
        return Quality::parse(name);
    }
    attribute(tag, "BANDWIDTH")
        .map(Quality::parse)
        .unwrap_or_default()
}

/// Value of `KEY=value` or `KEY="value"` inside an attribute list.
fn attribute<'a>(tag: &'a str, key: &str) -> Option<&'a str> {
    let attrs = tag.split_once(':')?.1;
    let mut rest = attrs;
    while !rest.is_empty() {
        let (name, after) = rest.split_once('=')?;
        let (value, next) = if let Some(quoted) = after.strip_prefix('"') {
            let close = quoted.find('"')?;
            let tail = quoted[close + 1..].trim_start_matches(',');
            (&quoted[..close], tail)
        } else {
            match after.split_once(',') {
                Some((v, tail)) => (v, tail),
                None => (after, ""),
            }
        };
        if name.trim() == key {
            return Some(value);
        }
        rest = next;
    }
    None
}

/// Extract variants from manifest lines.
///
/// Relative variant URIs resolve against `main_link`'s directory. A
/// trailing tag with no URI after it is ignored.
pub fn parse_m3u8<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    main_link: &Url,
    file: Option<&FileId>,
) -> Vec<Video> {
    let lines: Vec<&str> = lines.into_iter().map(str::trim).collect();
    let mut videos = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if !line.starts_with(STREAM_INF) {
            continue;
        }

        while i < lines.len() && lines[i].is_empty() {
            i += 1;
        }
        let Some(&uri) = lines.get(i) else {
            break;
        };
        if uri.starts_with('#') {
            // tag without a URI; let the outer loop look at this line
            continue;
        }
        i += 1;

        let Some(url) = resolve_url(uri, Some(main_link)) else {
            continue;
        };
        if let Ok(video) = Video::new(vec![url], variant_quality(line)) {
            videos.push(match file {
                Some(id) => video.with_file(id.clone()),
                None => video,
            });
        }
    }

    videos
}

/// [`parse_m3u8`] over a whole manifest body.
pub fn parse_m3u8_text(text: &str, main_link: &Url, file: Option<&FileId>) -> Vec<Video> {
    parse_m3u8(text.lines(), main_link, file)
}

/// `true` for a master playlist (one that lists variants).
#[must_use]
pub fn is_master_playlist(text: &str) -> bool {
    text.lines().any(|l| l.trim_start().starts_with(STREAM_INF))
}
