//! PlayerJS playlist strings.
//!
//! Several streaming front ends list their sources as a single string
//! instead of JSON:
//!
//! ```text
//! [360p]https://cdn/a.mp4 or https://mirror/a.mp4,[720p]{Dub}https://cdn/b.mp4
//! ```
//!
//! Entries are separated by `,` or `;`. An entry may open with a
//! `[quality]` and/or `{audio}` tag (any order, last one wins) and then
//! lists one or more URL candidates joined by ` or ` / ` and `.
//!
//! The `or`/`and` joiners are recognized by their terminal character (`r`,
//! `d`) with the rest of the keyword and a blank in front of it and a
//! blank after it. A URL that itself contains a blank-delimited ` or ` /
//! ` and ` is therefore split there; that is accepted as a known false
//! positive.

use std::collections::HashMap;

use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::tree::{FileId, Quality, SubtitleTrack, Video};

/// One `(quality, audio, url)` triple as it appears in the string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistEntry<'a> {
    pub quality: Option<&'a str>,
    pub audio_key: Option<&'a str>,
    pub url: &'a str,
}

/// Left-to-right scanner over a PlayerJS string.
///
/// Borrowing the input and holding no other state, the scan is a pure
/// function of the string: a fresh call yields the same sequence.
#[derive(Debug, Clone)]
pub struct PlayerJsEntries<'a> {
    input: &'a str,
    pos: usize,
    quality: Option<&'a str>,
    audio_key: Option<&'a str>,
}

/// Scan a PlayerJS playlist string.
#[must_use]
pub fn parse_playlist_string(input: &str) -> PlayerJsEntries<'_> {
    PlayerJsEntries {
        input,
        pos: 0,
        quality: None,
        audio_key: None,
    }
}

fn non_empty(tag: &str) -> Option<&str> {
    let tag = tag.trim();
    (!tag.is_empty()).then_some(tag)
}

impl<'a> PlayerJsEntries<'a> {
    /// Read a `[..]` / `{..}` tag starting at `self.pos`.
    fn read_tag(&mut self, close: u8) -> Option<&'a str> {
        let bytes = self.input.as_bytes();
        let open = self.pos;
        match bytes[open + 1..].iter().position(|&b| b == close) {
            Some(offset) => {
                let end = open + 1 + offset;
                self.pos = end + 1;
                Some(&self.input[open + 1..end])
            }
            None => {
                // unterminated tag swallows the rest
                self.pos = bytes.len();
                None
            }
        }
    }

    /// Whether `bytes[i]` ends a blank-delimited `keyword`.
    fn is_joiner(bytes: &[u8], start: usize, i: usize, keyword: &[u8]) -> bool {
        let len = keyword.len();
        if i + 1 < start + len + 1 {
            return false;
        }
        let kw_start = i + 1 - len;
        if &bytes[kw_start..=i] != keyword {
            return false;
        }
        let blank_before = bytes[kw_start - 1].is_ascii_whitespace();
        let blank_after = bytes.get(i + 1).is_none_or(u8::is_ascii_whitespace);
        blank_before && blank_after
    }
}

impl<'a> Iterator for PlayerJsEntries<'a> {
    type Item = PlaylistEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.input.as_bytes();
        loop {
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= bytes.len() {
                return None;
            }

            match bytes[self.pos] {
                b',' | b';' => {
                    self.quality = None;
                    self.audio_key = None;
                    self.pos += 1;
                }
                b'[' => {
                    if let Some(tag) = self.read_tag(b']') {
                        self.quality = non_empty(tag);
                    }
                }
                b'{' => {
                    if let Some(tag) = self.read_tag(b'}') {
                        self.audio_key = non_empty(tag);
                    }
                }
                _ => {
                    let start = self.pos;
                    let mut end = bytes.len();
                    let mut resume = bytes.len();
                    let mut i = start;
                    while i < bytes.len() {
                        match bytes[i] {
                            b',' | b';' => {
                                end = i;
                                resume = i;
                                break;
                            }
                            b'r' if Self::is_joiner(bytes, start, i, b"or") => {
                                end = i - 1;
                                resume = i + 1;
                                break;
                            }
                            b'd' if Self::is_joiner(bytes, start, i, b"and") => {
                                end = i - 2;
                                resume = i + 1;
                                break;
                            }
                            _ => i += 1,
                        }
                    }
                    self.pos = resume;

                    let url = self.input[start..end].trim();
                    if !url.is_empty() {
                        return Some(PlaylistEntry {
                            quality: self.quality,
                            audio_key: self.audio_key,
                            url,
                        });
                    }
                }
            }
        }
    }
}

/// URLs sharing one `(quality, audio)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistGroup {
    pub quality: Option<String>,
    pub audio_key: Option<String>,
    /// Interchangeable variants, HLS manifests last.
    pub urls: Vec<Url>,
}

impl PlaylistGroup {
    /// Convert into a playable [`Video`].
    pub fn into_video(self, file: Option<&FileId>) -> Result<Video> {
        let quality = self
            .quality
            .as_deref()
            .map(Quality::parse)
            .unwrap_or_default();
        let video = Video::new(self.urls, quality)?;
        Ok(match file {
            Some(id) => video.with_file(id.clone()),
            None => video,
        })
    }
}

/// Resolve a raw URL candidate, against `base` when given.
pub(crate) fn resolve_url(raw: &str, base: Option<&Url>) -> Option<Url> {
    let resolved = match base {
        Some(base) => base.join(raw),
        None if raw.starts_with("//") => Url::parse(&format!("https:{raw}")),
        None => Url::parse(raw),
    };
    match resolved {
        Ok(url) => Some(url),
        Err(e) => {
            debug!(raw, error = %e, "dropping unresolvable playlist URL");
            None
        }
    }
}

fn is_hls(url: &Url) -> bool {
    url.as_str().contains(".m3u8")
}

/// Group scanned entries by `(quality, audio)` in first-appearance order.
///
/// Within a group URLs are de-duplicated and `.m3u8` variants are moved
/// behind explicit-format ones: several providers serve HLS from
/// rate-limited mirrors, so it is the fallback, not the first try.
pub fn group_playlist<'a>(
    entries: impl IntoIterator<Item = PlaylistEntry<'a>>,
    base: Option<&Url>,
) -> Vec<PlaylistGroup> {
    let mut groups: Vec<PlaylistGroup> = Vec::new();
    let mut index: HashMap<(Option<&'a str>, Option<&'a str>), usize> = HashMap::new();

    for entry in entries {
        let Some(url) = resolve_url(entry.url, base) else {
            continue;
        };
        let slot = *index
            .entry((entry.quality, entry.audio_key))
            .or_insert_with(|| {
                groups.push(PlaylistGroup {
                    quality: entry.quality.map(str::to_string),
                    audio_key: entry.audio_key.map(str::to_string),
                    urls: Vec::new(),
                });
                groups.len() - 1
            });
        let urls = &mut groups[slot].urls;
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    for group in &mut groups {
        group.urls.sort_by_key(is_hls);
    }
    groups
}

/// Scan, group and convert a PlayerJS string into videos.
pub fn playlist_videos(input: &str, base: Option<&Url>, file: Option<&FileId>) -> Vec<Video> {
    group_playlist(parse_playlist_string(input), base)
        .into_iter()
        .filter_map(|group| group.into_video(file).ok())
        .collect()
}

/// Write groups back in the comma-only form.
#[must_use]
pub fn serialize_groups(groups: &[PlaylistGroup]) -> String {
    let mut out = Vec::new();
    for group in groups {
        let mut prefix = String::new();
        if let Some(q) = &group.quality {
            prefix.push_str(&format!("[{q}]"));
        }
        if let Some(a) = &group.audio_key {
            prefix.push_str(&format!("{{{a}}}"));
        }
        for url in &group.urls {
            out.push(format!("{prefix}{url}"));
        }
    }
    out.join(",")
}

/// Parse the PlayerJS `subtitle` field (`[English]https://…/en.vtt,[…]…`).
#[must_use]
pub fn parse_subtitles(input: &str, base: Option<&Url>) -> Vec<SubtitleTrack> {
    parse_playlist_string(input)
        .filter_map(|entry| {
            let link = resolve_url(entry.url, base)?;
            let title = entry.quality.unwrap_or_default().to_string();
            Some(SubtitleTrack {
                language: entry.quality.map(str::to_string),
                title,
                link,
            })
        })
        .collect()
}
