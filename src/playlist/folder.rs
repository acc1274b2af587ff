//! PlayerJS JSON playlists.
//!
//! Series pages hand PlayerJS a JSON tree instead of a flat string:
//!
//! ```json
//! [{"title": "Сезон 1", "folder": [
//!     {"title": "1 серия", "id": "s1e1", "file": "[720p]https://…", "subtitle": "[English]https://…"}
//! ]}]
//! ```
//!
//! Every leaf's `file` field is itself a PlayerJS string (or, on some
//! players, another JSON playlist serialized into the string). Leaves turn
//! into eager [`File`]s, branches into [`Folder`]s.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Result;
use crate::tree::{AudioTrack, EpisodeRange, File, FileId, Folder, FolderType, MediaSet, TreeNode};

use super::playerjs::{group_playlist, parse_playlist_string, parse_subtitles};

static SEASON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:сезон|season)\s*(\d+)|(\d+)\s*(?:-?й\s*)?(?:сезон|season)")
        .expect("valid season regex")
});

static EPISODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+)(?:\s*-\s*(\d+))?\s*(?:серия|серии|эпизод|episode)|(?:серия|эпизод|episode)\s*(\d+)(?:\s*-\s*(\d+))?",
    )
    .expect("valid episode regex")
});

/// One node of a PlayerJS JSON playlist. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerJsItem {
    pub title: Option<String>,
    pub id: Option<serde_json::Value>,
    pub file: Option<String>,
    pub folder: Option<Vec<PlayerJsItem>>,
    pub subtitle: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlaylistDocument {
    Many(Vec<PlayerJsItem>),
    One(PlayerJsItem),
}

/// Season number from a title such as `"Сезон 2"` or `"Season 2"`.
#[must_use]
pub fn season_number(title: &str) -> Option<u32> {
    let caps = SEASON_RE.captures(title)?;
    caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()
}

/// Episode numbers from a title such as `"2 серия"`, `"1-2 серии"` or
/// `"Episode 5"`.
#[must_use]
pub fn episode_range(title: &str) -> Option<EpisodeRange> {
    let caps = EPISODE_RE.captures(title)?;
    let first: u32 = caps.get(1).or_else(|| caps.get(3))?.as_str().parse().ok()?;
    let last = caps
        .get(2)
        .or_else(|| caps.get(4))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|&last| last >= first)
        .unwrap_or(first);
    Some(EpisodeRange { first, last })
}

/// Returns `true` for a `file` value that holds a nested JSON playlist.
#[must_use]
pub fn is_json_playlist(text: &str) -> bool {
    text.trim_start().starts_with("[{")
}

/// Decode a PlayerJS JSON playlist into tree nodes.
///
/// `root_id` prefixes generated ids of items that carry none. Relative
/// links resolve against `base`. Leaves without any playable link are
/// dropped.
pub fn parse_playerjs_json(json: &str, base: Option<&Url>, root_id: &str) -> Result<Vec<TreeNode>> {
    let items = match serde_json::from_str::<PlaylistDocument>(json)? {
        PlaylistDocument::Many(items) => items,
        PlaylistDocument::One(item) => vec![item],
    };
    let builder = TreeBuilder { base };
    Ok(builder.nodes(items, root_id, 0, None))
}

struct TreeBuilder<'a> {
    base: Option<&'a Url>,
}

impl TreeBuilder<'_> {
    fn nodes(
        &self,
        items: Vec<PlayerJsItem>,
        parent: &str,
        depth: usize,
        season: Option<u32>,
    ) -> Vec<TreeNode> {
        items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| self.node(item, parent, index, depth, season))
            .collect()
    }

    fn node(
        &self,
        item: PlayerJsItem,
        parent: &str,
        index: usize,
        depth: usize,
        season: Option<u32>,
    ) -> Option<TreeNode> {
        let id = item_id(&item, parent, index);
        let title = item
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(|| format!("#{}", index + 1), str::to_string);

        if let Some(children) = item.folder {
            return Some(self.folder(id, title, children, depth, season));
        }

        let file = item.file.as_deref().unwrap_or_default();
        if is_json_playlist(file) {
            let children = match serde_json::from_str::<Vec<PlayerJsItem>>(file) {
                Ok(children) => children,
                Err(e) => {
                    debug!(id = %id, error = %e, "nested playlist is not valid JSON");
                    return None;
                }
            };
            return Some(self.folder(id, title, children, depth, season));
        }

        self.file(id, title, file, item.subtitle.as_deref(), season)
            .map(TreeNode::from)
    }

    fn folder(
        &self,
        id: String,
        title: String,
        children: Vec<PlayerJsItem>,
        depth: usize,
        season: Option<u32>,
    ) -> TreeNode {
        let own_season = season_number(&title);
        let folder_type = if own_season.is_some() || depth == 0 {
            FolderType::Season
        } else {
            FolderType::Translate
        };
        let season = own_season.or(season);
        let children = self.nodes(children, &id, depth + 1, season);

        let mut folder = Folder::new(id, title, folder_type, children);
        if let Some(season) = season {
            folder = folder.with_season(season);
        }
        folder.into()
    }

    fn file(
        &self,
        id: String,
        title: String,
        playlist: &str,
        subtitle: Option<&str>,
        season: Option<u32>,
    ) -> Option<File> {
        let file_id = FileId::from(id);
        let groups = group_playlist(parse_playlist_string(playlist), self.base);

        let mut audio_keys: Vec<&str> = Vec::new();
        for key in groups.iter().filter_map(|g| g.audio_key.as_deref()) {
            if !audio_keys.contains(&key) {
                audio_keys.push(key);
            }
        }
        let audio_tracks: Vec<AudioTrack> = audio_keys
            .iter()
            .enumerate()
            .map(|(index, key)| AudioTrack {
                index,
                key: Some((*key).to_string()),
                title: (*key).to_string(),
            })
            .collect();

        let videos: Vec<_> = groups
            .into_iter()
            .filter_map(|g| g.into_video(Some(&file_id)).ok())
            .collect();
        if videos.is_empty() {
            debug!(id = %file_id, "episode has no playable link, skipped");
            return None;
        }

        let subtitles = subtitle
            .map(|s| parse_subtitles(s, self.base))
            .unwrap_or_default();

        let mut builder = File::builder(file_id, title.clone())
            .media(MediaSet::new(videos).with_audio_tracks(audio_tracks.clone()))
            .subtitles(subtitles)
            .audio_tracks(audio_tracks);
        if let Some(season) = season {
            builder = builder.season(season);
        }
        if let Some(episodes) = episode_range(&title) {
            builder = builder.episodes(episodes);
        }
        if let Some(base) = self.base {
            builder = builder.link(base.clone());
        }
        builder.build().ok()
    }
}

fn item_id(item: &PlayerJsItem, parent: &str, index: usize) -> String {
    match &item.id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => format!("{parent}-{index}"),
    }
}
