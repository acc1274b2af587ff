//! Playlist grammars used by video players on provider pages.
//!
//! - [`playerjs`]: the `[quality]{audio}url or url,…` string form
//! - [`folder`]: the PlayerJS JSON form with seasons and episodes
//! - [`m3u8`]: HLS master playlist variants

pub mod folder;
pub mod m3u8;
pub mod playerjs;

pub use folder::{parse_playerjs_json, PlayerJsItem};
pub use m3u8::{is_master_playlist, parse_m3u8, parse_m3u8_text};
pub use playerjs::{
    group_playlist, parse_playlist_string, parse_subtitles, playlist_videos, serialize_groups,
    PlayerJsEntries, PlaylistEntry, PlaylistGroup,
};
