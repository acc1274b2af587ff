//! Playable stream descriptors.

use std::fmt;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, ORIGIN, REFERER};
use http::HeaderMap;
use url::Url;

use crate::error::{EngineError, Result};

/// Provider-scoped identifier of a [`File`](super::File).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Arc<str>);

impl FileId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for FileId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream quality parsed from free text.
///
/// Leading digits give the height (`"1080p Ultra"` → 1080); the full text
/// is kept as the label. Qualities order by height, then label, and a
/// label-only quality sorts below every numeric one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quality {
    height: Option<u32>,
    label: String,
}

impl Quality {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let label = text.trim();
        let digits = label.bytes().take_while(u8::is_ascii_digit).count();
        Self {
            height: label[..digits].parse().ok(),
            label: label.to_string(),
        }
    }

    /// A `"{height}p"` quality.
    #[must_use]
    pub fn from_height(height: u32) -> Self {
        Self {
            height: Some(height),
            label: format!("{height}p"),
        }
    }

    #[must_use]
    pub fn height(&self) -> Option<u32> {
        self.height
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// One playable stream variant.
///
/// `variants` are interchangeable fallbacks, tried in order. There is
/// always at least one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    variants: Vec<Url>,
    quality: Quality,
    headers: HeaderMap,
    file: Option<FileId>,
}

impl Video {
    pub fn new(variants: Vec<Url>, quality: Quality) -> Result<Self> {
        if variants.is_empty() {
            return Err(EngineError::InvalidTree(format!(
                "video '{quality}' has no URI"
            )));
        }
        Ok(Self {
            variants,
            quality,
            headers: HeaderMap::new(),
            file: None,
        })
    }

    #[must_use]
    pub fn with_file(mut self, file: FileId) -> Self {
        self.file = Some(file);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name: HeaderName = name
            .parse()
            .map_err(|e| EngineError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EngineError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Send `Referer` (and `Origin`) of the embedding page with the stream.
    #[must_use]
    pub fn with_referer(mut self, page: &Url) -> Self {
        if let Ok(value) = HeaderValue::from_str(page.as_str()) {
            self.headers.insert(REFERER, value);
        }
        let origin = page.origin().ascii_serialization();
        if let Ok(value) = HeaderValue::from_str(&origin) {
            self.headers.insert(ORIGIN, value);
        }
        self
    }

    /// Preferred URI.
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.variants[0]
    }

    #[must_use]
    pub fn variants(&self) -> &[Url] {
        &self.variants
    }

    #[must_use]
    pub fn quality(&self) -> &Quality {
        &self.quality
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn file_id(&self) -> Option<&FileId> {
        self.file.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrack {
    pub language: Option<String>,
    pub title: String,
    pub link: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub index: usize,
    /// Provider key selecting this track (the PlayerJS `{…}` tag).
    pub key: Option<String>,
    pub title: String,
}

/// Everything a resolved [`File`](super::File) plays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSet {
    pub videos: Arc<[Video]>,
    pub subtitles: Vec<SubtitleTrack>,
    pub audio_tracks: Vec<AudioTrack>,
}

impl MediaSet {
    #[must_use]
    pub fn new(videos: Vec<Video>) -> Self {
        Self {
            videos: videos.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_subtitles(mut self, subtitles: Vec<SubtitleTrack>) -> Self {
        self.subtitles = subtitles;
        self
    }

    #[must_use]
    pub fn with_audio_tracks(mut self, audio_tracks: Vec<AudioTrack>) -> Self {
        self.audio_tracks = audio_tracks;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    /// Highest quality video.
    #[must_use]
    pub fn best(&self) -> Option<&Video> {
        self.videos.iter().max_by(|a, b| a.quality.cmp(&b.quality))
    }
}
