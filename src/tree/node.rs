//! Folder / File hierarchy.
//!
//! Nodes are built by a provider, wrapped in `Arc` and handed to the
//! consumer. After hand-off the only mutation is the one-time memoization
//! of a File's media or a Folder's children, both held in a
//! [`tokio::sync::OnceCell`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use url::Url;

use crate::error::{EngineError, Result};

use super::registry::{FactoryHandle, LoaderHandle};
use super::video::{AudioTrack, FileId, MediaSet, SubtitleTrack, Video};

/// Inclusive episode numbers covered by one File (`"1-2 серия"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRange {
    pub first: u32,
    pub last: u32,
}

impl EpisodeRange {
    #[must_use]
    pub fn single(episode: u32) -> Self {
        Self {
            first: episode,
            last: episode,
        }
    }
}

impl fmt::Display for EpisodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Where a File's videos come from.
#[derive(Debug, Clone)]
pub enum VideoSource {
    Resolved(Arc<MediaSet>),
    Pending(FactoryHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unresolved,
    Resolving,
    Resolved,
}

/// Leaf node: one episode or movie.
#[derive(Debug)]
pub struct File {
    id: FileId,
    title: String,
    season: Option<u32>,
    episodes: Option<EpisodeRange>,
    link: Option<Url>,
    subtitles: Vec<SubtitleTrack>,
    audio_tracks: Vec<AudioTrack>,
    source: VideoSource,
    media: OnceCell<Arc<MediaSet>>,
    resolving: AtomicBool,
}

impl File {
    pub fn builder(id: impl Into<FileId>, title: impl Into<String>) -> FileBuilder {
        FileBuilder {
            id: id.into(),
            title: title.into(),
            season: None,
            episodes: None,
            link: None,
            subtitles: Vec::new(),
            audio_tracks: Vec::new(),
            source: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &FileId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn season(&self) -> Option<u32> {
        self.season
    }

    #[must_use]
    pub fn episodes(&self) -> Option<EpisodeRange> {
        self.episodes
    }

    /// Frame / referer page the videos were found on.
    #[must_use]
    pub fn link(&self) -> Option<&Url> {
        self.link.as_ref()
    }

    #[must_use]
    pub fn subtitles(&self) -> &[SubtitleTrack] {
        &self.subtitles
    }

    #[must_use]
    pub fn audio_tracks(&self) -> &[AudioTrack] {
        &self.audio_tracks
    }

    #[must_use]
    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    #[must_use]
    pub fn state(&self) -> FileState {
        if self.media.initialized() {
            FileState::Resolved
        } else if self.resolving.load(Ordering::Acquire) {
            FileState::Resolving
        } else {
            FileState::Unresolved
        }
    }

    /// Memoized media, if already resolved.
    #[must_use]
    pub fn media(&self) -> Option<Arc<MediaSet>> {
        self.media.get().cloned()
    }

    pub(super) fn media_cell(&self) -> &OnceCell<Arc<MediaSet>> {
        &self.media
    }

    pub(super) fn begin_resolving(&self) -> ResolvingGuard<'_> {
        self.resolving.store(true, Ordering::Release);
        ResolvingGuard(&self.resolving)
    }
}

/// Clears the `Resolving` state when the factory call ends or is dropped.
pub(super) struct ResolvingGuard<'a>(&'a AtomicBool);

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[must_use]
pub struct FileBuilder {
    id: FileId,
    title: String,
    season: Option<u32>,
    episodes: Option<EpisodeRange>,
    link: Option<Url>,
    subtitles: Vec<SubtitleTrack>,
    audio_tracks: Vec<AudioTrack>,
    source: Option<VideoSource>,
}

impl FileBuilder {
    pub fn season(mut self, season: u32) -> Self {
        self.season = Some(season);
        self
    }

    pub fn episodes(mut self, episodes: EpisodeRange) -> Self {
        self.episodes = Some(episodes);
        self
    }

    pub fn link(mut self, link: Url) -> Self {
        self.link = Some(link);
        self
    }

    pub fn subtitles(mut self, subtitles: Vec<SubtitleTrack>) -> Self {
        self.subtitles = subtitles;
        self
    }

    pub fn audio_tracks(mut self, audio_tracks: Vec<AudioTrack>) -> Self {
        self.audio_tracks = audio_tracks;
        self
    }

    /// Eager videos; the File starts out resolved.
    pub fn videos(self, videos: Vec<Video>) -> Self {
        self.media(MediaSet::new(videos))
    }

    pub fn media(mut self, media: MediaSet) -> Self {
        self.source = Some(VideoSource::Resolved(Arc::new(media)));
        self
    }

    /// Lazy videos produced by a registered factory.
    pub fn factory(mut self, handle: FactoryHandle) -> Self {
        self.source = Some(VideoSource::Pending(handle));
        self
    }

    /// Fails when neither videos nor a factory were given.
    pub fn build(self) -> Result<File> {
        let source = match self.source {
            None => {
                return Err(EngineError::InvalidTree(format!(
                    "file '{}' has neither videos nor a factory",
                    self.id
                )))
            }
            Some(VideoSource::Resolved(media)) if media.is_empty() => {
                return Err(EngineError::InvalidTree(format!(
                    "file '{}' has an empty video list",
                    self.id
                )))
            }
            Some(VideoSource::Resolved(media)) => {
                VideoSource::Resolved(Arc::new(tag_videos(&media, &self.id)))
            }
            Some(pending) => pending,
        };

        let media = match &source {
            VideoSource::Resolved(media) => OnceCell::new_with(Some(media.clone())),
            VideoSource::Pending(_) => OnceCell::new(),
        };

        Ok(File {
            id: self.id,
            title: self.title,
            season: self.season,
            episodes: self.episodes,
            link: self.link,
            subtitles: self.subtitles,
            audio_tracks: self.audio_tracks,
            source,
            media,
            resolving: AtomicBool::new(false),
        })
    }
}

/// Point untagged videos back at their owning File.
pub(super) fn tag_videos(media: &MediaSet, id: &FileId) -> MediaSet {
    let videos: Vec<Video> = media
        .videos
        .iter()
        .map(|v| match v.file_id() {
            Some(_) => v.clone(),
            None => v.clone().with_file(id.clone()),
        })
        .collect();
    MediaSet {
        videos: videos.into(),
        subtitles: media.subtitles.clone(),
        audio_tracks: media.audio_tracks.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderType {
    Season,
    Translate,
    Item,
    #[default]
    Unknown,
}

/// How a Folder summarizes its Files' watch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionBehavior {
    #[default]
    None,
    Average,
    Max,
}

/// Last-known progress fraction (0.0–1.0) per File.
pub trait PositionSource {
    fn progress(&self, file: &FileId) -> Option<f64>;
}

impl PositionSource for HashMap<FileId, f64> {
    fn progress(&self, file: &FileId) -> Option<f64> {
        self.get(file).copied()
    }
}

#[derive(Debug, Clone)]
pub enum ChildrenSource {
    Loaded,
    Pending(LoaderHandle),
}

/// Composite node: a season, a translation, an item.
#[derive(Debug)]
pub struct Folder {
    id: String,
    title: String,
    folder_type: FolderType,
    position: PositionBehavior,
    season: Option<u32>,
    link: Option<Url>,
    source: ChildrenSource,
    children: OnceCell<Arc<[TreeNode]>>,
}

impl Folder {
    /// Folder with its children known up front.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        folder_type: FolderType,
        children: Vec<TreeNode>,
    ) -> Self {
        Self::with_source(
            id.into(),
            title.into(),
            folder_type,
            ChildrenSource::Loaded,
            OnceCell::new_with(Some(children.into())),
        )
    }

    /// Folder whose children a registered loader produces on first use.
    pub fn lazy(
        id: impl Into<String>,
        title: impl Into<String>,
        folder_type: FolderType,
        loader: LoaderHandle,
    ) -> Self {
        Self::with_source(
            id.into(),
            title.into(),
            folder_type,
            ChildrenSource::Pending(loader),
            OnceCell::new(),
        )
    }

    fn with_source(
        id: String,
        title: String,
        folder_type: FolderType,
        source: ChildrenSource,
        children: OnceCell<Arc<[TreeNode]>>,
    ) -> Self {
        Self {
            id,
            title,
            folder_type,
            position: PositionBehavior::default(),
            season: None,
            link: None,
            source,
            children,
        }
    }

    #[must_use]
    pub fn with_position(mut self, position: PositionBehavior) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_season(mut self, season: u32) -> Self {
        self.season = Some(season);
        self
    }

    #[must_use]
    pub fn with_link(mut self, link: Url) -> Self {
        self.link = Some(link);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn folder_type(&self) -> FolderType {
        self.folder_type
    }

    #[must_use]
    pub fn position_behavior(&self) -> PositionBehavior {
        self.position
    }

    #[must_use]
    pub fn season(&self) -> Option<u32> {
        self.season
    }

    #[must_use]
    pub fn link(&self) -> Option<&Url> {
        self.link.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> &ChildrenSource {
        &self.source
    }

    /// Children, if already loaded.
    #[must_use]
    pub fn children(&self) -> Option<&[TreeNode]> {
        self.children.get().map(|c| &c[..])
    }

    pub(super) fn children_cell(&self) -> &OnceCell<Arc<[TreeNode]>> {
        &self.children
    }

    /// Summarize watch progress over loaded descendant Files.
    ///
    /// Files without known progress are skipped; unloaded folders
    /// contribute nothing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate_position(&self, positions: &dyn PositionSource) -> Option<f64> {
        if self.position == PositionBehavior::None {
            return None;
        }
        let mut known = Vec::new();
        self.collect_progress(positions, &mut known);
        match self.position {
            PositionBehavior::None => None,
            PositionBehavior::Average if known.is_empty() => None,
            PositionBehavior::Average => Some(known.iter().sum::<f64>() / known.len() as f64),
            PositionBehavior::Max => known.into_iter().reduce(f64::max),
        }
    }

    fn collect_progress(&self, positions: &dyn PositionSource, known: &mut Vec<f64>) {
        for child in self.children().unwrap_or_default() {
            match child {
                TreeNode::File(file) => {
                    if let Some(p) = positions.progress(file.id()) {
                        known.push(p.clamp(0.0, 1.0));
                    }
                }
                TreeNode::Folder(folder) => folder.collect_progress(positions, known),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum TreeNode {
    File(Arc<File>),
    Folder(Arc<Folder>),
}

impl TreeNode {
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::File(f) => f.title(),
            Self::Folder(f) => f.title(),
        }
    }

    #[must_use]
    pub fn as_file(&self) -> Option<&Arc<File>> {
        match self {
            Self::File(f) => Some(f),
            Self::Folder(_) => None,
        }
    }

    #[must_use]
    pub fn as_folder(&self) -> Option<&Arc<Folder>> {
        match self {
            Self::Folder(f) => Some(f),
            Self::File(_) => None,
        }
    }
}

impl From<File> for TreeNode {
    fn from(file: File) -> Self {
        Self::File(Arc::new(file))
    }
}

impl From<Folder> for TreeNode {
    fn from(folder: Folder) -> Self {
        Self::Folder(Arc::new(folder))
    }
}
